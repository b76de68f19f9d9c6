//! Client builder
//!
//! The `ClientBuilder` declares the methods a client may call and configures
//! how calls are made:
//! - Methods and their argument/result structs
//! - Client-wide and per-method middleware
//! - Wire encoding (strict binary by default)
//! - Request size limit for the WebSocket transport
//! - Observability (OpenTelemetry)
//!
//! # Examples
//!
//! ```rust,ignore
//! use frpc_client::ClientBuilder;
//! use frpc_core::{CallContext, LoggingMiddleware};
//!
//! let client = ClientBuilder::new()
//!     .method::<PingArgs, PingResult>("ping")
//!     .method::<BlahArgs, BlahResult>("blah")
//!     .sync_middleware(LoggingMiddleware::new())
//!     .connect("ws://localhost:9090")
//!     .await?;
//!
//! let n: i64 = client.call(&CallContext::new(), "blah", BlahArgs { num: 3 }).await?;
//! ```

use crate::client::{bind_method, Client};
use crate::engine::InvocationEngine;
use crate::metrics::ClientMetrics;
use crate::transport::WsTransport;
use frpc_core::middleware::InvocationHandler;
use frpc_core::{
    BinaryProtocolFactory, Error, Method, MethodResult, Middleware, MiddlewareChain,
    ObservabilityConfig, ProtocolFactory, Result, StructValue, SyncMiddleware, Transport,
};
use std::collections::HashMap;
use std::sync::Arc;

type Binder = fn(InvocationEngine, String) -> Arc<dyn InvocationHandler>;

struct Declaration {
    name: String,
    bind: Binder,
    middleware: MiddlewareChain,
}

/// Builder for configuring and creating a [`Client`]
pub struct ClientBuilder {
    protocol: Arc<dyn ProtocolFactory>,
    middleware: MiddlewareChain,
    declarations: Vec<Declaration>,
    request_size_limit: Option<usize>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            protocol: Arc::new(BinaryProtocolFactory),
            middleware: MiddlewareChain::new(),
            declarations: Vec::new(),
            request_size_limit: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Declare a method with argument struct `A` and result struct `R`
    pub fn method<A, R>(self, name: impl Into<String>) -> Self
    where
        A: StructValue,
        R: MethodResult,
    {
        self.method_with_middleware::<A, R>(name, MiddlewareChain::new())
    }

    /// Declare a method with middleware that runs inside the client-wide chain
    pub fn method_with_middleware<A, R>(
        mut self,
        name: impl Into<String>,
        middleware: MiddlewareChain,
    ) -> Self
    where
        A: StructValue,
        R: MethodResult,
    {
        self.declarations.push(Declaration {
            name: name.into(),
            bind: bind_method::<A, R>,
            middleware,
        });
        self
    }

    /// Add middleware wrapping every declared method
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.add(middleware);
        self
    }

    pub fn sync_middleware<T: SyncMiddleware + 'static>(mut self, middleware: T) -> Self {
        self.middleware.add_sync(middleware);
        self
    }

    pub fn protocol_factory(mut self, protocol: Arc<dyn ProtocolFactory>) -> Self {
        self.protocol = protocol;
        self
    }

    /// Largest request frame `connect` will send; unlimited by default
    pub fn request_size_limit(mut self, limit: usize) -> Self {
        self.request_size_limit = Some(limit);
        self
    }

    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build a client over an existing transport
    pub fn build(mut self, transport: Arc<dyn Transport>) -> Result<Client> {
        let metrics = self.init_observability()?;
        Ok(self.assemble(transport, metrics))
    }

    /// Connect a WebSocket transport to `url` and build the client
    pub async fn connect(mut self, url: &str) -> Result<Client> {
        let metrics = self.init_observability()?;
        let transport =
            WsTransport::connect_with_metrics(url, self.request_size_limit, metrics.clone())
                .await?;
        Ok(self.assemble(Arc::new(transport), metrics))
    }

    fn init_observability(&mut self) -> Result<Option<Arc<ClientMetrics>>> {
        let Some(mut config) = self.observability_config.take() else {
            return Ok(None);
        };
        if let Some(name) = self.service_name.take() {
            config.service_name = name;
        }
        frpc_core::init_observability(config.clone())
            .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;
        Ok(Some(Arc::new(ClientMetrics::new(config.service_name))))
    }

    fn assemble(self, transport: Arc<dyn Transport>, metrics: Option<Arc<ClientMetrics>>) -> Client {
        let mut engine = InvocationEngine::new(transport, self.protocol);
        if let Some(metrics) = metrics {
            engine = engine.with_metrics(metrics);
        }

        let mut methods = HashMap::new();
        for declaration in self.declarations {
            let mut chain = self.middleware.clone();
            chain.extend(&declaration.middleware);
            let handler = (declaration.bind)(engine.clone(), declaration.name.clone());
            tracing::debug!(method = %declaration.name, middleware = chain.len(), "Declared method");
            methods.insert(
                declaration.name.clone(),
                Method::new(declaration.name, handler, chain),
            );
        }
        Client::new(engine, methods)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

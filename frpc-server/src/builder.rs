//! Server builder for configuring frpc servers
//!
//! The `ServerBuilder` provides a fluent API for configuring all aspects
//! of a server before starting it:
//! - Bind address
//! - The processor serving inbound calls
//! - Observability (OpenTelemetry)
//!
//! # Examples
//!
//! ```rust,ignore
//! use frpc_server::{FrpcServer, Processor};
//!
//! let processor = Processor::builder()
//!     .method::<PingArgs, PingResult, _, _>("ping", |_, _| async { Ok(()) })
//!     .build();
//!
//! let server = FrpcServer::builder()
//!     .bind_str("127.0.0.1:9090")?
//!     .processor(processor)
//!     .with_default_observability()
//!     .build()
//!     .await?;
//!
//! server.run().await?;
//! ```

use crate::{FrpcServer, Processor, ServerMetrics};
use frpc_core::{Error, ObservabilityConfig, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for constructing an frpc server
pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    processor: Option<Processor>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: None,
            processor: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Set the bind address for the server
    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Set the bind address from a string (e.g., "127.0.0.1:8080")
    pub fn bind_str(mut self, addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid address: {}", e)))?;
        self.addr = Some(addr);
        Ok(self)
    }

    /// Set the processor serving every connection
    pub fn processor(mut self, processor: Processor) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Bind the listener and build the server
    pub async fn build(self) -> Result<FrpcServer> {
        let addr = self
            .addr
            .ok_or_else(|| Error::Internal("No bind address specified".to_string()))?;
        let processor = self
            .processor
            .ok_or_else(|| Error::Internal("No processor specified".to_string()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;

        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }
            frpc_core::init_observability(config.clone())
                .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;
            Some(Arc::new(ServerMetrics::new(config.service_name)))
        } else {
            None
        };

        tracing::info!(addr = %addr, methods = ?processor.methods(), "Server listening");

        Ok(FrpcServer {
            listener,
            processor,
            metrics,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

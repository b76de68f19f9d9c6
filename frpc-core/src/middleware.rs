//! Interceptor chain around method handlers
//!
//! Both sides wrap every declared method in the same kind of chain. A
//! middleware sees the method name, the call context and the type-erased
//! arguments, and decides whether and how to continue:
//! - Inspect or replace the arguments before the handler runs
//! - Short-circuit with its own reply
//! - Post-process or translate the handler's outcome
//!
//! # Ordering
//!
//! The first middleware added is the outermost one: it runs first on the way
//! in and last on the way out.
//!
//! ```text
//! first → second → handler → second → first
//! ```
//!
//! # Built-in Middleware
//!
//! - **LoggingMiddleware**: logs each invocation and its outcome
//! - **MetricsMiddleware**: counts invocations and failures
//! - **TracingMiddleware**: runs the rest of the chain inside an `rpc_call` span
//!
//! # Examples
//!
//! ```rust
//! use frpc_core::middleware::{from_fn, Arguments, LoggingMiddleware, Method, MiddlewareChain, Reply};
//! use frpc_core::CallContext;
//!
//! # tokio_test_block(async {
//! let chain = MiddlewareChain::new().with_sync(LoggingMiddleware::new());
//! let double = Method::new(
//!     "double",
//!     from_fn(|invocation| async move {
//!         let n: i32 = invocation.arguments.downcast()?;
//!         Ok(Reply::new(n * 2))
//!     }),
//!     chain,
//! );
//!
//! let reply = double.invoke(CallContext::new(), Arguments::new(21)).await.unwrap();
//! assert_eq!(reply.downcast::<i32>().unwrap(), 42);
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::context::CallContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

macro_rules! erased_value {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        pub struct $name(Box<dyn Any + Send>);

        impl $name {
            pub fn new<T: Any + Send>(value: T) -> Self {
                Self(Box::new(value))
            }

            pub fn is<T: Any>(&self) -> bool {
                self.0.is::<T>()
            }

            /// Take the value out, failing with `Internal` on a type mismatch
            pub fn downcast<T: Any>(self) -> Result<T> {
                self.0.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
                    Error::Internal(format!("{} is not a {}", $what, type_name::<T>()))
                })
            }

            pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
                self.0.downcast_ref::<T>()
            }

            pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
                self.0.downcast_mut::<T>()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name)).finish_non_exhaustive()
            }
        }
    };
}

erased_value!(
    /// Type-erased arguments of one invocation
    Arguments,
    "argument value"
);

erased_value!(
    /// Type-erased success value of one invocation
    Reply,
    "reply value"
);

/// One call travelling through a chain
#[derive(Debug)]
pub struct Invocation {
    pub method: String,
    pub context: CallContext,
    pub arguments: Arguments,
}

/// Innermost callable of a chain
#[async_trait]
pub trait InvocationHandler: Send + Sync {
    async fn call(&self, invocation: Invocation) -> Result<Reply>;
}

/// Adapter turning an async closure into an [`InvocationHandler`]
pub struct HandlerFn<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> InvocationHandler for HandlerFn<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    async fn call(&self, invocation: Invocation) -> Result<Reply> {
        (self.func)(invocation).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn from_fn<F, Fut>(func: F) -> Arc<dyn InvocationHandler>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    Arc::new(HandlerFn { func })
}

/// Interceptor
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle the invocation, usually by calling `next.run(invocation)`
    async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Result<Reply>;
}

/// Remainder of a chain
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    handler: &'a dyn InvocationHandler,
}

impl<'a> Next<'a> {
    /// Run the next middleware, or the handler when none remain
    pub async fn run(self, invocation: Invocation) -> Result<Reply> {
        match self.remaining.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    remaining: rest,
                    handler: self.handler,
                };
                current.handle(invocation, next).await
            }
            None => self.handler.call(invocation).await,
        }
    }
}

/// Middleware that needs no awaiting
///
/// `before` may rewrite the invocation or return `Some(reply)` to
/// short-circuit the rest of the chain; `after` observes the outcome.
pub trait SyncMiddleware: Send + Sync {
    fn before(&self, _invocation: &mut Invocation) -> Result<Option<Reply>> {
        Ok(None)
    }

    fn after(&self, _method: &str, _result: &Result<Reply>) {}
}

struct SyncMiddlewareAdapter<T: SyncMiddleware> {
    inner: T,
}

#[async_trait]
impl<T: SyncMiddleware + 'static> Middleware for SyncMiddlewareAdapter<T> {
    async fn handle(&self, mut invocation: Invocation, next: Next<'_>) -> Result<Reply> {
        if let Some(reply) = self.inner.before(&mut invocation)? {
            return Ok(reply);
        }
        let method = invocation.method.clone();
        let result = next.run(invocation).await;
        self.inner.after(&method, &result);
        result
    }
}

/// Ordered list of middleware
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn add_sync<T: SyncMiddleware + 'static>(&mut self, middleware: T) {
        self.middlewares
            .push(Arc::new(SyncMiddlewareAdapter { inner: middleware }));
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.add(middleware);
        self
    }

    pub fn with_sync<T: SyncMiddleware + 'static>(mut self, middleware: T) -> Self {
        self.add_sync(middleware);
        self
    }

    /// Append every middleware of `inner`, which then runs inside this chain
    pub fn extend(&mut self, inner: &MiddlewareChain) {
        self.middlewares.extend(inner.middlewares.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// A named handler bound to its middleware
///
/// Built once and shared by every invocation of the method.
#[derive(Clone)]
pub struct Method {
    name: Arc<str>,
    handler: Arc<dyn InvocationHandler>,
    middlewares: Arc<[Arc<dyn Middleware>]>,
}

impl Method {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn InvocationHandler>,
        chain: MiddlewareChain,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            handler,
            middlewares: chain.middlewares.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the handler under the chain
    pub async fn invoke(&self, context: CallContext, arguments: Arguments) -> Result<Reply> {
        let invocation = Invocation {
            method: self.name.to_string(),
            context,
            arguments,
        };
        if self.middlewares.is_empty() {
            return self.handler.call(invocation).await;
        }
        Next {
            remaining: &self.middlewares,
            handler: self.handler.as_ref(),
        }
        .run(invocation)
        .await
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Logs every invocation and its outcome
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl SyncMiddleware for LoggingMiddleware {
    fn before(&self, invocation: &mut Invocation) -> Result<Option<Reply>> {
        tracing::info!(
            method = %invocation.method,
            correlation_id = %invocation.context.correlation_id(),
            op_id = invocation.context.op_id(),
            "Invocation started"
        );
        Ok(None)
    }

    fn after(&self, method: &str, result: &Result<Reply>) {
        match result {
            Ok(_) => tracing::info!(method, success = true, "Invocation finished"),
            Err(e) => tracing::info!(method, success = false, error = %e, "Invocation finished"),
        }
    }
}

/// Counts invocations and failures
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    request_count: AtomicU64,
    error_count: AtomicU64,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn get_error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Result<Reply> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let method = invocation.method.clone();
        let start = Instant::now();

        let result = next.run(invocation).await;

        if result.is_err() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(
            method = %method,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            success = result.is_ok(),
            "Invocation measured"
        );
        result
    }
}

/// Runs the rest of the chain inside an `rpc_call` span
#[derive(Debug, Default)]
pub struct TracingMiddleware;

impl TracingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Result<Reply> {
        let span = tracing::info_span!(
            "rpc_call",
            rpc.system = "frpc",
            rpc.method = %invocation.method,
            rpc.correlation_id = %invocation.context.correlation_id(),
        );
        next.run(invocation).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Result<Reply> {
            self.journal.lock().unwrap().push(format!("{}:in", self.name));
            let result = next.run(invocation).await;
            self.journal.lock().unwrap().push(format!("{}:out", self.name));
            result
        }
    }

    fn recording_handler(journal: Journal) -> Arc<dyn InvocationHandler> {
        from_fn(move |invocation: Invocation| {
            let journal = journal.clone();
            async move {
                journal.lock().unwrap().push("handler".to_string());
                let n: i32 = invocation.arguments.downcast()?;
                Ok(Reply::new(n + 1))
            }
        })
    }

    struct AddTen;

    impl SyncMiddleware for AddTen {
        fn before(&self, invocation: &mut Invocation) -> Result<Option<Reply>> {
            if let Some(n) = invocation.arguments.downcast_mut::<i32>() {
                *n += 10;
            }
            Ok(None)
        }
    }

    struct Deny;

    impl SyncMiddleware for Deny {
        fn before(&self, invocation: &mut Invocation) -> Result<Option<Reply>> {
            Err(Error::handler(format!("{} denied", invocation.method)))
        }
    }

    struct Cached;

    impl SyncMiddleware for Cached {
        fn before(&self, _invocation: &mut Invocation) -> Result<Option<Reply>> {
            Ok(Some(Reply::new(-1i32)))
        }
    }

    #[tokio::test]
    async fn test_onion_order() {
        let journal: Journal = Arc::default();
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recorder { name: "first", journal: journal.clone() }))
            .with(Arc::new(Recorder { name: "second", journal: journal.clone() }));
        let method = Method::new("inc", recording_handler(journal.clone()), chain);

        let reply = method.invoke(CallContext::new(), Arguments::new(1i32)).await.unwrap();
        assert_eq!(reply.downcast::<i32>().unwrap(), 2);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["first:in", "second:in", "handler", "second:out", "first:out"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler_directly() {
        let journal: Journal = Arc::default();
        let method = Method::new("inc", recording_handler(journal.clone()), MiddlewareChain::new());

        let reply = method.invoke(CallContext::new(), Arguments::new(5i32)).await.unwrap();
        assert_eq!(reply.downcast::<i32>().unwrap(), 6);
        assert_eq!(*journal.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_sync_middleware_modifies_arguments() {
        let journal: Journal = Arc::default();
        let chain = MiddlewareChain::new().with_sync(AddTen);
        let method = Method::new("inc", recording_handler(journal), chain);

        let reply = method.invoke(CallContext::new(), Arguments::new(1i32)).await.unwrap();
        assert_eq!(reply.downcast::<i32>().unwrap(), 12);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let journal: Journal = Arc::default();
        let chain = MiddlewareChain::new().with_sync(Cached).with_sync(AddTen);
        let method = Method::new("inc", recording_handler(journal.clone()), chain);

        let reply = method.invoke(CallContext::new(), Arguments::new(1i32)).await.unwrap();
        assert_eq!(reply.downcast::<i32>().unwrap(), -1);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_middleware_error_propagates() {
        let journal: Journal = Arc::default();
        let chain = MiddlewareChain::new().with_sync(Deny);
        let method = Method::new("inc", recording_handler(journal.clone()), chain);

        let err = method
            .invoke(CallContext::new(), Arguments::new(1i32))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Handler(ref msg) if msg == "inc denied"));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_middleware_counts() {
        let metrics = Arc::new(MetricsMiddleware::new());
        let chain = MiddlewareChain::new()
            .with(metrics.clone())
            .with_sync(LoggingMiddleware::new())
            .with(Arc::new(TracingMiddleware::new()));
        let method = Method::new("inc", recording_handler(Arc::default()), chain);

        method.invoke(CallContext::new(), Arguments::new(1i32)).await.unwrap();
        let bad = method.invoke(CallContext::new(), Arguments::new("nope")).await;

        assert!(matches!(bad, Err(Error::Internal(_))));
        assert_eq!(metrics.get_request_count(), 2);
        assert_eq!(metrics.get_error_count(), 1);
    }

    #[test]
    fn test_erased_values() {
        let mut args = Arguments::new(String::from("hi"));
        assert!(args.is::<String>());
        args.downcast_mut::<String>().unwrap().push('!');
        assert_eq!(args.downcast_ref::<String>().map(String::as_str), Some("hi!"));
        assert!(matches!(args.downcast::<u8>(), Err(Error::Internal(_))));
    }
}

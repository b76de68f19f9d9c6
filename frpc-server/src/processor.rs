//! Processor: the server dispatch table
//!
//! The processor maps method names to [`Dispatcher`]s and owns the write
//! lock shared by every call it serves. Handling an inbound frame is split
//! in two steps:
//!
//! 1. **Prepare** (synchronous, in arrival order): read the request headers
//!    into a `CallContext`, read the `CALL` header, look up the method and
//!    decode its arguments
//! 2. **Run** (concurrent): invoke the middleware-wrapped handler and write
//!    the reply or exception under the write lock
//!
//! Splitting the steps lets the connection loop consume frames strictly in
//! order while handlers of different calls execute side by side.
//!
//! # Unknown methods
//!
//! A call naming a method missing from the table has its argument struct
//! skipped. Running it writes an `UNKNOWN_METHOD` exception so the caller
//! stops waiting, then fails with `Error::UnknownMethod`, which is fatal to
//! the connection.
//!
//! # Examples
//!
//! ```rust,ignore
//! use frpc_server::Processor;
//!
//! let processor = Processor::builder()
//!     .method::<BlahArgs, BlahResult, _, _>("blah", |ctx, args| async move {
//!         ctx.add_response_header("foo", "bar");
//!         Ok(i64::from(args.num) * 2)
//!     })
//!     .build();
//! ```

use crate::dispatcher::{typed_codec, typed_handler, Dispatcher, MethodCodec, WriteSide};
use bytes::Bytes;
use frpc_core::middleware::{Arguments, InvocationHandler};
use frpc_core::protocol::{skip, MessageType, ProtocolFactory};
use frpc_core::{
    ApplicationException, BinaryProtocolFactory, CallContext, Error, MethodResult, Middleware,
    MiddlewareChain, OutputTransport, Result, StructValue, SyncMiddleware, TType,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Shared {
    table: HashMap<String, Dispatcher>,
    write_side: WriteSide,
}

/// Dispatch table for one service
///
/// Cheaply cloneable; all clones share the table and the write lock. Every
/// connection served by clones of one processor writes under that single
/// lock, so a slow flush on one connection delays responses on the others.
/// Build a separate processor per connection to avoid the contention.
#[derive(Clone)]
pub struct Processor {
    shared: Arc<Shared>,
}

impl Processor {
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::new()
    }

    /// Check if a method is registered
    pub fn has_method(&self, method: &str) -> bool {
        self.shared.table.contains_key(method)
    }

    /// Names of the registered methods
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.table.keys().cloned().collect();
        names.sort();
        names
    }

    /// Decode an inbound frame into a dispatch ready to run
    ///
    /// # Errors
    ///
    /// `Decode` when the frame is malformed or is not a `CALL`.
    pub fn prepare(&self, frame: Bytes) -> Result<Dispatch> {
        let mut iprot = self.shared.write_side.protocol.reader(frame);
        let context = iprot.read_request_headers()?;
        let header = iprot.read_message_begin()?;
        if header.message_type != MessageType::Call {
            return Err(Error::Decode(format!(
                "Expected CALL message for {}, got {:?}",
                header.name, header.message_type
            )));
        }

        let target = match self.shared.table.get(&header.name) {
            Some(dispatcher) => {
                let arguments = dispatcher.decode_args(iprot.as_mut())?;
                iprot.read_message_end()?;
                Target::Call {
                    dispatcher: dispatcher.clone(),
                    arguments,
                }
            }
            None => {
                skip(iprot.as_mut(), TType::Struct)?;
                iprot.read_message_end()?;
                tracing::warn!(method = %header.name, "Call to unknown method");
                Target::Unknown {
                    method: header.name,
                }
            }
        };

        tracing::debug!(
            method = %target.method(),
            correlation_id = %context.correlation_id(),
            op_id = context.op_id(),
            "Prepared call"
        );

        Ok(Dispatch {
            shared: self.shared.clone(),
            context,
            target,
        })
    }

    /// Prepare and run one frame
    pub async fn process(&self, frame: Bytes, output: &dyn OutputTransport) -> Result<()> {
        self.prepare(frame)?.run(output).await
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("methods", &self.methods())
            .finish()
    }
}

enum Target {
    Call {
        dispatcher: Dispatcher,
        arguments: Arguments,
    },
    Unknown {
        method: String,
    },
}

impl Target {
    fn method(&self) -> &str {
        match self {
            Target::Call { dispatcher, .. } => dispatcher.name(),
            Target::Unknown { method } => method,
        }
    }
}

/// A decoded call waiting to run
pub struct Dispatch {
    shared: Arc<Shared>,
    context: CallContext,
    target: Target,
}

impl Dispatch {
    pub fn method(&self) -> &str {
        self.target.method()
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Whether the call named a method missing from the table
    pub fn is_unknown(&self) -> bool {
        matches!(self.target, Target::Unknown { .. })
    }

    /// Run the handler and write the outcome to `output`
    ///
    /// # Errors
    ///
    /// - `RemoteApplication` after a generic exception was written
    /// - `UnknownMethod` after the unknown-method exception was written
    /// - write failures of `output`
    pub async fn run(self, output: &dyn OutputTransport) -> Result<()> {
        let write_side = &self.shared.write_side;
        match self.target {
            Target::Call {
                dispatcher,
                arguments,
            } => {
                dispatcher
                    .dispatch(write_side, output, self.context, arguments)
                    .await
            }
            Target::Unknown { method } => {
                let envelope = ApplicationException::unknown_method(&method);
                write_side
                    .write_exception(output, &self.context, &method, &envelope)
                    .await?;
                Err(Error::UnknownMethod(method))
            }
        }
    }
}

struct Registration {
    name: String,
    handler: Arc<dyn InvocationHandler>,
    codec: Arc<dyn MethodCodec>,
    middleware: MiddlewareChain,
}

/// Builder for a [`Processor`]
pub struct ProcessorBuilder {
    protocol: Arc<dyn ProtocolFactory>,
    middleware: MiddlewareChain,
    registrations: Vec<Registration>,
}

impl ProcessorBuilder {
    pub fn new() -> Self {
        Self {
            protocol: Arc::new(BinaryProtocolFactory),
            middleware: MiddlewareChain::new(),
            registrations: Vec::new(),
        }
    }

    /// Register a handler for a method
    ///
    /// A method registered twice keeps the last handler.
    pub fn method<A, R, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        A: StructValue,
        R: MethodResult,
        F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Success>> + Send + 'static,
    {
        self.method_with_middleware::<A, R, F, Fut>(name, MiddlewareChain::new(), handler)
    }

    /// Register a handler with middleware that runs inside the processor-wide chain
    pub fn method_with_middleware<A, R, F, Fut>(
        mut self,
        name: impl Into<String>,
        middleware: MiddlewareChain,
        handler: F,
    ) -> Self
    where
        A: StructValue,
        R: MethodResult,
        F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Success>> + Send + 'static,
    {
        self.registrations.push(Registration {
            name: name.into(),
            handler: typed_handler::<A, R, F, Fut>(handler),
            codec: typed_codec::<A, R>(),
            middleware,
        });
        self
    }

    /// Add middleware wrapping every method
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

    pub fn build(self) -> Processor {
        let mut table = HashMap::new();
        for registration in self.registrations {
            let mut chain = self.middleware.clone();
            chain.extend(&registration.middleware);
            tracing::debug!(method = %registration.name, middleware = chain.len(), "Registered method");
            let dispatcher = Dispatcher::new(
                registration.name.clone(),
                registration.handler,
                registration.codec,
                chain,
            );
            table.insert(registration.name, dispatcher);
        }

        Processor {
            shared: Arc::new(Shared {
                table,
                write_side: WriteSide {
                    protocol: self.protocol,
                    write_lock: Mutex::new(()),
                },
            }),
        }
    }
}

impl Default for ProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

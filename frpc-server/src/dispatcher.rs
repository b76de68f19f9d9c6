//! Per-method dispatcher
//!
//! A `Dispatcher` owns everything the processor needs for one method: the
//! codec that turns the argument struct into [`Arguments`] and a reply back
//! into the result struct, and the middleware-wrapped handler.
//!
//! # Outcomes
//!
//! Once the handler has run, the outcome is encoded and written under the
//! processor's write lock:
//!
//! - **Success**: `REPLY` carrying the result struct
//! - **Rate limit**: `EXCEPTION` with `RATE_LIMIT_EXCEEDED`; the error is
//!   swallowed because the caller has been told
//! - **Anything else**: `EXCEPTION` with `UNKNOWN`; the error is returned as
//!   `RemoteApplication` so the connection loop can log it
//!
//! Frames are encoded into memory first and written with a single
//! `write` + `flush` while the lock is held. A reply that fails to encode is
//! reported as a generic exception.

use bytes::Bytes;
use frpc_core::error::exception_code;
use frpc_core::middleware::{from_fn, Arguments, Invocation, InvocationHandler, Method, Reply};
use frpc_core::protocol::{MemoryOutputBuffer, MessageType, ProtocolFactory};
use frpc_core::{
    ApplicationException, CallContext, Error, MethodResult, MiddlewareChain, OutputTransport,
    ProtocolReader, ProtocolWriter, Result, StructValue,
};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Argument decoding and result encoding for one method
pub trait MethodCodec: Send + Sync {
    fn decode_args(&self, iprot: &mut dyn ProtocolReader) -> Result<Arguments>;

    /// Write the result struct holding `reply`
    fn encode_result(&self, reply: Reply, oprot: &mut dyn ProtocolWriter) -> Result<()>;
}

struct TypedCodec<A, R>(PhantomData<fn() -> (A, R)>);

impl<A, R> MethodCodec for TypedCodec<A, R>
where
    A: StructValue,
    R: MethodResult,
{
    fn decode_args(&self, iprot: &mut dyn ProtocolReader) -> Result<Arguments> {
        Ok(Arguments::new(A::decode(iprot)?))
    }

    fn encode_result(&self, reply: Reply, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        let success: R::Success = reply.downcast()?;
        R::from_success(success).encode(oprot)
    }
}

/// Codec for a method with argument struct `A` and result struct `R`
pub fn typed_codec<A, R>() -> Arc<dyn MethodCodec>
where
    A: StructValue,
    R: MethodResult,
{
    Arc::new(TypedCodec::<A, R>(PhantomData))
}

/// Wrap a typed handler as the innermost callable of a chain
pub fn typed_handler<A, R, F, Fut>(handler: F) -> Arc<dyn InvocationHandler>
where
    A: StructValue,
    R: MethodResult,
    F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Success>> + Send + 'static,
{
    let handler = Arc::new(handler);
    from_fn(move |invocation: Invocation| {
        let handler = handler.clone();
        async move {
            let args: A = invocation.arguments.downcast()?;
            let success = handler(invocation.context, args).await?;
            Ok(Reply::new(success))
        }
    })
}

/// Shared state every dispatch writes through
pub(crate) struct WriteSide {
    pub(crate) protocol: Arc<dyn ProtocolFactory>,
    pub(crate) write_lock: Mutex<()>,
}

impl WriteSide {
    /// Encode one response frame in memory
    pub(crate) fn encode_frame(
        &self,
        ctx: &CallContext,
        method: &str,
        kind: MessageType,
        body: impl FnOnce(&mut dyn ProtocolWriter) -> Result<()>,
    ) -> Result<Bytes> {
        let mut buffer = MemoryOutputBuffer::new(None);
        {
            let mut oprot = self.protocol.writer(&mut buffer);
            oprot.write_response_headers(ctx)?;
            oprot.write_message_begin(method, kind, 0)?;
            body(oprot.as_mut())?;
            oprot.write_message_end()?;
        }
        Ok(buffer.into_bytes())
    }

    /// Write and flush `frame` while holding the write lock
    pub(crate) async fn write_locked(
        &self,
        output: &dyn OutputTransport,
        frame: &[u8],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        output.write(frame)?;
        output.flush().await
    }

    pub(crate) async fn write_exception(
        &self,
        output: &dyn OutputTransport,
        ctx: &CallContext,
        method: &str,
        envelope: &ApplicationException,
    ) -> Result<()> {
        let frame = self.encode_frame(ctx, method, MessageType::Exception, |oprot| {
            envelope.encode(oprot)
        })?;
        self.write_locked(output, &frame).await
    }
}

/// One entry of the dispatch table
#[derive(Clone)]
pub struct Dispatcher {
    method: Method,
    codec: Arc<dyn MethodCodec>,
}

impl Dispatcher {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn InvocationHandler>,
        codec: Arc<dyn MethodCodec>,
        chain: MiddlewareChain,
    ) -> Self {
        Self {
            method: Method::new(name, handler, chain),
            codec,
        }
    }

    pub fn name(&self) -> &str {
        self.method.name()
    }

    pub(crate) fn decode_args(&self, iprot: &mut dyn ProtocolReader) -> Result<Arguments> {
        self.codec.decode_args(iprot)
    }

    /// Run the handler and write its outcome
    pub(crate) async fn dispatch(
        &self,
        write_side: &WriteSide,
        output: &dyn OutputTransport,
        ctx: CallContext,
        arguments: Arguments,
    ) -> Result<()> {
        let method = self.name();
        let outcome = self.method.invoke(ctx.clone(), arguments).await;

        let error = match outcome {
            Ok(reply) => {
                let codec = &self.codec;
                match write_side.encode_frame(&ctx, method, MessageType::Reply, |oprot| {
                    codec.encode_result(reply, oprot)
                }) {
                    Ok(frame) => return write_side.write_locked(output, &frame).await,
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        match error {
            Error::RateLimit(message) => {
                tracing::debug!(method, %message, "Rate limited call");
                let envelope =
                    ApplicationException::new(exception_code::RATE_LIMIT_EXCEEDED, message);
                write_side
                    .write_exception(output, &ctx, method, &envelope)
                    .await
            }
            other => {
                let envelope = ApplicationException::unknown(other.wire_message());
                write_side
                    .write_exception(output, &ctx, method, &envelope)
                    .await?;
                Err(Error::RemoteApplication(envelope))
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("method", &self.method)
            .finish()
    }
}

//! Client invocation engine
//!
//! Turns one method call into a correlated, timeout-bounded exchange:
//!
//! 1. **Register**: a resolver callback is stored under the context's op id
//! 2. **Encode**: request headers, `CALL` header, arguments, bounded by the
//!    transport's request size limit
//! 3. **Send**: the frame goes to the transport
//! 4. **Wait**: the caller suspends until the resolver fires or the
//!    context's timeout elapses
//! 5. **Unregister**: always, whatever the outcome
//!
//! The resolver runs on the transport's receive path. It merges the
//! response headers into the caller's context and decodes either the result
//! struct or the exception envelope, so the waiting caller only ever sees a
//! finished `Result`.
//!
//! # Late replies
//!
//! A timeout does not cancel work on the server. When the reply eventually
//! arrives the registry no longer holds a callback for it and drops it.

use crate::metrics::ClientMetrics;
use bytes::Bytes;
use frpc_core::protocol::{MemoryOutputBuffer, MessageType, ProtocolFactory};
use frpc_core::{
    ApplicationException, CallContext, Error, MethodResult, ResponseCallback, Result, StructValue,
    Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

/// Issues calls over one transport with one wire encoding
#[derive(Clone)]
pub struct InvocationEngine {
    transport: Arc<dyn Transport>,
    protocol: Arc<dyn ProtocolFactory>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl InvocationEngine {
    pub fn new(transport: Arc<dyn Transport>, protocol: Arc<dyn ProtocolFactory>) -> Self {
        Self {
            transport,
            protocol,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Call `method` with `args` and wait for its result
    ///
    /// Response headers sent by the server are merged into `ctx`.
    #[tracing::instrument(
        skip_all,
        fields(method = %method, correlation_id = %ctx.correlation_id(), op_id = ctx.op_id())
    )]
    pub async fn invoke<A, R>(&self, ctx: &CallContext, method: &str, args: A) -> Result<R::Success>
    where
        A: StructValue,
        R: MethodResult,
    {
        let start = std::time::Instant::now();
        let (tx, rx) = oneshot::channel();
        let callback = resolver::<R>(self.protocol.clone(), ctx.clone(), method.to_string(), tx);

        self.transport.register(ctx, callback).await?;
        let guard = UnregisterGuard::new(self.transport.clone(), ctx.clone());

        let deadline = Instant::now() + ctx.timeout();
        let frame = self.encode_call(ctx, method, &args);
        let outcome = match frame {
            Ok(frame) => self.send_and_wait(method, ctx.timeout(), deadline, frame, rx).await,
            Err(e) => Err(e),
        };

        guard.disarm();
        if let Err(e) = self.transport.unregister(ctx).await {
            tracing::warn!(error = %e, "Failed to unregister call");
        }

        if let Some(ref m) = self.metrics {
            let duration = start.elapsed().as_secs_f64();
            match &outcome {
                Ok(_) => m.record_request(method, "success", duration),
                Err(e) => {
                    m.record_request(method, "error", duration);
                    m.record_error(e.label());
                }
            }
        }
        match &outcome {
            Ok(_) => tracing::debug!("Call completed"),
            Err(e) => tracing::debug!(error = %e, "Call failed"),
        }
        outcome
    }

    fn encode_call<A: StructValue>(&self, ctx: &CallContext, method: &str, args: &A) -> Result<Bytes> {
        let mut buffer = MemoryOutputBuffer::new(self.transport.request_size_limit());
        {
            let mut oprot = self.protocol.writer(&mut buffer);
            oprot.write_request_headers(ctx)?;
            oprot.write_message_begin(method, MessageType::Call, 0)?;
            args.encode(oprot.as_mut())?;
            oprot.write_message_end()?;
        }
        buffer.finish()
    }

    async fn send_and_wait<T>(
        &self,
        method: &str,
        timeout: Duration,
        deadline: Instant,
        frame: Bytes,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        let exchange = async {
            self.transport.send(frame).await?;
            tracing::debug!("Request sent, waiting for reply");
            rx.await.map_err(|_| Error::ConnectionClosed)?
        };
        match timeout_at(deadline, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout {
                method: method.to_string(),
                timeout,
            }),
        }
    }
}

/// Build the callback that decodes a reply and completes the pending call
fn resolver<R: MethodResult>(
    protocol: Arc<dyn ProtocolFactory>,
    ctx: CallContext,
    method: String,
    tx: oneshot::Sender<Result<R::Success>>,
) -> ResponseCallback {
    Box::new(move |frame| {
        let outcome = decode_reply::<R>(protocol.as_ref(), frame, &ctx, &method);
        // The caller may already have given up
        let _ = tx.send(outcome);
    })
}

fn decode_reply<R: MethodResult>(
    protocol: &dyn ProtocolFactory,
    frame: Bytes,
    ctx: &CallContext,
    method: &str,
) -> Result<R::Success> {
    let mut iprot = protocol.reader(frame);
    iprot.read_response_headers(ctx)?;
    let header = iprot.read_message_begin()?;
    if header.name != method {
        return Err(Error::Decode(format!(
            "reply for {} received while waiting for {}",
            header.name, method
        )));
    }

    match header.message_type {
        MessageType::Exception => {
            let envelope = ApplicationException::decode(iprot.as_mut())?;
            iprot.read_message_end()?;
            Err(envelope.into_error())
        }
        MessageType::Reply => {
            let result = R::decode(iprot.as_mut())?;
            iprot.read_message_end()?;
            result.into_success(method)
        }
        other => Err(Error::Decode(format!(
            "unexpected {:?} message in reply to {}",
            other, method
        ))),
    }
}

/// Unregisters the call if the invoking future is dropped mid-flight
struct UnregisterGuard {
    pending: Option<(Arc<dyn Transport>, CallContext)>,
}

impl UnregisterGuard {
    fn new(transport: Arc<dyn Transport>, ctx: CallContext) -> Self {
        Self {
            pending: Some((transport, ctx)),
        }
    }

    fn disarm(mut self) {
        self.pending = None;
    }
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        let Some((transport, ctx)) = self.pending.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.unregister(&ctx).await {
                        tracing::warn!(op_id = ctx.op_id(), error = %e, "Failed to unregister cancelled call");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(op_id = ctx.op_id(), "No runtime to unregister cancelled call");
            }
        }
    }
}

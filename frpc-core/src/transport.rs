//! Transport boundary and reply correlation
//!
//! The client engine talks to a [`Transport`]: it registers a callback for a
//! call's op id, sends the request frame, and unregisters when the call is
//! over. Inbound reply frames are routed back to the callback by a
//! [`CorrelationRegistry`], which transport implementations embed.
//!
//! # Reply lifecycle
//!
//! 1. **Register**: callback stored under the context's op id
//! 2. **Send**: request frame handed to the transport
//! 3. **Deliver**: reply frame arrives, its `_opid` header is peeked and the
//!    callback is removed from the registry
//! 4. **Resolve**: the callback runs outside the registry lock
//! 5. **Unregister**: the engine removes the entry on every exit path; a
//!    reply that arrives afterwards finds nothing and is dropped
//!
//! The server side writes replies through an [`OutputTransport`], shared by
//! all in-flight calls of one connection and guarded by the processor's
//! write lock.

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::protocol::headers::peek_op_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Callback resolving one pending call with its raw reply frame
pub type ResponseCallback = Box<dyn FnOnce(Bytes) + Send>;

/// Client side of a duplex connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded request frame
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Route the reply for `ctx` to `callback`
    async fn register(&self, ctx: &CallContext, callback: ResponseCallback) -> Result<()>;

    /// Forget the pending call for `ctx`; a no-op when nothing is registered
    async fn unregister(&self, ctx: &CallContext) -> Result<()>;

    /// Largest request frame this transport accepts
    fn request_size_limit(&self) -> Option<usize> {
        None
    }
}

/// Op id → pending callback map
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    pending: Arc<Mutex<HashMap<u64, ResponseCallback>>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the callback for `ctx`
    ///
    /// Fails with [`Error::AlreadyRegistered`] when a call with the same op
    /// id is still pending; that entry stays in place.
    pub async fn register(&self, ctx: &CallContext, callback: ResponseCallback) -> Result<()> {
        match self.pending.lock().await.entry(ctx.op_id()) {
            Entry::Occupied(_) => {
                tracing::warn!(op_id = ctx.op_id(), "Context already registered");
                Err(Error::AlreadyRegistered(ctx.op_id()))
            }
            Entry::Vacant(slot) => {
                slot.insert(callback);
                Ok(())
            }
        }
    }

    pub async fn unregister(&self, ctx: &CallContext) {
        self.pending.lock().await.remove(&ctx.op_id());
    }

    /// Route a reply frame to its pending call
    ///
    /// Returns `Ok(false)` when no call is waiting for it (late reply after a
    /// timeout, or a duplicate). A frame without a readable `_opid` is a
    /// decode error.
    pub async fn deliver(&self, frame: Bytes) -> Result<bool> {
        let op_id = peek_op_id(&frame)?;
        let callback = self.pending.lock().await.remove(&op_id);
        match callback {
            Some(callback) => {
                callback(frame);
                Ok(true)
            }
            None => {
                tracing::debug!(op_id, "Dropping reply with no pending call");
                Ok(false)
            }
        }
    }

    /// Drop every pending callback; waiting callers observe a closed channel
    pub async fn clear(&self) {
        let dropped = {
            let mut pending = self.pending.lock().await;
            pending.drain().count()
        };
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared pending calls");
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Server side output shared by every in-flight call on a connection
///
/// Writes accumulate until `flush`, which emits them as one frame.
#[async_trait]
pub trait OutputTransport: Send + Sync {
    fn write(&self, buf: &[u8]) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

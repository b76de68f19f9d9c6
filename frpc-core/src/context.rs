//! Per-call context
//!
//! A [`CallContext`] travels with one invocation: the caller fills in request
//! headers (correlation id, op id, timeout and any user headers), the server
//! rebuilds it from the decoded header block, and handlers may attach
//! response headers that flow back to the caller.

use crate::error::Result;
use crate::protocol::headers::{
    is_reserved, parse_op_id, CORRELATION_ID_HEADER, OP_ID_HEADER, TIMEOUT_HEADER,
};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Timeout applied when the caller sets none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Headers and deadline of one call
///
/// Cloning is cheap; clones share the response-header map, so headers added
/// by a handler are visible through every clone.
///
/// # Examples
///
/// ```rust
/// use frpc_core::CallContext;
/// use std::time::Duration;
///
/// let ctx = CallContext::new()
///     .with_correlation_id("req-42")
///     .with_timeout(Duration::from_millis(250))
///     .with_request_header("tenant", "acme");
///
/// assert_eq!(ctx.correlation_id(), "req-42");
/// assert_eq!(ctx.timeout(), Duration::from_millis(250));
/// assert_eq!(ctx.request_header("_timeout"), Some("250"));
/// ```
#[derive(Debug, Clone)]
pub struct CallContext {
    op_id: u64,
    timeout: Duration,
    request_headers: IndexMap<String, String>,
    response_headers: Arc<Mutex<IndexMap<String, String>>>,
}

impl CallContext {
    /// Fresh context with a random correlation id and a new op id
    pub fn new() -> Self {
        let op_id = NEXT_OP_ID.fetch_add(1, Ordering::Relaxed);
        let mut request_headers = IndexMap::new();
        request_headers.insert(OP_ID_HEADER.to_string(), op_id.to_string());
        request_headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            Uuid::new_v4().simple().to_string(),
        );
        request_headers.insert(
            TIMEOUT_HEADER.to_string(),
            DEFAULT_TIMEOUT.as_millis().to_string(),
        );
        Self {
            op_id,
            timeout: DEFAULT_TIMEOUT,
            request_headers,
            response_headers: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Rebuild a context from a decoded request header block
    pub fn from_request_headers(mut headers: IndexMap<String, String>) -> Result<Self> {
        let op_id = parse_op_id(&headers)?;
        let timeout = headers
            .get(TIMEOUT_HEADER)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        if !headers.contains_key(CORRELATION_ID_HEADER) {
            headers.insert(
                CORRELATION_ID_HEADER.to_string(),
                Uuid::new_v4().simple().to_string(),
            );
        }
        Ok(Self {
            op_id,
            timeout,
            request_headers: headers,
            response_headers: Arc::new(Mutex::new(IndexMap::new())),
        })
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.request_headers
            .insert(CORRELATION_ID_HEADER.to_string(), correlation_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.request_headers
            .insert(TIMEOUT_HEADER.to_string(), timeout.as_millis().to_string());
        self
    }

    /// Add a user request header; reserved names are ignored
    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if is_reserved(&name) {
            tracing::warn!(header = %name, "Ignoring attempt to set reserved request header");
            return self;
        }
        self.request_headers.insert(name, value.into());
        self
    }

    /// Token correlating this call's reply on its connection
    pub fn op_id(&self) -> u64 {
        self.op_id
    }

    pub fn correlation_id(&self) -> &str {
        self.request_headers
            .get(CORRELATION_ID_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.get(name).map(String::as_str)
    }

    pub fn request_headers(&self) -> &IndexMap<String, String> {
        &self.request_headers
    }

    /// Attach a header to the reply of this call
    pub fn add_response_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock_response_headers().insert(name.into(), value.into());
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.lock_response_headers().get(name).cloned()
    }

    /// Snapshot of the response headers
    pub fn response_headers(&self) -> IndexMap<String, String> {
        self.lock_response_headers().clone()
    }

    /// Response header block written by the server: op id, correlation id,
    /// then whatever the handler added
    pub fn outbound_response_headers(&self) -> IndexMap<String, String> {
        let mut headers = IndexMap::new();
        headers.insert(OP_ID_HEADER.to_string(), self.op_id.to_string());
        headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            self.correlation_id().to_string(),
        );
        for (name, value) in self.lock_response_headers().iter() {
            if !is_reserved(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }

    /// Merge a decoded response header block; the op id is not copied
    pub fn merge_response_headers(&self, headers: IndexMap<String, String>) {
        let mut current = self.lock_response_headers();
        for (name, value) in headers {
            if name != OP_ID_HEADER {
                current.insert(name, value);
            }
        }
    }

    fn lock_response_headers(&self) -> MutexGuard<'_, IndexMap<String, String>> {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_new_contexts_are_unique() {
        let a = CallContext::new();
        let b = CallContext::new();
        assert_ne!(a.op_id(), b.op_id());
        assert_ne!(a.correlation_id(), b.correlation_id());
        assert_eq!(a.correlation_id().len(), 32);
        assert_eq!(a.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(a.request_header(OP_ID_HEADER), Some(a.op_id().to_string().as_str()));
    }

    #[test]
    fn test_reserved_request_headers_ignored() {
        let ctx = CallContext::new();
        let op_id = ctx.op_id();
        let ctx = ctx
            .with_request_header("_opid", "999")
            .with_request_header("foo", "bar");
        assert_eq!(ctx.op_id(), op_id);
        assert_eq!(ctx.request_header("_opid"), Some(op_id.to_string().as_str()));
        assert_eq!(ctx.request_header("foo"), Some("bar"));
    }

    #[test]
    fn test_from_request_headers() {
        let mut headers = IndexMap::new();
        headers.insert("_opid".to_string(), "17".to_string());
        headers.insert("_cid".to_string(), "abc".to_string());
        headers.insert("_timeout".to_string(), "1500".to_string());
        headers.insert("tenant".to_string(), "acme".to_string());

        let ctx = CallContext::from_request_headers(headers).unwrap();
        assert_eq!(ctx.op_id(), 17);
        assert_eq!(ctx.correlation_id(), "abc");
        assert_eq!(ctx.timeout(), Duration::from_millis(1500));
        assert_eq!(ctx.request_header("tenant"), Some("acme"));
    }

    #[test]
    fn test_from_request_headers_defaults_and_errors() {
        let mut headers = IndexMap::new();
        headers.insert("_opid".to_string(), "3".to_string());
        let ctx = CallContext::from_request_headers(headers).unwrap();
        assert_eq!(ctx.timeout(), DEFAULT_TIMEOUT);
        assert!(!ctx.correlation_id().is_empty());

        let missing = CallContext::from_request_headers(IndexMap::new());
        assert!(matches!(missing, Err(Error::Decode(_))));
    }

    #[test]
    fn test_response_headers_shared_between_clones() {
        let ctx = CallContext::new().with_correlation_id("cid-1");
        let handler_view = ctx.clone();
        handler_view.add_response_header("foo", "bar");
        handler_view.add_response_header("_opid", "spoofed");

        assert_eq!(ctx.response_header("foo").as_deref(), Some("bar"));

        let outbound = ctx.outbound_response_headers();
        let keys: Vec<&str> = outbound.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_opid", "_cid", "foo"]);
        assert_eq!(outbound["_opid"], ctx.op_id().to_string());
        assert_eq!(outbound["_cid"], "cid-1");
    }

    #[test]
    fn test_merge_skips_op_id() {
        let ctx = CallContext::new();
        let mut headers = IndexMap::new();
        headers.insert("_opid".to_string(), "123456".to_string());
        headers.insert("foo".to_string(), "bar".to_string());
        ctx.merge_response_headers(headers);

        assert_eq!(ctx.response_header("foo").as_deref(), Some("bar"));
        assert_eq!(ctx.response_header("_opid"), None);
    }
}

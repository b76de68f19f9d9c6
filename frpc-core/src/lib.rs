//! Core building blocks for frpc
//!
//! frpc is a bidirectional RPC engine: a client turns a method call into a
//! correlated, timeout-bounded request/response exchange over a duplex
//! transport, and a server dispatches inbound calls to handlers and writes
//! correlated replies. This crate holds what both sides share:
//!
//! - **context**: per-call headers, correlation id, op id and timeout
//! - **protocol**: header block, strict binary message codec, skipping of
//!   unknown fields
//! - **value**: traits implemented by argument and result structs
//! - **middleware**: the interceptor chain wrapped around every method
//! - **transport**: the client transport boundary, reply correlation and the
//!   server-side shared output
//! - **error**: the error taxonomy and the exception envelope
//! - **observability**: tracing and OpenTelemetry setup
//!
//! # Frame layout
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬──────────────┐
//! │ header block │ message header (name, kind)  │ struct body  │
//! └──────────────┴──────────────────────────────┴──────────────┘
//! ```
//!
//! The `frpc-client` and `frpc-server` crates build the engines and a
//! WebSocket transport on top of these pieces.

pub mod context;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod protocol;
pub mod transport;
pub mod value;

pub use context::CallContext;
pub use error::{ApplicationException, Error, ExceptionKind, Result};
pub use middleware::{
    Arguments, Invocation, InvocationHandler, LoggingMiddleware, Method, MetricsMiddleware,
    Middleware, MiddlewareChain, Next, Reply, SyncMiddleware, TracingMiddleware,
};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use protocol::{
    BinaryProtocolFactory, MessageType, ProtocolFactory, ProtocolReader, ProtocolWriter, TType,
};
pub use transport::{CorrelationRegistry, OutputTransport, ResponseCallback, Transport};
pub use value::{MethodResult, StructValue};

//! frpc client
//!
//! Issues correlated, timeout-bounded calls over a duplex transport:
//!
//! - **InvocationEngine**: register → encode → send → wait → unregister for
//!   one call, with exception envelopes mapped onto `frpc_core::Error`
//! - **Client**: a service's declared methods, each wrapped in middleware
//! - **WsTransport**: binary WebSocket transport with reply correlation
//! - **Observability**: OpenTelemetry metrics for calls and the connection
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use frpc_client::ClientBuilder;
//! use frpc_core::CallContext;
//! use std::time::Duration;
//!
//! let client = ClientBuilder::new()
//!     .method::<BlahArgs, BlahResult>("blah")
//!     .connect("ws://localhost:9090")
//!     .await?;
//!
//! let ctx = CallContext::new()
//!     .with_timeout(Duration::from_secs(1))
//!     .with_request_header("tenant", "acme");
//! let n: i64 = client.call(&ctx, "blah", BlahArgs { num: 42 }).await?;
//! println!("blah returned {}, server said foo={:?}", n, ctx.response_header("foo"));
//! ```

mod client;
mod client_builder;
mod engine;
mod metrics;
mod transport;

pub use client::Client;
pub use client_builder::ClientBuilder;
pub use engine::InvocationEngine;
pub use metrics::ClientMetrics;
pub use transport::WsTransport;

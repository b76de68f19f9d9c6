//! frpc - correlated RPC over a duplex transport
//!
//! This is the main convenience crate that re-exports all frpc sub-crates.
//! Use this crate if you want a single dependency that provides both client
//! and server functionality.
//!
//! # Architecture
//!
//! frpc is organized into modular crates:
//!
//! - **frpc-core**: Call context, wire protocol, middleware, error taxonomy, observability
//! - **frpc-server**: Processor (dispatch table) and WebSocket server
//! - **frpc-client**: Invocation engine, declared-method client and WebSocket transport
//!
//! # Quick Start - Server
//!
//! ```rust,ignore
//! use frpc::{FrpcServer, Processor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = Processor::builder()
//!         .method::<BlahArgs, BlahResult, _, _>("blah", |_, args| async move {
//!             Ok(i64::from(args.num) * 2)
//!         })
//!         .build();
//!
//!     let server = FrpcServer::builder()
//!         .bind_str("127.0.0.1:9090")?
//!         .processor(processor)
//!         .build()
//!         .await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Quick Start - Client
//!
//! ```rust,ignore
//! use frpc::{CallContext, ClientBuilder};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new()
//!         .method::<BlahArgs, BlahResult>("blah")
//!         .connect("ws://localhost:9090")
//!         .await?;
//!
//!     let ctx = CallContext::new().with_timeout(Duration::from_millis(500));
//!     let n: i64 = client.call(&ctx, "blah", BlahArgs { num: 21 }).await?;
//!     println!("Result: {}", n);
//!     Ok(())
//! }
//! ```

pub use frpc_client as client;
pub use frpc_core as core;
pub use frpc_server as server;

pub use frpc_client::{Client, ClientBuilder};
pub use frpc_core::{CallContext, Error, Result};
pub use frpc_server::{FrpcServer, Processor};

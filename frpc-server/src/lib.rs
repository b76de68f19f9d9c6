//! frpc server over WebSocket
//!
//! This crate serves frpc calls: it decodes each inbound `CALL` frame, runs
//! the matching handler under its middleware chain and writes a correlated
//! `REPLY` or `EXCEPTION` frame back on the same connection.
//!
//! # Core Features
//!
//! - **Dispatch table**: [`Processor`] maps method names to dispatchers
//! - **Typed handlers**: `async fn(CallContext, Args) -> Result<Success>`
//! - **Middleware**: processor-wide and per-method interceptors
//! - **Shared write lock**: concurrent calls never interleave partial writes
//! - **Exception taxonomy**: rate-limit exceptions round-trip as such, any
//!   other failure becomes a generic exception
//! - **Observability**: OpenTelemetry integration for traces and metrics
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use frpc_server::{FrpcServer, Processor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = Processor::builder()
//!         .method::<BlahArgs, BlahResult, _, _>("blah", |ctx, args| async move {
//!             ctx.add_response_header("foo", "bar");
//!             Ok(i64::from(args.num) * 2)
//!         })
//!         .build();
//!
//!     let server = FrpcServer::builder()
//!         .bind_str("127.0.0.1:9090")?
//!         .processor(processor)
//!         .build()
//!         .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! Each connection runs in its own task:
//!
//! - **Main task**: Accepts incoming TCP connections
//! - **Connection tasks**: Upgrade to WebSocket and prepare frames in order
//! - **Call tasks**: Every prepared call runs concurrently and writes its
//!   response under the processor's write lock

mod builder;
mod connection;
mod dispatcher;
mod metrics;
mod output;
mod processor;

pub use builder::ServerBuilder;
pub use dispatcher::{typed_codec, typed_handler, Dispatcher, MethodCodec};
pub use metrics::ServerMetrics;
pub use output::ConnectionOutput;
pub use processor::{Dispatch, Processor, ProcessorBuilder};

use frpc_core::Result;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// frpc server over WebSocket
///
/// # Lifecycle
///
/// 1. **Build**: Create server using `FrpcServer::builder()`
/// 2. **Run**: Call `server.run().await` to start accepting connections
/// 3. **Shutdown**: Drop the `run` future
pub struct FrpcServer {
    listener: TcpListener,
    processor: Processor,
    metrics: Option<Arc<ServerMetrics>>,
}

impl FrpcServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Run the server and accept connections
    ///
    /// Each accepted connection is handled in its own Tokio task. Runs until
    /// accepting fails.
    #[tracing::instrument(skip(self), name = "server.run")]
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting frpc server");
        let conn_counter = AtomicU64::new(0);
        let active = Arc::new(AtomicI64::new(0));

        loop {
            let (stream, addr) = self.listener.accept().await?;
            let conn_id = conn_counter.fetch_add(1, Ordering::SeqCst);
            let processor = self.processor.clone();
            let metrics = self.metrics.clone();
            let active = active.clone();

            tracing::info!(conn_id = conn_id, addr = %addr, "New connection accepted");
            let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(ref m) = metrics {
                m.record_connection(now_active);
            }

            tokio::spawn(async move {
                if let Err(e) =
                    connection::handle_connection(stream, conn_id, processor, metrics.clone()).await
                {
                    tracing::error!(conn_id = conn_id, error = %e, "Connection error");
                }
                let now_active = active.fetch_sub(1, Ordering::SeqCst) - 1;
                if let Some(ref m) = metrics {
                    m.record_disconnection(now_active);
                }
            });
        }
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }
}

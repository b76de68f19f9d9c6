//! WebSocket connection handling for the frpc server
//!
//! This module handles the lifecycle of individual WebSocket connections,
//! from TCP accept to WebSocket upgrade to frame processing and cleanup.
//!
//! # Connection Lifecycle
//!
//! 1. **Upgrade**: Upgrade the accepted TCP stream to WebSocket
//! 2. **Process**: Prepare each binary frame in arrival order and spawn its run
//! 3. **Close**: On a fatal error or peer close, send a close frame and stop
//!
//! # Task Model
//!
//! Each connection has a send task that writes outgoing messages from a
//! channel, fed by the connection's [`ConnectionOutput`]. Frames are
//! prepared on the receive loop; every call then runs on its own task, so a
//! slow handler never holds up the calls behind it.
//!
//! # Error Handling
//!
//! - Undecodable frames and calls to unknown methods close the connection
//! - Re-raised handler failures are logged and counted; the connection
//!   stays open

use crate::output::ConnectionOutput;
use crate::processor::Processor;
use crate::ServerMetrics;
use bytes::Bytes;
use frpc_core::{Error, OutputTransport, Result};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

/// How long queued responses may take to drain once the connection closes
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Handle a single WebSocket connection
#[tracing::instrument(skip(stream, processor, metrics), fields(conn_id = conn_id))]
pub async fn handle_connection(
    stream: TcpStream,
    conn_id: u64,
    processor: Processor,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    tracing::debug!("Upgrading connection to WebSocket");
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let output: Arc<dyn OutputTransport> = Arc::new(ConnectionOutput::new(tx.clone()));

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                if !closing {
                    tracing::error!(error = %e, "Error sending message");
                }
                break;
            }
            if closing {
                break;
            }
        }
    });

    let outcome = tokio::select! {
        _ = &mut send_task => Ok(()),
        outcome = receive_loop(&mut ws_receiver, &processor, &output, &metrics) => outcome,
    };

    if !send_task.is_finished() {
        let _ = tx.send(Message::Close(None));
        if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
            send_task.abort();
        }
    }

    tracing::info!("Connection closed");
    outcome
}

/// Read frames until the peer goes away or a fatal error occurs
async fn receive_loop(
    ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
    processor: &Processor,
    output: &Arc<dyn OutputTransport>,
    metrics: &Option<Arc<ServerMetrics>>,
) -> Result<()> {
    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                let dispatch = match processor.prepare(Bytes::from(data)) {
                    Ok(dispatch) => dispatch,
                    Err(e) => {
                        if let Some(ref m) = metrics {
                            m.record_error(e.label());
                        }
                        return Err(e);
                    }
                };

                if dispatch.is_unknown() {
                    let start = Instant::now();
                    let method = dispatch.method().to_string();
                    let result = dispatch.run(output.as_ref()).await;
                    record(metrics, &method, start, &result);
                    return result;
                }

                let output = output.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let start = Instant::now();
                    let method = dispatch.method().to_string();
                    let result = dispatch.run(output.as_ref()).await;
                    record(&metrics, &method, start, &result);
                    if let Err(e) = result {
                        tracing::error!(method = %method, error = %e, "Call failed");
                    }
                });
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Connection closed by client");
                return Ok(());
            }
            Ok(Message::Text(_)) => {
                tracing::warn!("Ignoring text message");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                if let Some(ref m) = metrics {
                    m.record_error("websocket");
                }
                return Err(Error::WebSocket(e.to_string()));
            }
        }
    }
    Ok(())
}

fn record(
    metrics: &Option<Arc<ServerMetrics>>,
    method: &str,
    start: Instant,
    result: &Result<()>,
) {
    if let Some(ref m) = metrics {
        let status = if result.is_ok() { "success" } else { "error" };
        m.record_request(method, status, start.elapsed().as_secs_f64());
        if let Err(e) = result {
            m.record_error(e.label());
        }
    }
}

//! WebSocket client transport
//!
//! Every frame travels as one binary WebSocket message. Sends go through a
//! mutex around the sink half of the stream; a background task owns the
//! stream half and hands each inbound frame to the correlation registry.
//! When the connection ends the registry is cleared, so every pending call
//! fails with `ConnectionClosed` instead of waiting for its timeout.

use crate::metrics::ClientMetrics;
use async_trait::async_trait;
use bytes::Bytes;
use frpc_core::{CallContext, CorrelationRegistry, Error, ResponseCallback, Result, Transport};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Duplex client transport over a WebSocket connection
#[derive(Clone)]
pub struct WsTransport {
    sender: Arc<Mutex<SplitSink<WsStream, Message>>>,
    registry: CorrelationRegistry,
    closed: Arc<AtomicBool>,
    request_size_limit: Option<usize>,
}

impl WsTransport {
    /// Connect to `url` and start the receive task
    pub async fn connect(url: &str, request_size_limit: Option<usize>) -> Result<Self> {
        Self::connect_with_metrics(url, request_size_limit, None).await
    }

    #[tracing::instrument(skip(url, metrics), fields(url = url))]
    pub(crate) async fn connect_with_metrics(
        url: &str,
        request_size_limit: Option<usize>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Result<Self> {
        tracing::info!("Connecting to server");
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (sender, receiver) = ws_stream.split();

        let transport = Self {
            sender: Arc::new(Mutex::new(sender)),
            registry: CorrelationRegistry::new(),
            closed: Arc::new(AtomicBool::new(false)),
            request_size_limit,
        };

        if let Some(ref m) = metrics {
            m.update_connection_state(1);
        }
        tracing::info!("Connected successfully");

        tokio::spawn(Self::receive_loop(
            receiver,
            transport.registry.clone(),
            transport.closed.clone(),
            metrics,
        ));

        Ok(transport)
    }

    /// Whether the receive task is still running
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Number of calls waiting for a reply
    pub async fn pending_calls(&self) -> usize {
        self.registry.pending_count().await
    }

    /// Send a close frame; pending calls fail once the server acknowledges
    pub async fn close(&self) -> Result<()> {
        self.sender
            .lock()
            .await
            .close()
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn receive_loop(
        mut receiver: SplitStream<WsStream>,
        registry: CorrelationRegistry,
        closed: Arc<AtomicBool>,
        metrics: Option<Arc<ClientMetrics>>,
    ) {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Binary(data)) => match registry.deliver(Bytes::from(data)).await {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Some(ref m) = metrics {
                            m.record_late_reply();
                        }
                    }
                    Err(e) => {
                        // Without a readable op id the stream cannot be trusted
                        tracing::error!(error = %e, "Undecodable reply frame, closing connection");
                        if let Some(ref m) = metrics {
                            m.record_error(e.label());
                        }
                        break;
                    }
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("Connection closed by server");
                    break;
                }
                Ok(Message::Text(_)) => {
                    tracing::warn!("Ignoring text message");
                }
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket error");
                    if let Some(ref m) = metrics {
                        m.record_error("connection");
                    }
                    break;
                }
                _ => {}
            }
        }

        closed.store(true, Ordering::Release);
        registry.clear().await;
        if let Some(ref m) = metrics {
            m.update_connection_state(0);
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::ConnectionClosed);
        }
        self.sender
            .lock()
            .await
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn register(&self, ctx: &CallContext, callback: ResponseCallback) -> Result<()> {
        self.registry.register(ctx, callback).await?;
        // Closed while registering: the clear may already have run
        if !self.is_connected() {
            self.registry.unregister(ctx).await;
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    async fn unregister(&self, ctx: &CallContext) -> Result<()> {
        self.registry.unregister(ctx).await;
        Ok(())
    }

    fn request_size_limit(&self) -> Option<usize> {
        self.request_size_limit
    }
}

//! Per-connection output
//!
//! `ConnectionOutput` is the [`OutputTransport`] every in-flight call of a
//! connection writes its response through. Writes are buffered; `flush`
//! hands the buffer to the connection's send task as one binary WebSocket
//! message.

use async_trait::async_trait;
use bytes::BytesMut;
use frpc_core::{Error, OutputTransport, Result};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub struct ConnectionOutput {
    buffer: Mutex<BytesMut>,
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionOutput {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            buffer: Mutex::new(BytesMut::new()),
            tx,
        }
    }

    fn take(&self) -> Result<BytesMut> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| Error::Internal("output buffer poisoned".to_string()))?;
        Ok(buffer.split())
    }
}

#[async_trait]
impl OutputTransport for ConnectionOutput {
    fn write(&self, buf: &[u8]) -> Result<()> {
        self.buffer
            .lock()
            .map_err(|_| Error::Internal("output buffer poisoned".to_string()))?
            .extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let frame = self.take()?;
        if frame.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Message::Binary(frame.to_vec()))
            .map_err(|_| Error::ConnectionClosed)
    }
}

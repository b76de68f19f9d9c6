use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};

/// Destination for encoded bytes
pub trait ByteSink: Send {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;
}

impl ByteSink for BytesMut {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

/// In-memory buffer a client encodes one request frame into
///
/// The optional limit mirrors the transport's request size limit and is
/// checked once the frame is complete.
#[derive(Debug, Default)]
pub struct MemoryOutputBuffer {
    buf: BytesMut,
    limit: Option<usize>,
}

impl MemoryOutputBuffer {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the frame, failing with `RequestTooLarge` when over the limit
    pub fn finish(self) -> Result<Bytes> {
        if let Some(limit) = self.limit {
            if self.buf.len() > limit {
                return Err(Error::RequestTooLarge {
                    limit,
                    actual: self.buf.len(),
                });
            }
        }
        Ok(self.buf.freeze())
    }

    /// Take the frame without checking the limit
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl ByteSink for MemoryOutputBuffer {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }
}

//! Header block preceding every message
//!
//! ```text
//! version: u8 (0x00) | size: u32 | (name_len: u32, name, value_len: u32, value)*
//! ```
//!
//! All integers are big-endian; `size` counts the bytes of the pairs.

use super::buffer::ByteSink;
use crate::error::{Error, Result};
use bytes::{Buf, Bytes};
use indexmap::IndexMap;

/// Header block version written and accepted
pub const HEADER_VERSION: u8 = 0x00;

/// Per-connection-unique operation id used for reply correlation
pub const OP_ID_HEADER: &str = "_opid";
/// Caller-chosen correlation id carried end-to-end for tracing
pub const CORRELATION_ID_HEADER: &str = "_cid";
/// Call timeout in milliseconds
pub const TIMEOUT_HEADER: &str = "_timeout";

/// Whether `name` is managed by the framework rather than user code
pub fn is_reserved(name: &str) -> bool {
    matches!(name, OP_ID_HEADER | CORRELATION_ID_HEADER | TIMEOUT_HEADER)
}

/// Append an encoded header block to `sink`
pub fn encode(headers: &IndexMap<String, String>, sink: &mut dyn ByteSink) -> Result<()> {
    let size: usize = headers.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let size = u32::try_from(size)
        .map_err(|_| Error::Internal(format!("header block of {} bytes is too large", size)))?;

    sink.write_bytes(&[HEADER_VERSION])?;
    sink.write_bytes(&size.to_be_bytes())?;
    for (name, value) in headers {
        write_entry(sink, name)?;
        write_entry(sink, value)?;
    }
    Ok(())
}

fn write_entry(sink: &mut dyn ByteSink, entry: &str) -> Result<()> {
    // Fits: the whole block was bounded to u32 above
    sink.write_bytes(&(entry.len() as u32).to_be_bytes())?;
    sink.write_bytes(entry.as_bytes())
}

/// Consume a header block from the front of `buf`
pub fn decode(buf: &mut Bytes) -> Result<IndexMap<String, String>> {
    if buf.remaining() < 5 {
        return Err(Error::Decode("frame too short for header block".to_string()));
    }
    let version = buf.get_u8();
    if version != HEADER_VERSION {
        return Err(Error::Decode(format!(
            "unsupported header version {}",
            version
        )));
    }
    let size = buf.get_u32() as usize;
    if buf.remaining() < size {
        return Err(Error::Decode(format!(
            "header block claims {} bytes, {} available",
            size,
            buf.remaining()
        )));
    }

    let mut block = buf.split_to(size);
    let mut headers = IndexMap::new();
    while block.has_remaining() {
        let name = read_entry(&mut block)?;
        let value = read_entry(&mut block)?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn read_entry(block: &mut Bytes) -> Result<String> {
    if block.remaining() < 4 {
        return Err(Error::Decode("truncated header entry".to_string()));
    }
    let len = block.get_u32() as usize;
    if block.remaining() < len {
        return Err(Error::Decode("truncated header entry".to_string()));
    }
    let raw = block.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| Error::Decode(format!("header is not UTF-8: {}", e)))
}

/// Parse the operation id of an encoded frame without consuming it
pub fn peek_op_id(frame: &Bytes) -> Result<u64> {
    let headers = decode(&mut frame.clone())?;
    parse_op_id(&headers)
}

/// Parse the `_opid` header
pub fn parse_op_id(headers: &IndexMap<String, String>) -> Result<u64> {
    let raw = headers
        .get(OP_ID_HEADER)
        .ok_or_else(|| Error::Decode(format!("frame has no {} header", OP_ID_HEADER)))?;
    raw.parse()
        .map_err(|_| Error::Decode(format!("invalid {} header: {:?}", OP_ID_HEADER, raw)))
}

//! Wire codec boundary
//!
//! A frame on the wire is a header block followed by one message:
//!
//! ```text
//! BEGIN → headers → (name, kind, sequence) → BODY(fields)* → STOP → END
//! ```
//!
//! The [`ProtocolReader`] and [`ProtocolWriter`] traits are the capability set
//! the engines work against; [`BinaryProtocolFactory`] provides the strict
//! binary encoding. Readers consume struct bodies as `(type, id)` field
//! headers until a stop marker; fields a decoder does not know are passed to
//! [`skip`], which consumes exactly their encoded bytes. That is the
//! forward-compatibility contract for adding fields to existing arguments and
//! results.

mod binary;
mod buffer;
pub mod headers;

pub use binary::{BinaryProtocolFactory, BinaryProtocolReader, BinaryProtocolWriter};
pub use buffer::{ByteSink, MemoryOutputBuffer};

use crate::context::CallContext;
use crate::error::{Error, Result};
use bytes::Bytes;
use indexmap::IndexMap;

/// Containers nested deeper than this are rejected by [`skip`]
pub const MAX_SKIP_DEPTH: usize = 64;

/// Wire type of a field or container element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TType {
    Stop,
    Void,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

impl TType {
    /// Type id as written on the wire
    pub fn as_u8(self) -> u8 {
        match self {
            TType::Stop => 0,
            TType::Void => 1,
            TType::Bool => 2,
            TType::Byte => 3,
            TType::Double => 4,
            TType::I16 => 6,
            TType::I32 => 8,
            TType::I64 => 10,
            TType::String => 11,
            TType::Struct => 12,
            TType::Map => 13,
            TType::Set => 14,
            TType::List => 15,
        }
    }

    /// Parse a wire type id
    pub fn from_u8(id: u8) -> Result<Self> {
        Ok(match id {
            0 => TType::Stop,
            1 => TType::Void,
            2 => TType::Bool,
            3 => TType::Byte,
            4 => TType::Double,
            6 => TType::I16,
            8 => TType::I32,
            10 => TType::I64,
            11 => TType::String,
            12 => TType::Struct,
            13 => TType::Map,
            14 => TType::Set,
            15 => TType::List,
            other => return Err(Error::Decode(format!("unknown type id {}", other))),
        })
    }
}

/// Kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Call => 1,
            MessageType::Reply => 2,
            MessageType::Exception => 3,
            MessageType::Oneway => 4,
        }
    }

    pub fn from_u8(id: u8) -> Result<Self> {
        match id {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(Error::Decode(format!("unknown message type {}", other))),
        }
    }
}

/// Decoded message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub sequence: i32,
}

/// Decoded field header; `field_type` is [`TType::Stop`] at the end of a struct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub field_type: TType,
    pub id: i16,
}

/// Decoded map header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    pub key_type: TType,
    pub value_type: TType,
    pub size: usize,
}

/// Decoded list or set header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub element_type: TType,
    pub size: usize,
}

/// Reading half of the codec boundary, bound to one inbound frame
pub trait ProtocolReader: Send {
    /// Read the header block that precedes every message
    fn read_headers(&mut self) -> Result<IndexMap<String, String>>;

    fn read_message_begin(&mut self) -> Result<MessageHeader>;
    fn read_message_end(&mut self) -> Result<()>;
    fn read_struct_begin(&mut self) -> Result<()>;
    fn read_struct_end(&mut self) -> Result<()>;
    fn read_field_begin(&mut self) -> Result<FieldHeader>;
    fn read_field_end(&mut self) -> Result<()>;
    fn read_map_begin(&mut self) -> Result<MapHeader>;
    fn read_map_end(&mut self) -> Result<()>;
    fn read_list_begin(&mut self) -> Result<ListHeader>;
    fn read_list_end(&mut self) -> Result<()>;
    fn read_set_begin(&mut self) -> Result<ListHeader>;
    fn read_set_end(&mut self) -> Result<()>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<i8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_binary(&mut self) -> Result<Bytes>;

    /// Read the request header block into a fresh server-side context
    fn read_request_headers(&mut self) -> Result<CallContext> {
        let headers = self.read_headers()?;
        CallContext::from_request_headers(headers)
    }

    /// Read the response header block, merging it into the caller's context
    fn read_response_headers(&mut self, ctx: &CallContext) -> Result<()> {
        let headers = self.read_headers()?;
        ctx.merge_response_headers(headers);
        Ok(())
    }
}

/// Writing half of the codec boundary
pub trait ProtocolWriter: Send {
    /// Write the header block that precedes every message
    fn write_headers(&mut self, headers: &IndexMap<String, String>) -> Result<()>;

    fn write_message_begin(
        &mut self,
        name: &str,
        message_type: MessageType,
        sequence: i32,
    ) -> Result<()>;
    fn write_message_end(&mut self) -> Result<()>;
    fn write_struct_begin(&mut self, name: &str) -> Result<()>;
    fn write_struct_end(&mut self) -> Result<()>;
    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()>;
    fn write_field_end(&mut self) -> Result<()>;
    fn write_field_stop(&mut self) -> Result<()>;
    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()>;
    fn write_map_end(&mut self) -> Result<()>;
    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()>;
    fn write_list_end(&mut self) -> Result<()>;
    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()>;
    fn write_set_end(&mut self) -> Result<()>;
    fn write_bool(&mut self, value: bool) -> Result<()>;
    fn write_byte(&mut self, value: i8) -> Result<()>;
    fn write_i16(&mut self, value: i16) -> Result<()>;
    fn write_i32(&mut self, value: i32) -> Result<()>;
    fn write_i64(&mut self, value: i64) -> Result<()>;
    fn write_double(&mut self, value: f64) -> Result<()>;
    fn write_string(&mut self, value: &str) -> Result<()>;
    fn write_binary(&mut self, value: &[u8]) -> Result<()>;

    fn write_request_headers(&mut self, ctx: &CallContext) -> Result<()> {
        self.write_headers(ctx.request_headers())
    }

    fn write_response_headers(&mut self, ctx: &CallContext) -> Result<()> {
        self.write_headers(&ctx.outbound_response_headers())
    }
}

/// Pluggable wire encoding
pub trait ProtocolFactory: Send + Sync {
    /// Reader over one inbound frame
    fn reader(&self, frame: Bytes) -> Box<dyn ProtocolReader>;

    /// Writer appending to `sink`
    fn writer<'a>(&self, sink: &'a mut dyn ByteSink) -> Box<dyn ProtocolWriter + 'a>;
}

/// Consume one encoded value of type `ttype` without interpreting it
pub fn skip(iprot: &mut dyn ProtocolReader, ttype: TType) -> Result<()> {
    skip_nested(iprot, ttype, MAX_SKIP_DEPTH)
}

fn skip_nested(iprot: &mut dyn ProtocolReader, ttype: TType, depth: usize) -> Result<()> {
    if depth == 0 {
        return Err(Error::Decode("maximum skip depth exceeded".to_string()));
    }
    match ttype {
        TType::Stop | TType::Void => {
            return Err(Error::Decode(format!("cannot skip value of type {:?}", ttype)))
        }
        TType::Bool => {
            iprot.read_bool()?;
        }
        TType::Byte => {
            iprot.read_byte()?;
        }
        TType::Double => {
            iprot.read_double()?;
        }
        TType::I16 => {
            iprot.read_i16()?;
        }
        TType::I32 => {
            iprot.read_i32()?;
        }
        TType::I64 => {
            iprot.read_i64()?;
        }
        TType::String => {
            iprot.read_binary()?;
        }
        TType::Struct => {
            iprot.read_struct_begin()?;
            loop {
                let field = iprot.read_field_begin()?;
                if field.field_type == TType::Stop {
                    break;
                }
                skip_nested(iprot, field.field_type, depth - 1)?;
                iprot.read_field_end()?;
            }
            iprot.read_struct_end()?;
        }
        TType::Map => {
            let header = iprot.read_map_begin()?;
            for _ in 0..header.size {
                skip_nested(iprot, header.key_type, depth - 1)?;
                skip_nested(iprot, header.value_type, depth - 1)?;
            }
            iprot.read_map_end()?;
        }
        TType::Set => {
            let header = iprot.read_set_begin()?;
            for _ in 0..header.size {
                skip_nested(iprot, header.element_type, depth - 1)?;
            }
            iprot.read_set_end()?;
        }
        TType::List => {
            let header = iprot.read_list_begin()?;
            for _ in 0..header.size {
                skip_nested(iprot, header.element_type, depth - 1)?;
            }
            iprot.read_list_end()?;
        }
    }
    Ok(())
}

//! Strict binary encoding
//!
//! Big-endian fixed-width integers, length-prefixed strings and a versioned
//! message header (`0x8001_0000 | kind`). Non-strict message headers are
//! accepted on read.

use super::buffer::ByteSink;
use super::headers;
use super::{
    FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, ProtocolFactory,
    ProtocolReader, ProtocolWriter, TType,
};
use crate::error::{Error, Result};
use bytes::{Buf, Bytes};
use indexmap::IndexMap;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const KIND_MASK: u32 = 0x0000_00ff;

/// Writer producing the strict binary encoding
pub struct BinaryProtocolWriter<'a> {
    sink: &'a mut dyn ByteSink,
}

impl<'a> BinaryProtocolWriter<'a> {
    pub fn new(sink: &'a mut dyn ByteSink) -> Self {
        Self { sink }
    }

    fn write_size(&mut self, size: usize) -> Result<()> {
        let size = i32::try_from(size)
            .map_err(|_| Error::Internal(format!("size {} does not fit in i32", size)))?;
        self.write_i32(size)
    }
}

impl ProtocolWriter for BinaryProtocolWriter<'_> {
    fn write_headers(&mut self, headers: &IndexMap<String, String>) -> Result<()> {
        headers::encode(headers, &mut *self.sink)
    }

    fn write_message_begin(
        &mut self,
        name: &str,
        message_type: MessageType,
        sequence: i32,
    ) -> Result<()> {
        let version = VERSION_1 | message_type.as_u8() as u32;
        self.sink.write_bytes(&version.to_be_bytes())?;
        self.write_string(name)?;
        self.write_i32(sequence)
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) -> Result<()> {
        self.sink.write_bytes(&[field_type.as_u8()])?;
        self.write_i16(id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.sink.write_bytes(&[TType::Stop.as_u8()])
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        self.sink
            .write_bytes(&[key_type.as_u8(), value_type.as_u8()])?;
        self.write_size(size)
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.sink.write_bytes(&[element_type.as_u8()])?;
        self.write_size(size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_list_begin(element_type, size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.sink.write_bytes(&[value as u8])
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.sink.write_bytes(&value.to_be_bytes())
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.sink.write_bytes(&value.to_bits().to_be_bytes())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.write_size(value.len())?;
        self.sink.write_bytes(value)
    }
}

/// Reader over one frame in the strict binary encoding
#[derive(Debug, Clone)]
pub struct BinaryProtocolReader {
    buf: Bytes,
}

impl BinaryProtocolReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes left unread
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::Decode(format!(
                "unexpected end of frame: needed {} bytes, {} left",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn read_type(&mut self) -> Result<TType> {
        let id = self.read_u8()?;
        TType::from_u8(id)
    }

    /// Read a collection size; every element takes at least one byte
    fn read_size(&mut self) -> Result<usize> {
        let size = self.read_i32()?;
        let size = usize::try_from(size)
            .map_err(|_| Error::Decode(format!("negative size {}", size)))?;
        if size > self.buf.remaining() {
            return Err(Error::Decode(format!(
                "size {} exceeds remaining frame length {}",
                size,
                self.buf.remaining()
            )));
        }
        Ok(size)
    }

    fn read_length_prefixed(&mut self) -> Result<Bytes> {
        let len = self.read_size()?;
        Ok(self.buf.split_to(len))
    }
}

impl ProtocolReader for BinaryProtocolReader {
    fn read_headers(&mut self) -> Result<IndexMap<String, String>> {
        headers::decode(&mut self.buf)
    }

    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let first = self.read_i32()?;
        if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(Error::Decode(format!("bad protocol version {:#010x}", word)));
            }
            let message_type = MessageType::from_u8((word & KIND_MASK) as u8)?;
            let name = self.read_string()?;
            let sequence = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                sequence,
            })
        } else {
            // Non-strict: the first word is the name length
            let len = first as usize;
            self.need(len)?;
            let raw = self.buf.split_to(len);
            let name = String::from_utf8(raw.to_vec())
                .map_err(|e| Error::Decode(format!("method name is not UTF-8: {}", e)))?;
            let message_type = MessageType::from_u8(self.read_u8()?)?;
            let sequence = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                sequence,
            })
        }
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let field_type = self.read_type()?;
        if field_type == TType::Stop {
            return Ok(FieldHeader { field_type, id: 0 });
        }
        let id = self.read_i16()?;
        Ok(FieldHeader { field_type, id })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let key_type = self.read_type()?;
        let value_type = self.read_type()?;
        let size = self.read_size()?;
        Ok(MapHeader {
            key_type,
            value_type,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        let element_type = self.read_type()?;
        let size = self.read_size()?;
        Ok(ListHeader { element_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<ListHeader> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_byte(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn read_double(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn read_string(&mut self) -> Result<String> {
        let raw = self.read_length_prefixed()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::Decode(format!("string is not UTF-8: {}", e)))
    }

    fn read_binary(&mut self) -> Result<Bytes> {
        self.read_length_prefixed()
    }
}

/// Factory for the strict binary encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryProtocolFactory;

impl ProtocolFactory for BinaryProtocolFactory {
    fn reader(&self, frame: Bytes) -> Box<dyn ProtocolReader> {
        Box::new(BinaryProtocolReader::new(frame))
    }

    fn writer<'a>(&self, sink: &'a mut dyn ByteSink) -> Box<dyn ProtocolWriter + 'a> {
        Box::new(BinaryProtocolWriter::new(sink))
    }
}

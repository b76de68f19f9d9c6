//! Argument and result values
//!
//! Every method has an argument struct and a result struct. Encoding of the
//! individual fields belongs to the value; the engines only rely on the
//! traits below.

use crate::error::{exception_code, ApplicationException, Error, Result};
use crate::protocol::{skip, ProtocolReader, ProtocolWriter, TType};
use std::fmt::Debug;

/// A struct that can cross the wire
pub trait StructValue: Debug + PartialEq + Send + Sized + 'static {
    fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()>;
    fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self>;
}

/// Result struct of a method
///
/// Holds the success value in field 0 when the method returns one.
pub trait MethodResult: StructValue + Default {
    /// Value handed to the caller on success
    type Success: Send + 'static;

    fn from_success(success: Self::Success) -> Self;

    /// Extract the success value; `method` names the call for error messages
    fn into_success(self, method: &str) -> Result<Self::Success>;
}

/// Error for a reply whose result struct carried no success value
pub fn missing_result(method: &str) -> Error {
    Error::RemoteApplication(ApplicationException::new(
        exception_code::MISSING_RESULT,
        format!("{} failed: unknown result", method),
    ))
}

/// Read a struct with no declared fields, skipping whatever it carries
pub fn read_empty_struct(iprot: &mut dyn ProtocolReader) -> Result<()> {
    iprot.read_struct_begin()?;
    loop {
        let field = iprot.read_field_begin()?;
        if field.field_type == TType::Stop {
            break;
        }
        skip(iprot, field.field_type)?;
        iprot.read_field_end()?;
    }
    iprot.read_struct_end()
}

/// Write a struct with no fields: a lone stop marker
pub fn write_empty_struct(oprot: &mut dyn ProtocolWriter, name: &str) -> Result<()> {
    oprot.write_struct_begin(name)?;
    oprot.write_field_stop()?;
    oprot.write_struct_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BinaryProtocolReader, BinaryProtocolWriter, MemoryOutputBuffer};

    #[test]
    fn test_empty_struct_is_single_stop() {
        let mut buffer = MemoryOutputBuffer::new(None);
        {
            let mut writer = BinaryProtocolWriter::new(&mut buffer);
            write_empty_struct(&mut writer, "ping_args").unwrap();
        }
        assert_eq!(buffer.into_bytes().as_ref(), &[0]);
    }

    #[test]
    fn test_read_empty_struct_skips_unknown_fields() {
        let mut buffer = MemoryOutputBuffer::new(None);
        {
            let mut w = BinaryProtocolWriter::new(&mut buffer);
            w.write_struct_begin("future_args").unwrap();
            w.write_field_begin(TType::String, 4).unwrap();
            w.write_string("added later").unwrap();
            w.write_field_end().unwrap();
            w.write_field_begin(TType::List, 5).unwrap();
            w.write_list_begin(TType::I64, 2).unwrap();
            w.write_i64(1).unwrap();
            w.write_i64(2).unwrap();
            w.write_list_end().unwrap();
            w.write_field_end().unwrap();
            w.write_field_stop().unwrap();
            w.write_struct_end().unwrap();
            w.write_i32(99).unwrap();
        }
        let mut reader = BinaryProtocolReader::new(buffer.into_bytes());
        read_empty_struct(&mut reader).unwrap();
        assert_eq!(reader.read_i32().unwrap(), 99);
    }

    #[test]
    fn test_missing_result_error() {
        match missing_result("blah") {
            Error::RemoteApplication(envelope) => {
                assert_eq!(envelope.code, exception_code::MISSING_RESULT);
                assert_eq!(envelope.message, "blah failed: unknown result");
            }
            other => panic!("Expected RemoteApplication, got {:?}", other),
        }
    }
}

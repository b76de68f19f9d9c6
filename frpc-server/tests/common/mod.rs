// Common test utilities for frpc server tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use frpc_core::protocol::{skip, BinaryProtocolFactory, ByteSink, MessageType, ProtocolFactory};
use frpc_core::value::{missing_result, read_empty_struct, write_empty_struct};
use frpc_core::{
    ApplicationException, CallContext, MethodResult, OutputTransport, ProtocolReader,
    ProtocolWriter, Result, StructValue, TType,
};
use std::sync::Mutex;

#[derive(Debug, Default, PartialEq)]
pub struct PingArgs;

impl StructValue for PingArgs {
    fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        write_empty_struct(oprot, "ping_args")
    }

    fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self> {
        read_empty_struct(iprot)?;
        Ok(PingArgs)
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct PingResult;

impl StructValue for PingResult {
    fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        write_empty_struct(oprot, "ping_result")
    }

    fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self> {
        read_empty_struct(iprot)?;
        Ok(PingResult)
    }
}

impl MethodResult for PingResult {
    type Success = ();

    fn from_success(_: ()) -> Self {
        PingResult
    }

    fn into_success(self, _method: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct BlahArgs {
    pub num: i32,
}

impl StructValue for BlahArgs {
    fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        oprot.write_struct_begin("blah_args")?;
        oprot.write_field_begin(TType::I32, 1)?;
        oprot.write_i32(self.num)?;
        oprot.write_field_end()?;
        oprot.write_field_stop()?;
        oprot.write_struct_end()
    }

    fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self> {
        let mut args = BlahArgs::default();
        iprot.read_struct_begin()?;
        loop {
            let field = iprot.read_field_begin()?;
            match (field.field_type, field.id) {
                (TType::Stop, _) => break,
                (TType::I32, 1) => args.num = iprot.read_i32()?,
                (other, _) => skip(iprot, other)?,
            }
            iprot.read_field_end()?;
        }
        iprot.read_struct_end()?;
        Ok(args)
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct BlahResult {
    pub success: Option<i64>,
}

impl StructValue for BlahResult {
    fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        oprot.write_struct_begin("blah_result")?;
        if let Some(n) = self.success {
            oprot.write_field_begin(TType::I64, 0)?;
            oprot.write_i64(n)?;
            oprot.write_field_end()?;
        }
        oprot.write_field_stop()?;
        oprot.write_struct_end()
    }

    fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self> {
        let mut result = BlahResult::default();
        iprot.read_struct_begin()?;
        loop {
            let field = iprot.read_field_begin()?;
            match (field.field_type, field.id) {
                (TType::Stop, _) => break,
                (TType::I64, 0) => result.success = Some(iprot.read_i64()?),
                (other, _) => skip(iprot, other)?,
            }
            iprot.read_field_end()?;
        }
        iprot.read_struct_end()?;
        Ok(result)
    }
}

impl MethodResult for BlahResult {
    type Success = i64;

    fn from_success(success: i64) -> Self {
        Self {
            success: Some(success),
        }
    }

    fn into_success(self, method: &str) -> Result<i64> {
        self.success.ok_or_else(|| missing_result(method))
    }
}

/// `blah` arguments as sent by a newer client with an extra field
#[derive(Debug, Default, PartialEq)]
pub struct BlahArgsV2 {
    pub num: i32,
    pub note: String,
}

impl StructValue for BlahArgsV2 {
    fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        oprot.write_struct_begin("blah_args")?;
        oprot.write_field_begin(TType::I32, 1)?;
        oprot.write_i32(self.num)?;
        oprot.write_field_end()?;
        oprot.write_field_begin(TType::String, 2)?;
        oprot.write_string(&self.note)?;
        oprot.write_field_end()?;
        oprot.write_field_stop()?;
        oprot.write_struct_end()
    }

    fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self> {
        let mut args = BlahArgsV2::default();
        iprot.read_struct_begin()?;
        loop {
            let field = iprot.read_field_begin()?;
            match (field.field_type, field.id) {
                (TType::Stop, _) => break,
                (TType::I32, 1) => args.num = iprot.read_i32()?,
                (TType::String, 2) => args.note = iprot.read_string()?,
                (other, _) => skip(iprot, other)?,
            }
            iprot.read_field_end()?;
        }
        iprot.read_struct_end()?;
        Ok(args)
    }
}

/// Output that records every flushed frame
///
/// `flush` yields before taking the buffer, so writers that skip the write
/// lock would interleave.
#[derive(Default)]
pub struct RecordingOutput {
    pending: Mutex<Vec<u8>>,
    frames: Mutex<Vec<Bytes>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutputTransport for RecordingOutput {
    fn write(&self, buf: &[u8]) -> Result<()> {
        self.pending.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        tokio::task::yield_now().await;
        let frame = std::mem::take(&mut *self.pending.lock().unwrap());
        self.frames.lock().unwrap().push(Bytes::from(frame));
        Ok(())
    }
}

/// Encode a `CALL` frame the way a client would
pub fn call_frame(ctx: &CallContext, method: &str, args: &impl StructValue) -> Bytes {
    let mut frame = BytesMut::new();
    {
        let sink: &mut dyn ByteSink = &mut frame;
        let mut oprot = BinaryProtocolFactory.writer(sink);
        oprot.write_request_headers(ctx).unwrap();
        oprot.write_message_begin(method, MessageType::Call, 0).unwrap();
        args.encode(oprot.as_mut()).unwrap();
        oprot.write_message_end().unwrap();
    }
    frame.freeze()
}

/// A response frame decoded up to its body
pub struct Response {
    pub headers: Vec<(String, String)>,
    pub method: String,
    pub kind: MessageType,
    body: Box<dyn ProtocolReader>,
}

impl Response {
    pub fn read(frame: Bytes) -> Self {
        let mut iprot = BinaryProtocolFactory.reader(frame);
        let headers = iprot.read_headers().unwrap().into_iter().collect();
        let header = iprot.read_message_begin().unwrap();
        Self {
            headers,
            method: header.name,
            kind: header.message_type,
            body: iprot,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn result<R: StructValue>(mut self) -> R {
        assert_eq!(self.kind, MessageType::Reply);
        let result = R::decode(self.body.as_mut()).unwrap();
        self.body.read_message_end().unwrap();
        result
    }

    pub fn exception(mut self) -> ApplicationException {
        assert_eq!(self.kind, MessageType::Exception);
        ApplicationException::decode(self.body.as_mut()).unwrap()
    }
}

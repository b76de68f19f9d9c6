// Common test utilities for frpc client tests

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use frpc_core::protocol::{skip, BinaryProtocolFactory, ByteSink, MessageType, ProtocolFactory};
use frpc_core::value::{missing_result, read_empty_struct, write_empty_struct};
use frpc_core::{
    ApplicationException, CallContext, MethodResult, ProtocolReader, ProtocolWriter, Result,
    StructValue, TType,
};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

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

/// A decoded inbound call as seen by the mock server
pub struct ReceivedCall {
    pub context: CallContext,
    pub method: String,
    /// `num` of a `blah` call
    pub num: Option<i32>,
}

/// Decode a request frame written by the client
pub fn read_call(frame: Bytes) -> Result<ReceivedCall> {
    let mut iprot = BinaryProtocolFactory.reader(frame);
    let context = iprot.read_request_headers()?;
    let header = iprot.read_message_begin()?;
    let num = if header.name == "blah" {
        Some(BlahArgs::decode(iprot.as_mut())?.num)
    } else {
        read_empty_struct(iprot.as_mut())?;
        None
    };
    iprot.read_message_end()?;
    Ok(ReceivedCall {
        context,
        method: header.name,
        num,
    })
}

fn frame_with(
    ctx: &CallContext,
    body: impl FnOnce(&mut dyn ProtocolWriter) -> Result<()>,
) -> Bytes {
    let mut frame = BytesMut::new();
    {
        let sink: &mut dyn ByteSink = &mut frame;
        let mut oprot = BinaryProtocolFactory.writer(sink);
        oprot.write_response_headers(ctx).unwrap();
        body(oprot.as_mut()).unwrap();
    }
    frame.freeze()
}

/// Encode a `REPLY` frame carrying `result`
pub fn reply_frame(ctx: &CallContext, method: &str, result: &impl StructValue) -> Bytes {
    frame_with(ctx, |oprot| {
        oprot.write_message_begin(method, MessageType::Reply, 0)?;
        result.encode(oprot)?;
        oprot.write_message_end()
    })
}

/// Encode an `EXCEPTION` frame carrying `envelope`
pub fn exception_frame(ctx: &CallContext, method: &str, envelope: &ApplicationException) -> Bytes {
    frame_with(ctx, |oprot| {
        oprot.write_message_begin(method, MessageType::Exception, 0)?;
        envelope.encode(oprot)?;
        oprot.write_message_end()
    })
}

/// What the mock server does with one inbound call
pub enum Action {
    Reply(Bytes),
    Ignore,
    Close,
}

type CallHandler = Arc<dyn Fn(ReceivedCall) -> BoxFuture<'static, Action> + Send + Sync>;

/// Mock frpc server for testing
///
/// Decodes every inbound frame, hands it to the handler on its own task
/// and writes back whatever the handler answers, so replies may arrive in
/// any order.
pub struct MockWsServer {
    addr: SocketAddr,
    message_rx: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    /// Server that answers `ping` and doubles the `num` of `blah`
    pub async fn new() -> Self {
        Self::with_handler(|call| async move { echo(call) }).await
    }

    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(ReceivedCall) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Action> + Send + 'static,
    {
        let handler: CallHandler = Arc::new(move |call| Box::pin(handler(call)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (msg_tx, message_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let msg_tx = msg_tx.clone();
                tokio::spawn(async move {
                    let Ok(ws_stream) = accept_async(stream).await else {
                        return;
                    };
                    let (write, mut read) = ws_stream.split();
                    let write = Arc::new(Mutex::new(write));

                    while let Some(Ok(msg)) = read.next().await {
                        let Message::Binary(data) = msg else {
                            continue;
                        };
                        let Ok(call) = read_call(Bytes::from(data)) else {
                            break;
                        };
                        let _ = msg_tx.send(call.method.clone());

                        let handler = handler.clone();
                        let write = write.clone();
                        tokio::spawn(async move {
                            match handler(call).await {
                                Action::Reply(frame) => {
                                    let _ = write
                                        .lock()
                                        .await
                                        .send(Message::Binary(frame.to_vec()))
                                        .await;
                                }
                                Action::Ignore => {}
                                Action::Close => {
                                    let _ = write.lock().await.close().await;
                                }
                            }
                        });
                    }
                });
            }
        });

        Self { addr, message_rx }
    }

    /// Get the WebSocket URL for connecting to this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next call to reach the server, returning its method name
    pub async fn wait_for_call(&mut self) -> Option<String> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Method name of a call already received, without waiting
    pub fn try_next_call(&mut self) -> Option<String> {
        self.message_rx.try_recv().ok()
    }
}

/// Default behaviour of [`MockWsServer::new`]
pub fn echo(call: ReceivedCall) -> Action {
    call.context.add_response_header("served-by", "mock");
    match call.num {
        Some(num) => Action::Reply(reply_frame(
            &call.context,
            &call.method,
            &BlahResult::from_success(i64::from(num) * 2),
        )),
        None => Action::Reply(reply_frame(&call.context, &call.method, &PingResult)),
    }
}

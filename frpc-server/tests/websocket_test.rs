//! WebSocket connection lifecycle tests

mod common;

use common::{call_frame, BlahArgs, BlahResult, PingArgs, PingResult};
use frpc_client::{ClientBuilder, WsTransport};
use frpc_core::error::exception_code;
use frpc_core::{CallContext, Error, Transport};
use frpc_server::{FrpcServer, Processor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn start_server() -> SocketAddr {
    let processor = Processor::builder()
        .method::<PingArgs, PingResult, _, _>("ping", |_, _| async { Ok(()) })
        .method::<BlahArgs, BlahResult, _, _>("blah", |_, args| async move {
            if args.num < 0 {
                return Err(Error::handler("negative blah"));
            }
            Ok(i64::from(args.num) * 2)
        })
        .build();
    let server = FrpcServer::builder()
        .bind_str("127.0.0.1:0")
        .unwrap()
        .processor(processor)
        .build()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

#[tokio::test]
async fn test_handler_error_keeps_connection() {
    let addr = start_server().await;
    let transport = Arc::new(WsTransport::connect(&format!("ws://{}", addr), None).await.unwrap());
    let client = ClientBuilder::new()
        .method::<BlahArgs, BlahResult>("blah")
        .build(transport.clone())
        .unwrap();

    let err = client
        .call::<_, i64>(&CallContext::new(), "blah", BlahArgs { num: -1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RemoteApplication(ref e) if e.code == exception_code::UNKNOWN && e.message == "negative blah"
    ));

    let n: i64 = client
        .call(&CallContext::new(), "blah", BlahArgs { num: 2 })
        .await
        .unwrap();
    assert_eq!(n, 4);
    assert!(transport.is_connected());
}

#[tokio::test]
async fn test_unknown_method_closes_connection() {
    let addr = start_server().await;
    let transport = Arc::new(WsTransport::connect(&format!("ws://{}", addr), None).await.unwrap());
    let client = ClientBuilder::new()
        .method::<PingArgs, PingResult>("ping")
        .method::<PingArgs, PingResult>("pong")
        .build(transport.clone())
        .unwrap();

    let err = client
        .call::<_, ()>(&CallContext::new(), "pong", PingArgs)
        .await
        .unwrap_err();
    match err {
        Error::RemoteApplication(envelope) => {
            assert_eq!(envelope.code, exception_code::UNKNOWN_METHOD);
            assert_eq!(envelope.message, "Unknown function: pong");
        }
        other => panic!("Expected RemoteApplication, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!transport.is_connected());
    let err = client
        .call::<_, ()>(&CallContext::new(), "ping", PingArgs)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_garbage_frame_closes_connection() {
    let addr = start_server().await;
    let transport = WsTransport::connect(&format!("ws://{}", addr), None).await.unwrap();

    transport
        .send(bytes::Bytes::from_static(&[0x07, 0x00, 0x00]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_pipelined_frames_on_one_connection() {
    let addr = start_server().await;
    let transport = Arc::new(WsTransport::connect(&format!("ws://{}", addr), None).await.unwrap());
    let client = ClientBuilder::new()
        .method::<BlahArgs, BlahResult>("blah")
        .build(transport.clone())
        .unwrap();

    let calls = (0..20).map(|num| {
        let client = client.clone();
        async move {
            client
                .call::<_, i64>(&CallContext::new(), "blah", BlahArgs { num })
                .await
        }
    });
    let results = futures::future::join_all(calls).await;
    for (num, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), num as i64 * 2);
    }
    assert_eq!(transport.pending_calls().await, 0);
}

#[tokio::test]
async fn test_raw_frame_round_trip() {
    let addr = start_server().await;
    let transport = Arc::new(WsTransport::connect(&format!("ws://{}", addr), None).await.unwrap());
    let ctx = CallContext::new();
    let (tx, rx) = tokio::sync::oneshot::channel();

    transport
        .register(
            &ctx,
            Box::new(move |frame| {
                let _ = tx.send(frame);
            }),
        )
        .await
        .unwrap();
    transport
        .send(call_frame(&ctx, "blah", &BlahArgs { num: 8 }))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .unwrap()
        .unwrap();
    let response = common::Response::read(frame);
    assert_eq!(response.result::<BlahResult>().success, Some(16));
}

//! Integration tests for the client agent's local listener.
//!
//! A stand-in broker accepts the agent's WebSocket leg on a real loopback
//! socket, records the upgrade URI, and then plays the far side of the tunnel.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use lxport_client::domain::ClientConfig;
use lxport_client::infrastructure::serve;
use lxport_core::{BlockCodec, CodecKind, DeflateCodec, SnappyCodec};

/// Accepts one WebSocket, reports its request URI, then runs `far_side`.
async fn fake_broker<F, Fut>(far_side: F) -> (String, oneshot::Receiver<String>)
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let record = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, record).await.unwrap();
        let _ = uri_tx.send(uri);
        far_side(ws).await;
    });

    (format!("ws://{addr}"), uri_rx)
}

/// Starts the agent on an ephemeral local port and returns that port.
async fn start_agent(config: ClientConfig) -> (u16, Arc<AtomicBool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        tokio::spawn(async move { serve(listener, Arc::new(config), running).await });
    }
    (port, running)
}

#[tokio::test]
async fn test_paired_connection_sends_request_query_and_forwards_bytes() {
    // Arrange: a broker that echoes every binary frame
    let (base, uri_rx) = fake_broker(|mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_binary() {
                ws.send(msg).await.unwrap();
            }
        }
    })
    .await;
    let config = ClientConfig {
        remote_port: 22,
        ..ClientConfig::paired(format!("{base}/pair"), "D1")
    };
    let (port, _running) = start_agent(config).await;

    // Act
    let mut local = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    local.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(2), local.read_exact(&mut buf))
        .await
        .expect("echo within 2s")
        .unwrap();

    // Assert
    assert_eq!(&buf, b"hello");
    assert_eq!(uri_rx.await.unwrap(), "/pair?pt=req&uuid=D1&port=22");
}

#[tokio::test]
async fn test_decompress_decodes_broker_frames() {
    // Arrange: the far side sends one compressed block
    let (base, _uri) = fake_broker(|mut ws| async move {
        let block = SnappyCodec.encode(b"compressed payload").unwrap();
        ws.send(Message::Binary(block)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    let config = ClientConfig {
        decompress: true,
        ..ClientConfig::direct(format!("{base}/xport"), None)
    };
    let (port, _running) = start_agent(config).await;

    // Act
    let mut local = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = vec![0u8; b"compressed payload".len()];
    tokio::time::timeout(Duration::from_secs(2), local.read_exact(&mut buf))
        .await
        .expect("data within 2s")
        .unwrap();

    // Assert
    assert_eq!(buf, b"compressed payload");
}

#[tokio::test]
async fn test_deflate_codec_decodes_broker_frames() {
    let (base, _uri) = fake_broker(|mut ws| async move {
        let block = DeflateCodec::default().encode(b"deflated").unwrap();
        ws.send(Message::Binary(block)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    let config = ClientConfig {
        decompress: true,
        codec: CodecKind::Deflate,
        ..ClientConfig::direct(format!("{base}/xport"), None)
    };
    let (port, _running) = start_agent(config).await;

    let mut local = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = vec![0u8; b"deflated".len()];
    tokio::time::timeout(Duration::from_secs(2), local.read_exact(&mut buf))
        .await
        .expect("data within 2s")
        .unwrap();

    assert_eq!(buf, b"deflated");
}

#[tokio::test]
async fn test_broker_close_closes_local_connection() {
    // Arrange: a broker that refuses the tunnel by closing right away
    let (base, _uri) = fake_broker(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;
    let (port, _running) = start_agent(ClientConfig::direct(format!("{base}/xport"), None)).await;

    // Act
    let mut local = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), local.read(&mut buf))
        .await
        .expect("local side must be closed")
        .unwrap_or(0);

    // Assert
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_unreachable_broker_closes_local_connection() {
    // Arrange: nothing listens on the broker port
    let dead = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let (port, _running) =
        start_agent(ClientConfig::direct(format!("ws://{dead}/xport"), None)).await;

    // Act
    let mut local = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), local.read(&mut buf))
        .await
        .expect("local side must be closed")
        .unwrap_or(0);

    // Assert
    assert_eq!(n, 0);
}

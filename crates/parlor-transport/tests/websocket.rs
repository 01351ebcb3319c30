//! Integration tests for the WebSocket transport: a real server and a
//! real client, verifying frames actually cross the network.

use futures_util::{SinkExt, StreamExt};
use parlor_transport::{Connection, Transport, WebSocketTransport};
use tokio_tungstenite::tungstenite::Message;

/// Connects a tokio-tungstenite client to the given address.
async fn connect_client(
    addr: std::net::SocketAddr,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("ws://{addr}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("client should connect");
    ws
}

#[tokio::test]
async fn test_send_and_receive_text_frames() {
    // Port 0: the OS picks a free port, local_addr tells us which.
    let mut transport = WebSocketTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("should have an addr");

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let mut client_ws = connect_client(addr).await;
    let server_conn = server_handle.await.expect("task should complete");

    assert!(server_conn.id().into_inner() > 0);

    // Server sends JSON; the client must see a text frame.
    server_conn
        .send(br#"{"action":"say"}"#)
        .await
        .expect("send should succeed");
    let msg = client_ws.next().await.unwrap().unwrap();
    match msg {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"action":"say"}"#),
        other => panic!("expected a text frame, got {other:?}"),
    }

    // Client sends text; the server sees the bytes.
    client_ws
        .send(Message::Text(r#"{"action":"get"}"#.into()))
        .await
        .unwrap();
    let received = server_conn
        .recv()
        .await
        .expect("recv should succeed")
        .expect("should have data");
    assert_eq!(received, br#"{"action":"get"}"#);

    server_conn.close().await.expect("close should succeed");
}

#[tokio::test]
async fn test_recv_returns_none_on_client_close() {
    let mut transport = WebSocketTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().unwrap();

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let mut client_ws = connect_client(addr).await;
    let server_conn = server_handle.await.unwrap();

    client_ws.send(Message::Close(None)).await.unwrap();

    let result = server_conn.recv().await.expect("recv should not error");
    assert!(result.is_none(), "clean close must surface as None");
}

#[tokio::test]
async fn test_binary_frames_pass_through() {
    let mut transport = WebSocketTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().unwrap();

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let mut client_ws = connect_client(addr).await;
    let server_conn = server_handle.await.unwrap();

    client_ws
        .send(Message::Binary(vec![0x00, 0xFF, 0x7F].into()))
        .await
        .unwrap();

    let received = server_conn.recv().await.unwrap().unwrap();
    assert_eq!(received, vec![0x00, 0xFF, 0x7F]);
}

//! Integration tests for the server, handler, and full connection
//! flow: real WebSocket clients speaking the wire protocol end to end.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parlor::prelude::*;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// =========================================================================
// Mock game
// =========================================================================

struct NoopGame;

impl GameLogic for NoopGame {}

fn working_factory() -> LogicFactory {
    Box::new(|| Some(Box::new(NoopGame) as Box<dyn GameLogic>))
}

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server (pool of two) on a random port and returns its
/// address and handle.
async fn start_server() -> (String, parlor::ServerHandle) {
    let server = ParlorServer::builder()
        .bind("127.0.0.1:0")
        .pool_config(PoolConfig {
            target_size: 2,
            deadline: WaitDeadline::After(Duration::from_secs(60)),
            dispatch: DispatchPolicy::WaitForN,
        })
        .logic_factory(working_factory())
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let handle = server.handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, handle)
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, msg: &Message) {
    let text = serde_json::to_string(msg).expect("encode");
    ws.send(WsMessage::Text(text.into())).await.expect("send");
}

fn hi(id: &str) -> Message {
    Message::say(Target::Hi, ClientId::new(id), Address::All)
}

/// Reads envelopes until one with the wanted target arrives.
async fn expect_target(ws: &mut ClientWs, target: Target) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {target}"))
            .expect("stream should stay open")
            .expect("frame should decode");
        if let WsMessage::Text(text) = frame {
            let msg: Message =
                serde_json::from_str(text.as_str()).expect("valid envelope");
            if msg.target == target {
                return msg;
            }
        }
    }
}

// =========================================================================
// Connection flow
// =========================================================================

#[tokio::test]
async fn test_hi_gets_pool_size_and_roster() {
    let (addr, _handle) = start_server().await;
    let mut p1 = connect(&addr).await;

    send(&mut p1, &hi("p1")).await;

    let size = expect_target(&mut p1, Target::Data).await;
    assert_eq!(size.data.get("poolSize"), Some(&json!(1)));

    let roster = expect_target(&mut p1, Target::Plist).await;
    let entries = roster.data.as_array().expect("roster array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], "p1");
    assert_eq!(entries[0]["connected"], true);
}

#[tokio::test]
async fn test_two_players_get_started() {
    let (addr, _handle) = start_server().await;
    let mut p1 = connect(&addr).await;
    let mut p2 = connect(&addr).await;

    send(&mut p1, &hi("p1")).await;
    send(&mut p2, &hi("p2")).await;

    // Both ends of the match receive the remote start command.
    let cmd1 = expect_target(&mut p1, Target::Command).await;
    assert_eq!(cmd1.data.get("command"), Some(&json!("start")));
    let cmd2 = expect_target(&mut p2, Target::Command).await;
    assert_eq!(cmd2.data.get("command"), Some(&json!("start")));
}

#[tokio::test]
async fn test_txt_is_relayed_between_players() {
    let (addr, _handle) = start_server().await;
    let mut p1 = connect(&addr).await;
    let mut p2 = connect(&addr).await;
    send(&mut p1, &hi("p1")).await;
    send(&mut p2, &hi("p2")).await;
    // Wait until both are in the game so the roster settles.
    expect_target(&mut p1, Target::Command).await;
    expect_target(&mut p2, Target::Command).await;

    let txt = Message::say(
        Target::Txt,
        ClientId::new("p1"),
        Address::Client(ClientId::new("p2")),
    )
    .with_text("your move");
    send(&mut p1, &txt).await;

    let got = expect_target(&mut p2, Target::Txt).await;
    assert_eq!(got.text.as_deref(), Some("your move"));
    assert_eq!(got.from, ClientId::new("p1"));
}

#[tokio::test]
async fn test_first_message_must_be_handshake() {
    let (addr, _handle) = start_server().await;
    let mut ws = connect(&addr).await;

    // A TXT before any handshake is dropped; the connection stays up
    // and a later HI still works.
    let stray = Message::say(
        Target::Txt,
        ClientId::new("p1"),
        Address::All,
    )
    .with_text("too early");
    send(&mut ws, &stray).await;
    send(&mut ws, &hi("p1")).await;

    let roster = expect_target(&mut ws, Target::Plist).await;
    assert_eq!(roster.data.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_shutdown_sends_final_roster() {
    let (addr, handle) = start_server().await;
    let mut p1 = connect(&addr).await;
    send(&mut p1, &hi("p1")).await;
    expect_target(&mut p1, Target::Plist).await;

    handle.shutdown().await;

    // The final snapshot arrives, then the connection winds down.
    let last = expect_target(&mut p1, Target::Plist).await;
    assert!(last.data.as_array().is_some());
}

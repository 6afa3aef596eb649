//! Integration tests for the full relay flow over a real WebSocket.
//!
//! Each test boots the server on an ephemeral port with a temporary storage
//! root and drives it with tokio-tungstenite clients, the same way the real
//! client does.

use futures_util::{SinkExt, StreamExt};
use palaver_server::{app, AppState};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn setup_test_server() -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let state = Arc::new(
        AppState::open(&dir.path().join("chat_logs"), &dir.path().join("users.json")).unwrap(),
    );
    let app = app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, dir)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");
    ws
}

async fn send(ws: &mut Ws, event: serde_json::Value) {
    ws.send(Message::Text(event.to_string().into()))
        .await
        .expect("failed to send");
}

/// Reads frames until one carries the given event name, skipping unrelated
/// broadcasts such as roster updates.
async fn next_event(ws: &mut Ws, event: &str) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("connection closed")
            .expect("frame error");
        if let Message::Text(text) = frame {
            let parsed: serde_json::Value = serde_json::from_str(&text).expect("bad frame JSON");
            if parsed["event"] == event {
                return parsed["data"].clone();
            }
        }
    }
}

/// Registers a fresh account and logs it in, returning (uid, token).
async fn register_and_login(ws: &mut Ws, username: &str, password: &str) -> (String, String) {
    send(ws, json!({"event": "request_verification_code"})).await;
    let code = next_event(ws, "system_send_code").await["code"]
        .as_str()
        .unwrap()
        .to_string();

    send(
        ws,
        json!({
            "event": "submit_login_verify",
            "data": {"username": username, "password": password, "code": code}
        }),
    )
    .await;
    let notice = next_event(ws, "show_notification").await;
    assert!(
        notice["msg"].as_str().unwrap().starts_with("Registered!"),
        "expected registration notice, got: {}",
        notice
    );

    send(
        ws,
        json!({
            "event": "submit_login_verify",
            "data": {"username": username, "password": password, "code": code}
        }),
    )
    .await;
    let verified = next_event(ws, "verification_success").await;
    (
        verified["uid"].as_str().unwrap().to_string(),
        verified["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn registration_allocates_sequential_uids() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    let (uid_a, token) = register_and_login(&mut alice, "alice", "pw-a").await;
    assert_eq!(uid_a, "000001");
    assert!(!token.is_empty());

    let mut bob = connect(addr).await;
    let (uid_b, _) = register_and_login(&mut bob, "bob", "pw-b").await;
    assert_eq!(uid_b, "000002");
}

#[tokio::test]
async fn wrong_code_is_rejected() {
    let (addr, _dir) = setup_test_server().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"event": "request_verification_code"})).await;
    next_event(&mut ws, "system_send_code").await;

    send(
        &mut ws,
        json!({
            "event": "submit_login_verify",
            "data": {"username": "alice", "password": "pw", "code": "nope"}
        }),
    )
    .await;
    let failed = next_event(&mut ws, "verification_failed").await;
    assert_eq!(failed["msg"], "Invalid Code");
}

#[tokio::test]
async fn direct_message_reaches_both_ends_and_persists() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    let (uid_a, _) = register_and_login(&mut alice, "alice", "pw-a").await;
    let mut bob = connect(addr).await;
    let (uid_b, _) = register_and_login(&mut bob, "bob", "pw-b").await;

    send(
        &mut alice,
        json!({
            "event": "client_message",
            "data": {"content": "hi", "type": "text", "temp_id": "t-1", "target": uid_b}
        }),
    )
    .await;

    // Sender echo carries the server-assigned id and the temp_id back.
    let echo = next_event(&mut alice, "receive_message").await;
    assert_eq!(echo["content"], "hi");
    assert_eq!(echo["sender_uid"], uid_a);
    assert_eq!(echo["temp_id"], "t-1");
    assert!(!echo["id"].as_str().unwrap().is_empty());

    let delivered = next_event(&mut bob, "receive_message").await;
    assert_eq!(delivered["id"], echo["id"]);
    assert_eq!(delivered["target"], uid_b);

    // Either side sees the same partition history.
    send(
        &mut bob,
        json!({
            "event": "request_chat_history",
            "data": {"target": uid_a, "limit": 10}
        }),
    )
    .await;
    let history = next_event(&mut bob, "history_loaded").await;
    assert_eq!(history["target"], uid_a);
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hi");
    assert_eq!(messages[0]["sender_uid"], uid_a);
}

#[tokio::test]
async fn unverified_messages_are_dropped() {
    let (addr, _dir) = setup_test_server().await;

    let mut guest = connect(addr).await;
    send(
        &mut guest,
        json!({
            "event": "client_message",
            "data": {"content": "sneaky", "type": "text", "target": "global"}
        }),
    )
    .await;

    // Once verified, global history must not contain the pre-auth message.
    let (_, _) = register_and_login(&mut guest, "alice", "pw").await;
    send(
        &mut guest,
        json!({
            "event": "request_chat_history",
            "data": {"target": "global", "limit": 10}
        }),
    )
    .await;
    let history = next_event(&mut guest, "history_loaded").await;
    assert_eq!(history["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn token_reauth_skips_the_code_exchange() {
    let (addr, _dir) = setup_test_server().await;

    let mut first = connect(addr).await;
    let (uid, token) = register_and_login(&mut first, "alice", "pw").await;
    drop(first);

    let mut second = connect(addr).await;
    send(
        &mut second,
        json!({
            "event": "submit_login_verify",
            "data": {"uid": uid, "token": token}
        }),
    )
    .await;
    let verified = next_event(&mut second, "verification_success").await;
    assert_eq!(verified["uid"], uid);
    assert_eq!(verified["token"], token);
}

#[tokio::test]
async fn bad_token_does_not_authenticate() {
    let (addr, _dir) = setup_test_server().await;

    let mut first = connect(addr).await;
    let (uid, _) = register_and_login(&mut first, "alice", "pw").await;
    drop(first);

    let mut second = connect(addr).await;
    send(
        &mut second,
        json!({
            "event": "submit_login_verify",
            "data": {"uid": uid, "token": "bogus"}
        }),
    )
    .await;
    next_event(&mut second, "verification_failed").await;
}

#[tokio::test]
async fn reactions_aggregate_and_overlay_history() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    register_and_login(&mut alice, "alice", "pw").await;

    send(
        &mut alice,
        json!({
            "event": "client_message",
            "data": {"content": "react to me", "type": "text", "target": "global"}
        }),
    )
    .await;
    let msg = next_event(&mut alice, "receive_message").await;
    let msg_id = msg["id"].as_str().unwrap().to_string();

    send(
        &mut alice,
        json!({
            "event": "client_reaction",
            "data": {"msg_id": msg_id, "reaction_kind": "like", "target": "global"}
        }),
    )
    .await;
    let update = next_event(&mut alice, "reaction_update").await;
    assert_eq!(update["msg_id"], msg_id.as_str());
    assert_eq!(update["reactions"]["like"], 1);

    send(
        &mut alice,
        json!({
            "event": "request_chat_history",
            "data": {"target": "global", "limit": 10}
        }),
    )
    .await;
    let history = next_event(&mut alice, "history_loaded").await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["reactions"]["like"], 1);
}

#[tokio::test]
async fn check_user_resolves_by_name() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    register_and_login(&mut alice, "alice", "pw").await;

    send(
        &mut alice,
        json!({"event": "client_check_user", "data": {"username": "alice"}}),
    )
    .await;
    let result = next_event(&mut alice, "client_check_user_result").await;
    assert_eq!(result["exists"], true);
    assert_eq!(result["uid"], "000001");

    send(
        &mut alice,
        json!({"event": "client_check_user", "data": {"username": "nobody"}}),
    )
    .await;
    let result = next_event(&mut alice, "client_check_user_result").await;
    assert_eq!(result["exists"], false);
}

#[tokio::test]
async fn monitor_sees_global_traffic_and_roster() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    register_and_login(&mut alice, "alice", "pw").await;
    send(
        &mut alice,
        json!({
            "event": "client_message",
            "data": {"content": "before monitor", "type": "text", "target": "global"}
        }),
    )
    .await;
    next_event(&mut alice, "receive_message").await;

    let mut monitor = connect(addr).await;
    send(&mut monitor, json!({"event": "monitor_join"})).await;
    let history = next_event(&mut monitor, "history_loaded").await;
    assert_eq!(history["messages"].as_array().unwrap().len(), 1);
    let roster = next_event(&mut monitor, "update_user_list").await;
    let roster = roster.as_array().unwrap();
    assert_eq!(roster.len(), 2);
    assert_eq!(roster[0]["username"], "alice");
    assert_eq!(roster[1]["uid"], "ADMIN");

    // Live global traffic reaches the monitor even though it is unverified.
    send(
        &mut alice,
        json!({
            "event": "client_message",
            "data": {"content": "after monitor", "type": "text", "target": "global"}
        }),
    )
    .await;
    let seen = next_event(&mut monitor, "receive_message").await;
    assert_eq!(seen["content"], "after monitor");
}

#[tokio::test]
async fn operator_messages_users_and_reads_any_room() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    let (uid_a, _) = register_and_login(&mut alice, "alice", "pw").await;

    let mut monitor = connect(addr).await;
    // Not yet a monitor, so this must be ignored.
    send(
        &mut monitor,
        json!({
            "event": "monitor_message",
            "data": {"target": uid_a, "content": "too early"}
        }),
    )
    .await;
    send(&mut monitor, json!({"event": "monitor_join"})).await;
    next_event(&mut monitor, "history_loaded").await;

    send(
        &mut monitor,
        json!({
            "event": "monitor_message",
            "data": {"target": uid_a, "content": "hello from ops"}
        }),
    )
    .await;
    let got = next_event(&mut alice, "receive_message").await;
    assert_eq!(got["sender"], "Admin");
    assert_eq!(got["sender_uid"], "ADMIN");
    assert_eq!(got["content"], "hello from ops");

    // The monitoring audience sees its own traffic.
    let echoed = next_event(&mut monitor, "receive_message").await;
    assert_eq!(echoed["id"], got["id"]);

    // Users can DM the operator back through the advertised uid.
    send(
        &mut alice,
        json!({
            "event": "client_message",
            "data": {"content": "hi ops", "type": "text", "target": "ADMIN"}
        }),
    )
    .await;
    let reply = next_event(&mut monitor, "receive_message").await;
    assert_eq!(reply["content"], "hi ops");

    // Both directions landed in the same pair room, and the pre-join
    // message did not.
    let room = format!("{uid_a}_ADMIN");
    send(
        &mut monitor,
        json!({"event": "monitor_history", "data": {"room": room}}),
    )
    .await;
    let history = next_event(&mut monitor, "monitor_history_loaded").await;
    assert_eq!(history["room"], room.as_str());
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "hello from ops");
    assert_eq!(messages[1]["content"], "hi ops");
}

#[tokio::test]
async fn monitor_join_pushes_the_user_directory_with_live_status() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    register_and_login(&mut alice, "alice", "pw-a").await;
    let mut bob = connect(addr).await;
    let (uid_b, _) = register_and_login(&mut bob, "bob", "pw-b").await;

    // Log bob out and wait until the broadcast roster reflects it, so the
    // monitor joins against a settled registry.
    send(&mut bob, json!({"event": "client_logout"})).await;
    loop {
        let roster = next_event(&mut bob, "update_user_list").await;
        let uids: Vec<&str> = roster
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|u| u["uid"].as_str())
            .collect();
        if !uids.contains(&uid_b.as_str()) {
            break;
        }
    }

    let mut monitor = connect(addr).await;
    send(&mut monitor, json!({"event": "monitor_join"})).await;
    let directory = next_event(&mut monitor, "monitor_user_list").await;
    let entries = directory.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["uid"], "000001");
    assert_eq!(entries[0]["status"], "online");
    assert_eq!(entries[1]["uid"], uid_b.as_str());
    assert_eq!(entries[1]["status"], "offline");
}

#[tokio::test]
async fn profile_update_renames_and_reannounces() {
    let (addr, _dir) = setup_test_server().await;

    let mut alice = connect(addr).await;
    let (uid, _) = register_and_login(&mut alice, "alice", "pw").await;

    send(
        &mut alice,
        json!({
            "event": "update_profile",
            "data": {"new_username": "alicia", "new_avatar": "new.png"}
        }),
    )
    .await;
    let updated = next_event(&mut alice, "verification_success").await;
    assert_eq!(updated["uid"], uid);
    assert_eq!(updated["username"], "alicia");
    assert_eq!(updated["avatar"], "new.png");
    assert!(updated.get("token").is_none());
}

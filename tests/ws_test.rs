//! Integration tests for WebSocket connection, auth, presence, and direct
//! message delivery.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use petzy_chat_server::chat::store;
use petzy_chat_server::ws::registry::ConnectionRegistry;
use petzy_chat_server::ws::rooms::RoomIndex;

/// Start the server on a random port with two seeded users and return
/// (base_url, addr, jwt_secret).
async fn start_test_server() -> (String, SocketAddr, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = petzy_chat_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = petzy_chat_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    store::upsert_user(&db, "alice", "Alice", "active").unwrap();
    store::upsert_user(&db, "bob", "Bob", "active").unwrap();
    store::upsert_user(&db, "mallory", "Mallory", "suspended").unwrap();

    let state = petzy_chat_server::state::AppState {
        db,
        jwt_secret: jwt_secret.clone(),
        registry: Arc::new(ConnectionRegistry::new(2)),
        rooms: Arc::new(RoomIndex::new()),
        data_dir: tmp_dir.path().to_path_buf(),
        max_upload_size_mb: 25,
    };

    let app = petzy_chat_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr, jwt_secret)
}

fn token_for(jwt_secret: &[u8], user_id: &str) -> String {
    petzy_chat_server::auth::jwt::issue_access_token(jwt_secret, user_id, "user")
        .expect("Failed to issue token")
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("WS connect failed");
    stream
}

/// Read the next text frame as JSON, failing after 2 seconds.
async fn next_json(stream: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Stream ended")
            .expect("Socket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(payload) => {
                let _ = stream.send(Message::Pong(payload)).await;
            }
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

/// Read frames until one matches the given event name, skipping others
/// (presence updates arrive interleaved with everything else).
async fn next_event_of(stream: &mut WsStream, event: &str) -> serde_json::Value {
    for _ in 0..10 {
        let value = next_json(stream).await;
        if value["event"] == event {
            return value;
        }
    }
    panic!("Never saw event {}", event);
}

async fn expect_close_code(addr: SocketAddr, token: &str, expected: u16) {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("WS connect failed");
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("Timed out waiting for close")
            .expect("Stream ended without close");
        match msg {
            Ok(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), expected);
                return;
            }
            Ok(_) => continue,
            Err(_) => return, // connection dropped after close
        }
    }
}

#[tokio::test]
async fn connect_receives_connected_event() {
    let (_base, addr, secret) = start_test_server().await;
    let mut ws = connect(addr, &token_for(&secret, "alice")).await;

    let connected = next_event_of(&mut ws, "connected").await;
    assert_eq!(connected["data"]["user_id"], "alice");
}

#[tokio::test]
async fn invalid_token_is_closed_with_4002() {
    let (_base, addr, _secret) = start_test_server().await;
    expect_close_code(addr, "not-a-jwt", 4002).await;
}

#[tokio::test]
async fn expired_token_is_closed_with_4001() {
    let (_base, addr, secret) = start_test_server().await;

    // Hand-craft a token that expired an hour ago.
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "sub": "alice",
        "role": "user",
        "iat": now - 7200,
        "exp": now - 3600,
    });
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(&secret),
    )
    .unwrap();

    expect_close_code(addr, &token, 4001).await;
}

#[tokio::test]
async fn suspended_user_is_closed_with_4003() {
    let (_base, addr, secret) = start_test_server().await;
    expect_close_code(addr, &token_for(&secret, "mallory"), 4003).await;
}

#[tokio::test]
async fn unknown_user_is_closed_with_4002() {
    let (_base, addr, secret) = start_test_server().await;
    expect_close_code(addr, &token_for(&secret, "ghost"), 4002).await;
}

#[tokio::test]
async fn presence_goes_online_and_offline() {
    let (_base, addr, secret) = start_test_server().await;

    let mut alice = connect(addr, &token_for(&secret, "alice")).await;
    next_event_of(&mut alice, "connected").await;

    let mut bob = connect(addr, &token_for(&secret, "bob")).await;
    next_event_of(&mut bob, "connected").await;

    let presence = next_event_of(&mut alice, "presence").await;
    assert_eq!(presence["data"]["user_id"], "bob");
    assert_eq!(presence["data"]["online"], true);

    bob.close(None).await.unwrap();

    let presence = next_event_of(&mut alice, "presence").await;
    assert_eq!(presence["data"]["user_id"], "bob");
    assert_eq!(presence["data"]["online"], false);
}

#[tokio::test]
async fn second_connection_does_not_retrigger_presence() {
    let (_base, addr, secret) = start_test_server().await;

    let mut alice = connect(addr, &token_for(&secret, "alice")).await;
    next_event_of(&mut alice, "connected").await;

    let mut bob1 = connect(addr, &token_for(&secret, "bob")).await;
    next_event_of(&mut bob1, "connected").await;
    next_event_of(&mut alice, "presence").await;

    // Second device for bob; dropping it must not mark bob offline.
    let mut bob2 = connect(addr, &token_for(&secret, "bob")).await;
    next_event_of(&mut bob2, "connected").await;
    bob2.close(None).await.unwrap();

    // Only when the last connection drops does alice see offline.
    bob1.close(None).await.unwrap();
    let presence = next_event_of(&mut alice, "presence").await;
    assert_eq!(presence["data"]["online"], false);
}

#[tokio::test]
async fn backend_provisioned_user_can_connect() {
    let (base, addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();

    // dave is unknown until the platform backend pushes his record.
    expect_close_code(addr, &token_for(&secret, "dave"), 4002).await;

    let service_token =
        petzy_chat_server::auth::jwt::issue_access_token(&secret, "petzy-backend", "service")
            .unwrap();
    let status = client
        .put(format!("{}/api/users/dave", base))
        .bearer_auth(&service_token)
        .json(&json!({ "display_name": "Dave" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 204);

    let mut dave = connect(addr, &token_for(&secret, "dave")).await;
    let connected = next_event_of(&mut dave, "connected").await;
    assert_eq!(connected["data"]["user_id"], "dave");
}

#[tokio::test]
async fn user_provisioning_requires_a_service_token() {
    let (base, addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();

    let status = client
        .put(format!("{}/api/users/eve", base))
        .bearer_auth(token_for(&secret, "alice"))
        .json(&json!({ "display_name": "Eve" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 403);

    // A status update through the same endpoint locks the account out of
    // future handshakes.
    let service_token =
        petzy_chat_server::auth::jwt::issue_access_token(&secret, "petzy-backend", "service")
            .unwrap();
    let status = client
        .put(format!("{}/api/users/bob", base))
        .bearer_auth(&service_token)
        .json(&json!({ "display_name": "Bob", "status": "suspended" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 204);
    expect_close_code(addr, &token_for(&secret, "bob"), 4003).await;
}

#[tokio::test]
async fn new_connection_receives_a_presence_snapshot() {
    let (_base, addr, secret) = start_test_server().await;

    let mut alice = connect(addr, &token_for(&secret, "alice")).await;
    next_event_of(&mut alice, "connected").await;

    // Bob connects second and learns alice is already online without having
    // to observe a transition.
    let mut bob = connect(addr, &token_for(&secret, "bob")).await;
    next_event_of(&mut bob, "connected").await;

    let snapshot = next_event_of(&mut bob, "presence").await;
    assert_eq!(snapshot["data"]["user_id"], "alice");
    assert_eq!(snapshot["data"]["online"], true);
}

#[tokio::test]
async fn direct_message_reaches_peer_and_acks_sender() {
    let (base, addr, secret) = start_test_server().await;
    let alice_token = token_for(&secret, "alice");
    let bob_token = token_for(&secret, "bob");

    let client = reqwest::Client::new();
    let conv: serde_json::Value = client
        .post(format!("{}/api/chat/conversations", base))
        .bearer_auth(&alice_token)
        .json(&json!({ "peer_id": "bob" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let conv_id = conv["id"].as_str().unwrap().to_string();

    let mut alice = connect(addr, &alice_token).await;
    next_event_of(&mut alice, "connected").await;
    let mut bob = connect(addr, &bob_token).await;
    next_event_of(&mut bob, "connected").await;

    let send = json!({
        "event": "send_message",
        "data": {
            "room_id": conv_id,
            "body": "hi bob",
            "temp_id": "temp-abc"
        }
    });
    alice
        .send(Message::Text(send.to_string().into()))
        .await
        .unwrap();

    // Sender gets the ack carrying the temp id.
    let ack = next_event_of(&mut alice, "new_message").await;
    assert_eq!(ack["data"]["temp_id"], "temp-abc");
    assert_eq!(ack["data"]["message"]["body"], "hi bob");
    assert_eq!(ack["data"]["message"]["server_sequence"], 1);

    // Peer gets the message without a temp id.
    let delivery = next_event_of(&mut bob, "new_message").await;
    assert!(delivery["data"].get("temp_id").is_none());
    assert_eq!(delivery["data"]["message"]["sender_id"], "alice");
    assert_eq!(delivery["data"]["message"]["sender_name"], "Alice");
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let (base, addr, secret) = start_test_server().await;
    let alice_token = token_for(&secret, "alice");
    let bob_token = token_for(&secret, "bob");

    let client = reqwest::Client::new();
    let conv: serde_json::Value = client
        .post(format!("{}/api/chat/conversations", base))
        .bearer_auth(&alice_token)
        .json(&json!({ "peer_id": "bob" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let conv_id = conv["id"].as_str().unwrap().to_string();

    let mut alice = connect(addr, &alice_token).await;
    next_event_of(&mut alice, "connected").await;
    let mut bob = connect(addr, &bob_token).await;
    next_event_of(&mut bob, "connected").await;

    for i in 1..=3 {
        let send = json!({
            "event": "send_message",
            "data": { "room_id": conv_id, "body": format!("m{}", i), "temp_id": format!("t{}", i) }
        });
        alice
            .send(Message::Text(send.to_string().into()))
            .await
            .unwrap();
    }

    for i in 1..=3 {
        let delivery = next_event_of(&mut bob, "new_message").await;
        assert_eq!(delivery["data"]["message"]["body"], format!("m{}", i));
        assert_eq!(delivery["data"]["message"]["server_sequence"], i);
    }
}

#[tokio::test]
async fn send_to_unknown_room_returns_404_error_event() {
    let (_base, addr, secret) = start_test_server().await;
    let mut alice = connect(addr, &token_for(&secret, "alice")).await;
    next_event_of(&mut alice, "connected").await;

    let send = json!({
        "event": "send_message",
        "data": { "room_id": "no-such-room", "body": "hi", "temp_id": "t1" }
    });
    alice
        .send(Message::Text(send.to_string().into()))
        .await
        .unwrap();

    let error = next_event_of(&mut alice, "error").await;
    assert_eq!(error["data"]["code"], 404);
    assert_eq!(error["data"]["temp_id"], "t1");
}

#[tokio::test]
async fn connection_cap_evicts_the_oldest() {
    // Registry cap is 2 in the test harness.
    let (_base, addr, secret) = start_test_server().await;
    let token = token_for(&secret, "alice");

    let mut first = connect(addr, &token).await;
    next_event_of(&mut first, "connected").await;
    let mut second = connect(addr, &token).await;
    next_event_of(&mut second, "connected").await;

    let mut third = connect(addr, &token).await;
    next_event_of(&mut third, "connected").await;

    // The first connection is closed with the eviction code.
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), first.next())
            .await
            .expect("Timed out waiting for eviction")
            .expect("Stream ended without close");
        match msg {
            Ok(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 4006);
                break;
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

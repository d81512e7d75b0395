//! Integration tests for the conversation and message-history REST surface.

use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use petzy_chat_server::chat::store;
use petzy_chat_server::db::DbPool;
use petzy_chat_server::ws::registry::ConnectionRegistry;
use petzy_chat_server::ws::rooms::RoomIndex;

async fn start_test_server() -> (String, Vec<u8>, DbPool) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = petzy_chat_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = petzy_chat_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    store::upsert_user(&db, "alice", "Alice", "active").unwrap();
    store::upsert_user(&db, "bob", "Bob", "active").unwrap();
    store::upsert_user(&db, "carol", "Carol", "active").unwrap();

    let state = petzy_chat_server::state::AppState {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        registry: Arc::new(ConnectionRegistry::new(8)),
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

    (format!("http://{}", addr), jwt_secret, db)
}

fn token_for(jwt_secret: &[u8], user_id: &str) -> String {
    petzy_chat_server::auth::jwt::issue_access_token(jwt_secret, user_id, "user")
        .expect("Failed to issue token")
}

#[tokio::test]
async fn create_conversation_is_idempotent_across_directions() {
    let (base, secret, _db) = start_test_server().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{}/api/chat/conversations", base))
        .bearer_auth(token_for(&secret, "alice"))
        .json(&json!({ "peer_id": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);
    let first: serde_json::Value = first.json().await.unwrap();

    // Bob initiating toward alice resolves to the same conversation.
    let second = client
        .post(format!("{}/api/chat/conversations", base))
        .bearer_auth(token_for(&secret, "bob"))
        .json(&json!({ "peer_id": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 200);
    let second: serde_json::Value = second.json().await.unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["participant_a"], "alice");
    assert_eq!(first["participant_b"], "bob");
}

#[tokio::test]
async fn conversation_with_self_or_unknown_peer_is_rejected() {
    let (base, secret, _db) = start_test_server().await;
    let client = reqwest::Client::new();
    let token = token_for(&secret, "alice");

    let status = client
        .post(format!("{}/api/chat/conversations", base))
        .bearer_auth(&token)
        .json(&json!({ "peer_id": "alice" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 400);

    let status = client
        .post(format!("{}/api/chat/conversations", base))
        .bearer_auth(&token)
        .json(&json!({ "peer_id": "ghost" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 404);
}

#[tokio::test]
async fn list_conversations_requires_auth() {
    let (base, _secret, _db) = start_test_server().await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!("{}/api/chat/conversations", base))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 401);
}

#[tokio::test]
async fn history_pages_backward_with_a_sequence_cursor() {
    let (base, secret, db) = start_test_server().await;
    let client = reqwest::Client::new();
    let token = token_for(&secret, "alice");

    let (conv, _) = store::find_or_create_conversation(&db, "alice", "bob").unwrap();
    for i in 1..=5 {
        store::create_direct_message(&db, &conv.id, "alice", &format!("m{}", i), &[]).unwrap();
    }

    let page: serde_json::Value = client
        .get(format!("{}/api/chat/messages/{}?limit=3", base, conv.id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let messages = page["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert!(page["has_more"].as_bool().unwrap());
    // Newest first
    assert_eq!(messages[0]["body"], "m5");
    assert_eq!(messages[2]["body"], "m3");

    let cursor = messages[2]["server_sequence"].as_u64().unwrap();
    let rest: serde_json::Value = client
        .get(format!(
            "{}/api/chat/messages/{}?limit=3&before={}",
            base, conv.id, cursor
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let messages = rest["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!rest["has_more"].as_bool().unwrap());
    assert_eq!(messages[0]["body"], "m2");
    assert_eq!(messages[1]["body"], "m1");
}

#[tokio::test]
async fn history_is_denied_to_outsiders() {
    let (base, secret, db) = start_test_server().await;
    let client = reqwest::Client::new();

    let (conv, _) = store::find_or_create_conversation(&db, "alice", "bob").unwrap();

    let status = client
        .get(format!("{}/api/chat/messages/{}", base, conv.id))
        .bearer_auth(token_for(&secret, "carol"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 403);

    let status = client
        .get(format!("{}/api/chat/messages/unknown-room", base))
        .bearer_auth(token_for(&secret, "carol"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 404);
}

#[tokio::test]
async fn conversations_sort_by_latest_activity() {
    let (base, secret, db) = start_test_server().await;
    let client = reqwest::Client::new();

    let (with_bob, _) = store::find_or_create_conversation(&db, "alice", "bob").unwrap();
    let (with_carol, _) = store::find_or_create_conversation(&db, "alice", "carol").unwrap();
    store::create_direct_message(&db, &with_bob.id, "bob", "newest activity", &[]).unwrap();

    let list: serde_json::Value = client
        .get(format!("{}/api/chat/conversations", base))
        .bearer_auth(token_for(&secret, "alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    // The conversation with a message sorts before the idle one.
    assert_eq!(list[0]["id"], json!(with_bob.id));
    assert_eq!(list[1]["id"], json!(with_carol.id));
}

//! Persistence gateway: every durable read and write the messaging core
//! performs goes through these synchronous rusqlite functions.
//!
//! All functions lock the shared connection and must be called via
//! `tokio::task::spawn_blocking` from async context — persistence calls are
//! the only operations that suspend a socket handler.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::ChatError;
use crate::ws::protocol::{ChatMessage, Conversation, RoomKind};

/// Default page size for message history.
pub const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
pub const MAX_LIMIT: u32 = 100;

/// What a room id resolves to. Conversation ids and community ids share one
/// namespace; a given id is at most one of the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedRoom {
    Direct {
        participant_a: String,
        participant_b: String,
    },
    Community,
}

/// A community as returned by the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentMeta {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

fn lock(db: &DbPool) -> Result<MutexGuard<'_, Connection>, ChatError> {
    db.lock()
        .map_err(|e| ChatError::Persistence(format!("DB lock poisoned: {e}")))
}

/// Exclusive upper bound for a history page. Sequences are stored as
/// SQLite INTEGER, so the open-ended cursor must stay within i64 range
/// rather than wrap negative on the cast.
fn cursor_bound(before: Option<u64>) -> i64 {
    before.unwrap_or(u64::MAX).min(i64::MAX as u64) as i64
}

// --- Users ---

/// Create or update a user record. User identity is owned by the platform
/// backend; this service only mirrors what it needs for display names and
/// the connect-time status check.
pub fn upsert_user(
    db: &DbPool,
    user_id: &str,
    display_name: &str,
    status: &str,
) -> Result<(), ChatError> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO users (id, display_name, status) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             status = excluded.status,
             updated_at = datetime('now')",
        rusqlite::params![user_id, display_name, status],
    )?;
    Ok(())
}

/// Account status for the handshake check. None for unknown users.
pub fn user_status(db: &DbPool, user_id: &str) -> Result<Option<String>, ChatError> {
    let conn = lock(db)?;
    match conn.query_row(
        "SELECT status FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| row.get(0),
    ) {
        Ok(status) => Ok(Some(status)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn display_name(conn: &Connection, user_id: &str) -> Result<String, ChatError> {
    conn.query_row(
        "SELECT display_name FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| row.get(0),
    )
    .map_err(|_| ChatError::NotFound(format!("user {user_id}")))
}

// --- Conversations ---

/// Canonicalize the unordered participant pair: the lexicographically
/// smaller user id is always participant_a, so both initiation directions
/// map to the same row.
fn canonical_pair<'a>(user_a: &'a str, user_b: &'a str) -> (&'a str, &'a str) {
    if user_a < user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

/// Create or get the conversation between two users. Returns the
/// conversation and whether it was newly created.
pub fn find_or_create_conversation(
    db: &DbPool,
    user_id: &str,
    peer_id: &str,
) -> Result<(Conversation, bool), ChatError> {
    if user_id == peer_id {
        return Err(ChatError::Malformed(
            "cannot start a conversation with yourself".to_string(),
        ));
    }

    let conn = lock(db)?;
    let my_name = display_name(&conn, user_id)
        .map_err(|_| ChatError::Persistence(format!("sender {user_id} missing")))?;
    let peer_name = display_name(&conn, peer_id)?;

    let (a, b) = canonical_pair(user_id, peer_id);
    let (name_a, name_b) = if a == user_id {
        (my_name, peer_name)
    } else {
        (peer_name, my_name)
    };

    let existing: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, created_at, last_message_at FROM conversations
             WHERE participant_a = ?1 AND participant_b = ?2",
            rusqlite::params![a, b],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok();

    if let Some((id, created_at, last_message_at)) = existing {
        return Ok((
            Conversation {
                id,
                participant_a: a.to_string(),
                participant_b: b.to_string(),
                participant_a_name: name_a,
                participant_b_name: name_b,
                created_at,
                last_message_at,
            },
            false,
        ));
    }

    let conv_id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO conversations (id, participant_a, participant_b) VALUES (?1, ?2, ?3)",
        rusqlite::params![conv_id, a, b],
    )?;
    let created_at: String = conn.query_row(
        "SELECT created_at FROM conversations WHERE id = ?1",
        rusqlite::params![conv_id],
        |row| row.get(0),
    )?;

    Ok((
        Conversation {
            id: conv_id,
            participant_a: a.to_string(),
            participant_b: b.to_string(),
            participant_a_name: name_a,
            participant_b_name: name_b,
            created_at,
            last_message_at: None,
        },
        true,
    ))
}

/// All conversations a user participates in, most recent activity first.
pub fn list_conversations(db: &DbPool, user_id: &str) -> Result<Vec<Conversation>, ChatError> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.participant_a, c.participant_b, c.created_at, c.last_message_at,
                ua.display_name, ub.display_name
         FROM conversations c
         LEFT JOIN users ua ON ua.id = c.participant_a
         LEFT JOIN users ub ON ub.id = c.participant_b
         WHERE c.participant_a = ?1 OR c.participant_b = ?1
         ORDER BY CASE WHEN c.last_message_at IS NULL THEN 1 ELSE 0 END,
                  c.last_message_at DESC,
                  c.created_at DESC",
    )?;

    let conversations = stmt
        .query_map(rusqlite::params![user_id], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                participant_a: row.get(1)?,
                participant_b: row.get(2)?,
                created_at: row.get(3)?,
                last_message_at: row.get(4)?,
                participant_a_name: row
                    .get::<_, Option<String>>(5)?
                    .unwrap_or_else(|| "Unknown".to_string()),
                participant_b_name: row
                    .get::<_, Option<String>>(6)?
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(conversations)
}

/// Participant pair of a conversation, None for unknown ids.
pub fn conversation_participants(
    db: &DbPool,
    conversation_id: &str,
) -> Result<Option<(String, String)>, ChatError> {
    let conn = lock(db)?;
    match conn.query_row(
        "SELECT participant_a, participant_b FROM conversations WHERE id = ?1",
        rusqlite::params![conversation_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    ) {
        Ok(pair) => Ok(Some(pair)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve a room id to its kind. Conversation and community ids live in
/// one namespace; unknown ids resolve to None.
pub fn resolve_room(db: &DbPool, room_id: &str) -> Result<Option<ResolvedRoom>, ChatError> {
    if let Some((participant_a, participant_b)) = conversation_participants(db, room_id)? {
        return Ok(Some(ResolvedRoom::Direct {
            participant_a,
            participant_b,
        }));
    }

    let conn = lock(db)?;
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM communities WHERE id = ?1)",
        rusqlite::params![room_id],
        |row| row.get(0),
    )?;
    Ok(exists.then_some(ResolvedRoom::Community))
}

// --- Messages ---

fn encode_attachments(attachments: &[String]) -> Result<String, ChatError> {
    serde_json::to_string(attachments)
        .map_err(|e| ChatError::Persistence(format!("attachment encode: {e}")))
}

fn decode_attachments(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Persist a direct message. The caller has already verified the sender is
/// a participant. Assigns the next per-conversation server_sequence and
/// bumps the conversation's last_message_at.
pub fn create_direct_message(
    db: &DbPool,
    conversation_id: &str,
    sender_id: &str,
    body: &str,
    attachments: &[String],
) -> Result<ChatMessage, ChatError> {
    let conn = lock(db)?;
    let sender_name = display_name(&conn, sender_id)?;

    let msg_id = Uuid::now_v7().to_string();
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(server_sequence), 0) + 1 FROM messages WHERE conversation_id = ?1",
        rusqlite::params![conversation_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, body, attachments, server_sequence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            msg_id,
            conversation_id,
            sender_id,
            body,
            encode_attachments(attachments)?,
            next_seq,
        ],
    )?;

    conn.execute(
        "UPDATE conversations SET last_message_at = datetime('now') WHERE id = ?1",
        rusqlite::params![conversation_id],
    )?;

    let created_at: String = conn.query_row(
        "SELECT created_at FROM messages WHERE id = ?1",
        rusqlite::params![msg_id],
        |row| row.get(0),
    )?;

    Ok(ChatMessage {
        id: msg_id,
        room_id: conversation_id.to_string(),
        room_kind: RoomKind::Direct,
        sender_id: sender_id.to_string(),
        sender_name,
        body: body.to_string(),
        attachments: attachments.to_vec(),
        message_type: "USER".to_string(),
        server_sequence: next_seq as u64,
        created_at,
    })
}

/// Persist a community message ('USER') or membership notice ('ACTION');
/// both share the per-community sequence so history interleaves them in
/// order.
pub fn create_community_message(
    db: &DbPool,
    community_id: &str,
    sender_id: &str,
    body: &str,
    attachments: &[String],
    message_type: &str,
) -> Result<ChatMessage, ChatError> {
    let conn = lock(db)?;
    let sender_name = display_name(&conn, sender_id)?;

    let msg_id = Uuid::now_v7().to_string();
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(server_sequence), 0) + 1 FROM community_messages
         WHERE community_id = ?1",
        rusqlite::params![community_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO community_messages
             (id, community_id, sender_id, body, attachments, message_type, server_sequence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            msg_id,
            community_id,
            sender_id,
            body,
            encode_attachments(attachments)?,
            message_type,
            next_seq,
        ],
    )?;

    let created_at: String = conn.query_row(
        "SELECT created_at FROM community_messages WHERE id = ?1",
        rusqlite::params![msg_id],
        |row| row.get(0),
    )?;

    Ok(ChatMessage {
        id: msg_id,
        room_id: community_id.to_string(),
        room_kind: RoomKind::Community,
        sender_id: sender_id.to_string(),
        sender_name,
        body: body.to_string(),
        attachments: attachments.to_vec(),
        message_type: message_type.to_string(),
        server_sequence: next_seq as u64,
        created_at,
    })
}

/// Paginated direct-message history, newest first. Returns one page and
/// whether older messages remain.
pub fn direct_history(
    db: &DbPool,
    conversation_id: &str,
    before: Option<u64>,
    limit: Option<u32>,
) -> Result<(Vec<ChatMessage>, bool), ChatError> {
    let before = cursor_bound(before);
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.sender_id, m.body, m.attachments, m.server_sequence, m.created_at,
                u.display_name
         FROM messages m
         LEFT JOIN users u ON u.id = m.sender_id
         WHERE m.conversation_id = ?1 AND m.server_sequence < ?2
         ORDER BY m.server_sequence DESC
         LIMIT ?3",
    )?;

    let messages: Vec<ChatMessage> = stmt
        .query_map(
            rusqlite::params![conversation_id, before, (limit + 1) as i64],
            |row| {
                let attachments: String = row.get(3)?;
                let seq: i64 = row.get(4)?;
                Ok(ChatMessage {
                    id: row.get(0)?,
                    room_id: conversation_id.to_string(),
                    room_kind: RoomKind::Direct,
                    sender_id: row.get(1)?,
                    sender_name: row
                        .get::<_, Option<String>>(6)?
                        .unwrap_or_else(|| "Unknown".to_string()),
                    body: row.get(2)?,
                    attachments: decode_attachments(&attachments),
                    message_type: "USER".to_string(),
                    server_sequence: seq as u64,
                    created_at: row.get(5)?,
                })
            },
        )?
        .filter_map(|r| r.ok())
        .collect();

    let has_more = messages.len() > limit as usize;
    Ok((
        messages.into_iter().take(limit as usize).collect(),
        has_more,
    ))
}

/// Paginated community history, newest first; interleaves USER and ACTION
/// messages in sequence order.
pub fn community_history(
    db: &DbPool,
    community_id: &str,
    before: Option<u64>,
    limit: Option<u32>,
) -> Result<(Vec<ChatMessage>, bool), ChatError> {
    let before = cursor_bound(before);
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.sender_id, m.body, m.attachments, m.message_type, m.server_sequence,
                m.created_at, u.display_name
         FROM community_messages m
         LEFT JOIN users u ON u.id = m.sender_id
         WHERE m.community_id = ?1 AND m.server_sequence < ?2
         ORDER BY m.server_sequence DESC
         LIMIT ?3",
    )?;

    let messages: Vec<ChatMessage> = stmt
        .query_map(
            rusqlite::params![community_id, before, (limit + 1) as i64],
            |row| {
                let attachments: String = row.get(3)?;
                let seq: i64 = row.get(5)?;
                Ok(ChatMessage {
                    id: row.get(0)?,
                    room_id: community_id.to_string(),
                    room_kind: RoomKind::Community,
                    sender_id: row.get(1)?,
                    sender_name: row
                        .get::<_, Option<String>>(7)?
                        .unwrap_or_else(|| "Unknown".to_string()),
                    body: row.get(2)?,
                    attachments: decode_attachments(&attachments),
                    message_type: row.get(4)?,
                    server_sequence: seq as u64,
                    created_at: row.get(6)?,
                })
            },
        )?
        .filter_map(|r| r.ok())
        .collect();

    let has_more = messages.len() > limit as usize;
    Ok((
        messages.into_iter().take(limit as usize).collect(),
        has_more,
    ))
}

// --- Communities ---

pub fn create_community(
    db: &DbPool,
    name: &str,
    description: Option<&str>,
    owner_id: &str,
) -> Result<Community, ChatError> {
    let conn = lock(db)?;
    // Owner must exist before we hand them a community
    display_name(&conn, owner_id)?;

    let community_id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO communities (id, name, description, owner_id) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![community_id, name, description, owner_id],
    )?;
    conn.execute(
        "INSERT INTO community_members (community_id, user_id) VALUES (?1, ?2)",
        rusqlite::params![community_id, owner_id],
    )?;

    let created_at: String = conn.query_row(
        "SELECT created_at FROM communities WHERE id = ?1",
        rusqlite::params![community_id],
        |row| row.get(0),
    )?;

    Ok(Community {
        id: community_id,
        name: name.to_string(),
        description: description.map(|s| s.to_string()),
        owner_id: owner_id.to_string(),
        created_at,
    })
}

/// Communities the user is a member of.
pub fn list_communities(db: &DbPool, user_id: &str) -> Result<Vec<Community>, ChatError> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.description, c.owner_id, c.created_at
         FROM communities c
         JOIN community_members m ON m.community_id = c.id
         WHERE m.user_id = ?1
         ORDER BY c.created_at DESC",
    )?;

    let communities = stmt
        .query_map(rusqlite::params![user_id], |row| {
            Ok(Community {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                owner_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(communities)
}

pub fn community_owner(db: &DbPool, community_id: &str) -> Result<Option<String>, ChatError> {
    let conn = lock(db)?;
    match conn.query_row(
        "SELECT owner_id FROM communities WHERE id = ?1",
        rusqlite::params![community_id],
        |row| row.get(0),
    ) {
        Ok(owner) => Ok(Some(owner)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn is_community_member(
    db: &DbPool,
    community_id: &str,
    user_id: &str,
) -> Result<bool, ChatError> {
    let conn = lock(db)?;
    let is_member: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM community_members WHERE community_id = ?1 AND user_id = ?2
         )",
        rusqlite::params![community_id, user_id],
        |row| row.get(0),
    )?;
    Ok(is_member)
}

/// Add a member. Returns false if already a member.
pub fn add_member(db: &DbPool, community_id: &str, user_id: &str) -> Result<bool, ChatError> {
    let conn = lock(db)?;
    display_name(&conn, user_id)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO community_members (community_id, user_id) VALUES (?1, ?2)",
        rusqlite::params![community_id, user_id],
    )?;
    Ok(inserted > 0)
}

/// Remove a member. Returns false if they were not a member.
pub fn remove_member(db: &DbPool, community_id: &str, user_id: &str) -> Result<bool, ChatError> {
    let conn = lock(db)?;
    let removed = conn.execute(
        "DELETE FROM community_members WHERE community_id = ?1 AND user_id = ?2",
        rusqlite::params![community_id, user_id],
    )?;
    Ok(removed > 0)
}

// --- Attachments ---

pub fn record_attachment(
    db: &DbPool,
    id: &str,
    owner_id: &str,
    file_name: &str,
    content_type: &str,
    size: u64,
) -> Result<(), ChatError> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO attachments (id, owner_id, file_name, content_type, size)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, owner_id, file_name, content_type, size as i64],
    )?;
    Ok(())
}

pub fn attachment_meta(db: &DbPool, id: &str) -> Result<Option<AttachmentMeta>, ChatError> {
    let conn = lock(db)?;
    match conn.query_row(
        "SELECT id, owner_id, file_name, content_type, size FROM attachments WHERE id = ?1",
        rusqlite::params![id],
        |row| {
            let size: i64 = row.get(4)?;
            Ok(AttachmentMeta {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                file_name: row.get(2)?,
                content_type: row.get(3)?,
                size: size as u64,
            })
        },
    ) {
        Ok(meta) => Ok(Some(meta)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn test_db() -> DbPool {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::db::migrations::migrations().to_latest(&mut conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        upsert_user(&db, "alice", "Alice", "active").unwrap();
        upsert_user(&db, "bob", "Bob", "active").unwrap();
        upsert_user(&db, "carol", "Carol", "active").unwrap();
        db
    }

    #[test]
    fn conversation_pair_is_canonical() {
        let db = test_db();
        let (c1, created1) = find_or_create_conversation(&db, "bob", "alice").unwrap();
        let (c2, created2) = find_or_create_conversation(&db, "alice", "bob").unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(c1.id, c2.id);
        assert_eq!(c1.participant_a, "alice");
        assert_eq!(c1.participant_b, "bob");
    }

    #[test]
    fn self_conversation_is_rejected() {
        let db = test_db();
        let err = find_or_create_conversation(&db, "alice", "alice").unwrap_err();
        assert!(matches!(err, ChatError::Malformed(_)));
    }

    #[test]
    fn unknown_peer_is_not_found() {
        let db = test_db();
        let err = find_or_create_conversation(&db, "alice", "ghost").unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn direct_messages_get_increasing_sequence() {
        let db = test_db();
        let (conv, _) = find_or_create_conversation(&db, "alice", "bob").unwrap();
        let m1 = create_direct_message(&db, &conv.id, "alice", "one", &[]).unwrap();
        let m2 = create_direct_message(&db, &conv.id, "alice", "two", &[]).unwrap();

        assert_eq!(m1.server_sequence, 1);
        assert_eq!(m2.server_sequence, 2);
        assert_eq!(m1.sender_name, "Alice");
    }

    #[test]
    fn history_paginates_newest_first() {
        let db = test_db();
        let (conv, _) = find_or_create_conversation(&db, "alice", "bob").unwrap();
        for i in 0..5 {
            create_direct_message(&db, &conv.id, "alice", &format!("m{i}"), &[]).unwrap();
        }

        let (page, has_more) = direct_history(&db, &conv.id, None, Some(3)).unwrap();
        assert_eq!(page.len(), 3);
        assert!(has_more);
        assert_eq!(page[0].body, "m4");

        let oldest_seq = page.last().unwrap().server_sequence;
        let (rest, has_more) = direct_history(&db, &conv.id, Some(oldest_seq), Some(3)).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(!has_more);
    }

    #[test]
    fn history_without_cursor_returns_latest_page() {
        let db = test_db();
        let (conv, _) = find_or_create_conversation(&db, "alice", "bob").unwrap();
        create_direct_message(&db, &conv.id, "alice", "hello", &[]).unwrap();

        let (page, has_more) = direct_history(&db, &conv.id, None, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].body, "hello");
        assert!(!has_more);

        let community = create_community(&db, "Cat cafe", None, "alice").unwrap();
        create_community_message(&db, &community.id, "alice", "hi all", &[], "USER").unwrap();

        let (page, _) = community_history(&db, &community.id, None, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].body, "hi all");
    }

    #[test]
    fn resolve_room_distinguishes_kinds() {
        let db = test_db();
        let (conv, _) = find_or_create_conversation(&db, "alice", "bob").unwrap();
        let community = create_community(&db, "Dog owners", None, "alice").unwrap();

        assert!(matches!(
            resolve_room(&db, &conv.id).unwrap(),
            Some(ResolvedRoom::Direct { .. })
        ));
        assert_eq!(
            resolve_room(&db, &community.id).unwrap(),
            Some(ResolvedRoom::Community)
        );
        assert_eq!(resolve_room(&db, "nope").unwrap(), None);
    }

    #[test]
    fn community_membership_lifecycle() {
        let db = test_db();
        let community = create_community(&db, "Dog owners", None, "alice").unwrap();

        // Creator is a member
        assert!(is_community_member(&db, &community.id, "alice").unwrap());

        assert!(add_member(&db, &community.id, "bob").unwrap());
        assert!(!add_member(&db, &community.id, "bob").unwrap());
        assert!(is_community_member(&db, &community.id, "bob").unwrap());

        assert!(remove_member(&db, &community.id, "bob").unwrap());
        assert!(!remove_member(&db, &community.id, "bob").unwrap());
        assert!(!is_community_member(&db, &community.id, "bob").unwrap());
    }

    #[test]
    fn action_messages_share_the_sequence() {
        let db = test_db();
        let community = create_community(&db, "Dog owners", None, "alice").unwrap();
        add_member(&db, &community.id, "bob").unwrap();

        let m1 = create_community_message(&db, &community.id, "alice", "hello", &[], "USER").unwrap();
        let m2 =
            create_community_message(&db, &community.id, "bob", "Bob joined", &[], "ACTION").unwrap();

        assert_eq!(m1.server_sequence, 1);
        assert_eq!(m2.server_sequence, 2);

        let (page, _) = community_history(&db, &community.id, None, None).unwrap();
        assert_eq!(page[0].message_type, "ACTION");
        assert_eq!(page[1].message_type, "USER");
    }

    #[test]
    fn attachments_round_trip_through_messages() {
        let db = test_db();
        let (conv, _) = find_or_create_conversation(&db, "alice", "bob").unwrap();
        let ids = vec!["att-1".to_string(), "att-2".to_string()];
        create_direct_message(&db, &conv.id, "alice", "see photos", &ids).unwrap();

        let (page, _) = direct_history(&db, &conv.id, None, None).unwrap();
        assert_eq!(page[0].attachments, ids);
    }
}

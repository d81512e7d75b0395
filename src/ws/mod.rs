pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod router;

/// Identifier of one live transport-level connection. A user may own many.
pub type ConnectionId = uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = tokio::sync::mpsc::UnboundedSender<axum::extract::ws::Message>;

/// WebSocket close codes.
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = account suspended
/// 4006 = evicted (per-user connection cap exceeded)
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_SUSPENDED: u16 = 4003;
pub const CLOSE_EVICTED: u16 = 4006;

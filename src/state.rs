use std::path::PathBuf;
use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::rooms::RoomIndex;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub jwt_secret: Vec<u8>,
    /// Live socket connections, keyed both ways (user -> connections,
    /// connection -> user).
    pub registry: Arc<ConnectionRegistry>,
    /// Room subscriptions for connections that have joined rooms.
    pub rooms: Arc<RoomIndex>,
    pub data_dir: PathBuf,
    pub max_upload_size_mb: u64,
}

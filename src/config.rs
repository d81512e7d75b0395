use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Petzy real-time messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "petzy-chat-server", version, about = "Petzy real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PETZY_CHAT_PORT", default_value = "4100")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PETZY_CHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./petzy-chat.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PETZY_CHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT secret, attachments)
    #[arg(long, env = "PETZY_CHAT_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Maximum concurrent WebSocket connections per user.
    /// Registering beyond the cap evicts the oldest connection.
    #[arg(long, env = "PETZY_CHAT_MAX_CONNECTIONS_PER_USER", default_value = "8")]
    pub max_connections_per_user: usize,

    /// Maximum attachment upload size in megabytes
    #[arg(long, env = "PETZY_CHAT_MAX_UPLOAD_SIZE_MB", default_value = "25")]
    pub max_upload_size_mb: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4100,
            bind_address: "0.0.0.0".to_string(),
            config: "./petzy-chat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            max_connections_per_user: 8,
            max_upload_size_mb: 25,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PETZY_CHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PETZY_CHAT_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Petzy chat server configuration
# Place this file at ./petzy-chat.toml or specify with --config <path>
# All settings can be overridden via environment variables (PETZY_CHAT_PORT,
# etc.) or CLI flags (--port, etc.)

# Server port (default: 4100)
# port = 4100

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database, JWT signing key and attachments
# data_dir = "./data"

# Maximum concurrent WebSocket connections per user (multi-tab/multi-device).
# The oldest connection is evicted when the cap is exceeded.
# max_connections_per_user = 8

# Maximum attachment upload size in megabytes
# max_upload_size_mb = 25
"#
    .to_string()
}

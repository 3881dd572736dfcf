//! Command-line and environment configuration.

use std::path::PathBuf;

use atrium_auth::AuthConfig;
use atrium_session::{RoomPolicy, SessionConfig};
use clap::Parser;

/// Atrium collaboration server
#[derive(Parser, Debug)]
#[command(name = "atrium")]
#[command(about = "Real-time collaborative session server with account API")]
#[command(version)]
pub struct Args {
    /// Interface both listeners bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the HTTP auth API
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Port of the WebSocket session server
    #[arg(long, env = "SESSION_PORT", default_value_t = 5001)]
    pub session_port: u16,

    /// RocksDB directory for user accounts (in-memory when omitted)
    #[arg(long, env = "USERS_DB")]
    pub users_db: Option<PathBuf>,

    /// What to do with a room once it is empty (evict, retain)
    #[arg(long, env = "ROOM_POLICY", default_value_t = RoomPolicy::Evict)]
    pub room_policy: RoomPolicy,

    /// Entries kept per activity history list
    #[arg(long, env = "HISTORY_LIMIT", default_value_t = 100)]
    pub history_limit: usize,

    /// Frames buffered per participant before new ones are dropped
    #[arg(long, default_value_t = 256)]
    pub outbound_capacity: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            bind_addr: format!("{}:{}", self.host, self.session_port),
            outbound_capacity: self.outbound_capacity.max(1),
            room_policy: self.room_policy,
            history_limit: self.history_limit,
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            users_db: self.users_db.clone(),
        }
    }
}

//! Server Configuration

use serde::{Deserialize, Serialize};

/// Leaderboard server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API bind address
    pub http_addr: String,
    /// WebSocket bind address
    pub ws_addr: String,
    /// Action token validity window in milliseconds
    pub token_window_ms: i64,
    /// Size of the broadcast leaderboard window
    pub top_k: usize,
    /// Per-user submissions allowed per minute
    pub per_user_limit: u32,
    /// Per-source-address submissions allowed per minute
    pub per_source_limit: u32,
    /// Global submissions allowed per second
    pub global_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            ws_addr: "127.0.0.1:8081".to_string(),
            token_window_ms: 600_000,
            top_k: 10,
            per_user_limit: 10,
            per_source_limit: 100,
            global_limit: 10_000,
        }
    }
}

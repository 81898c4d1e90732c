//! API Server - HTTP and WebSocket surfaces for the leaderboard
//!
//! - HTTP (axum): action initialization, score submission, leaderboard
//!   pages, caller's own standing
//! - WebSocket (tokio-tungstenite): room subscriptions carrying
//!   `score:update` and `leaderboard:update` events
//! - BroadcastCoordinator: drains the commit-ordered event stream and
//!   decides per event between a cheap targeted delta and a full top-K
//!   refresh

pub mod broadcast;
pub mod events;
pub mod handlers;
pub mod http_server;
pub mod rooms;
pub mod ws_server;

pub use broadcast::{BroadcastCoordinator, LEADERBOARD_ROOM};
pub use handlers::ApiContext;
pub use http_server::HttpApiServer;
pub use rooms::RoomRegistry;
pub use ws_server::WebSocketServer;

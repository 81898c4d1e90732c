//! Action authorization for the live leaderboard.
//!
//! This crate covers the pre-ledger half of the submission pipeline:
//! - Signed, time-boxed action tokens (issue + validate)
//! - Replay protection via an atomic consume-once marker store
//! - Sliding-window rate limiting (per user, per source address, global)
//!
//! Scores are always computed server-side from the scoring table; a
//! client never supplies its own score.

pub mod error;
pub mod issuer;
pub mod rate_limit;
pub mod token;
pub mod validator;

pub use error::ActionError;
pub use issuer::ActionTokenIssuer;
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use token::{ActionToken, ScoringTable, UserId};
pub use validator::{ActionValidator, ConsumedActions, ValidatedAction};

/// Default validity window for an issued token (10 minutes)
pub const DEFAULT_TOKEN_WINDOW_MS: i64 = 600_000;

/// Current time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

//! Action pipeline errors

use thiserror::Error;

/// Errors produced while authorizing a score submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Invalid action signature")]
    InvalidSignature,

    #[error("Action token expired")]
    ExpiredAction,

    #[error("Action token already consumed")]
    ReplayedAction,

    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded { retry_after_ms: i64 },

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Missing or invalid identity")]
    Unauthorized,
}

impl ActionError {
    /// Stable error code for wire responses
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::InvalidSignature => "INVALID_SIGNATURE",
            ActionError::ExpiredAction => "EXPIRED_ACTION",
            ActionError::ReplayedAction => "REPLAYED_ACTION",
            ActionError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ActionError::UnknownActionType(_) => "UNKNOWN_ACTION_TYPE",
            ActionError::Unauthorized => "UNAUTHORIZED",
        }
    }

    /// Whether the client may retry the same token after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::RateLimitExceeded { .. })
    }
}

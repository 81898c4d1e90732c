//! Action token issuer
//!
//! Mints signed, time-boxed authorization tokens before the client
//! performs the action. Issuance has no side effects; nothing is
//! recorded until the token is consumed by the validator.

use crate::{
    error::ActionError,
    token::{compute_signature, ActionToken, ScoringTable},
    DEFAULT_TOKEN_WINDOW_MS,
};
use uuid::Uuid;

/// Mints action tokens for intended actions
pub struct ActionTokenIssuer {
    secret: Vec<u8>,
    scoring: ScoringTable,
    /// Validity window applied to every token, in milliseconds
    window_ms: i64,
}

impl ActionTokenIssuer {
    pub fn new(secret: Vec<u8>, scoring: ScoringTable) -> Self {
        Self {
            secret,
            scoring,
            window_ms: DEFAULT_TOKEN_WINDOW_MS,
        }
    }

    pub fn with_window_ms(mut self, window_ms: i64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Generate a random signing secret (for deployments that do not
    /// inject one)
    pub fn random_secret() -> Vec<u8> {
        use rand::RngCore;
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        secret
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn scoring(&self) -> &ScoringTable {
        &self.scoring
    }

    /// Issue a token authorizing one action of `action_type`.
    ///
    /// The expected score comes from the server-side scoring table;
    /// unknown action types are rejected up front rather than scored
    /// as zero.
    pub fn issue(
        &self,
        user_id: &str,
        action_type: &str,
        metadata: &serde_json::Value,
        now_ms: i64,
    ) -> Result<ActionToken, ActionError> {
        let expected_score = self
            .scoring
            .score_for(action_type, metadata)
            .ok_or_else(|| ActionError::UnknownActionType(action_type.to_string()))?;

        let action_id = Uuid::new_v4();
        let issued_at = now_ms;
        let signature = compute_signature(
            &self.secret,
            &action_id,
            user_id,
            action_type,
            issued_at,
            expected_score,
        );

        let token = ActionToken {
            action_id,
            user_id: user_id.to_string(),
            action_type: action_type.to_string(),
            issued_at,
            expires_at: issued_at + self.window_ms,
            signature,
            expected_score,
        };

        tracing::debug!(
            action_id = %token.action_id,
            user_id,
            action_type,
            expected_score,
            "Issued action token"
        );

        Ok(token)
    }
}

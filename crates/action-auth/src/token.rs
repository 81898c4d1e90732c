//! Action token type, signing payload, and the server-side scoring table

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

/// Verified user identity, supplied by the external auth layer
pub type UserId = String;

/// A signed, time-boxed authorization for one intended action.
///
/// Immutable once issued; consumed exactly once by the validator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionToken {
    /// Unique id, doubles as the ledger idempotency key
    pub action_id: Uuid,
    pub user_id: UserId,
    pub action_type: String,
    /// Unix milliseconds
    pub issued_at: i64,
    /// Unix milliseconds; `issued_at + window`
    pub expires_at: i64,
    /// Base64-encoded HMAC-SHA256 over the signing payload
    pub signature: String,
    /// Server-computed score this action will award
    pub expected_score: u64,
}

type HmacSha256 = Hmac<Sha256>;

/// Compute the token MAC over `action_id ‖ user_id ‖ action_type ‖
/// issued_at ‖ expected_score`.
///
/// The award is part of the signed payload: submission recomputes the
/// score from the scoring table and the submitted metadata, and a
/// metadata blob that changes the award no longer verifies.
pub fn compute_signature(
    secret: &[u8],
    action_id: &Uuid,
    user_id: &str,
    action_type: &str,
    issued_at: i64,
    expected_score: u64,
) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");

    // Hash token fields in canonical order
    mac.update(action_id.as_bytes());
    mac.update(user_id.as_bytes());
    mac.update(action_type.as_bytes());
    mac.update(&issued_at.to_le_bytes());
    mac.update(&expected_score.to_le_bytes());

    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a submitted signature
pub fn verify_signature(
    secret: &[u8],
    action_id: &Uuid,
    user_id: &str,
    action_type: &str,
    issued_at: i64,
    expected_score: u64,
    signature: &str,
) -> bool {
    let Ok(submitted) = BASE64.decode(signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(action_id.as_bytes());
    mac.update(user_id.as_bytes());
    mac.update(action_type.as_bytes());
    mac.update(&issued_at.to_le_bytes());
    mac.update(&expected_score.to_le_bytes());

    mac.verify_slice(&submitted).is_ok()
}

/// Deterministic, server-only scoring table keyed by action type.
///
/// An optional integer `multiplier` in the action metadata scales the
/// base score, clamped so a forged metadata blob cannot inflate awards
/// past the configured ceiling.
#[derive(Clone, Debug)]
pub struct ScoringTable {
    base_scores: HashMap<String, u64>,
    max_multiplier: u64,
}

impl ScoringTable {
    pub fn new(base_scores: HashMap<String, u64>, max_multiplier: u64) -> Self {
        Self {
            base_scores,
            max_multiplier: max_multiplier.max(1),
        }
    }

    /// Score for an action, or `None` for an unknown action type
    pub fn score_for(&self, action_type: &str, metadata: &serde_json::Value) -> Option<u64> {
        let base = *self.base_scores.get(action_type)?;

        let multiplier = metadata
            .get("multiplier")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
            .clamp(1, self.max_multiplier);

        Some(base.saturating_mul(multiplier))
    }

    pub fn knows(&self, action_type: &str) -> bool {
        self.base_scores.contains_key(action_type)
    }
}

impl Default for ScoringTable {
    fn default() -> Self {
        let mut base_scores = HashMap::new();
        base_scores.insert("quiz_complete".to_string(), 100);
        base_scores.insert("daily_challenge".to_string(), 250);
        base_scores.insert("achievement_unlock".to_string(), 500);
        base_scores.insert("streak_bonus".to_string(), 50);

        Self {
            base_scores,
            max_multiplier: 5,
        }
    }
}

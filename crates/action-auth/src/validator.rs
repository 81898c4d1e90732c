//! Action validator - signature, freshness, and consume-once checks
//!
//! The consume marker store is the single synchronization point that
//! prevents double-spend of a token: the test-and-set runs under the
//! DashMap shard lock as one atomic read-modify-write, so two
//! concurrent submissions of the same token can never both succeed.

use crate::{error::ActionError, token, token::ActionToken, UserId};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a successful validation: the fields the ledger needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedAction {
    pub action_id: Uuid,
    pub user_id: UserId,
    pub expected_score: u64,
}

/// Consumed-token markers with TTL semantics.
///
/// A marker lives at least as long as the token expiry window, so a
/// replay can never slip in after the marker lapses: by then the token
/// itself has expired and fails the freshness check first.
pub struct ConsumedActions {
    /// action_id -> marker expiry (unix ms)
    entries: DashMap<Uuid, i64>,
    ttl_ms: i64,
}

impl ConsumedActions {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
        }
    }

    /// Atomically mark `action_id` consumed. Returns false if a live
    /// marker already exists.
    ///
    /// The entry API holds the shard write lock across the
    /// check-and-insert; a separate contains/insert pair would admit a
    /// race between two submissions of the same token.
    pub fn try_consume(&self, action_id: Uuid, now_ms: i64) -> bool {
        match self.entries.entry(action_id) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() <= now_ms {
                    // Stale marker from a long-expired token
                    occupied.insert(now_ms + self.ttl_ms);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now_ms + self.ttl_ms);
                true
            }
        }
    }

    pub fn is_consumed(&self, action_id: &Uuid, now_ms: i64) -> bool {
        self.entries
            .get(action_id)
            .map(|expiry| *expiry > now_ms)
            .unwrap_or(false)
    }

    /// Drop markers whose TTL has elapsed
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Verifies submitted tokens and enforces single use
pub struct ActionValidator {
    secret: Vec<u8>,
    consumed: Arc<ConsumedActions>,
}

impl ActionValidator {
    pub fn new(secret: Vec<u8>, consumed: Arc<ConsumedActions>) -> Self {
        Self { secret, consumed }
    }

    /// Validate a submitted token at `now_ms`.
    ///
    /// Checks run in order and short-circuit: signature, freshness,
    /// then the atomic consume marker. Success consumes the token
    /// exactly once; consumption is never reversible.
    pub fn validate(
        &self,
        token: &ActionToken,
        now_ms: i64,
    ) -> Result<ValidatedAction, ActionError> {
        if !token::verify_signature(
            &self.secret,
            &token.action_id,
            &token.user_id,
            &token.action_type,
            token.issued_at,
            token.expected_score,
            &token.signature,
        ) {
            tracing::warn!(action_id = %token.action_id, "Rejected token with bad signature");
            return Err(ActionError::InvalidSignature);
        }

        if now_ms > token.expires_at {
            return Err(ActionError::ExpiredAction);
        }

        if !self.consumed.try_consume(token.action_id, now_ms) {
            tracing::warn!(
                action_id = %token.action_id,
                user_id = %token.user_id,
                "Rejected replayed token"
            );
            return Err(ActionError::ReplayedAction);
        }

        Ok(ValidatedAction {
            action_id: token.action_id,
            user_id: token.user_id.clone(),
            expected_score: token.expected_score,
        })
    }

}

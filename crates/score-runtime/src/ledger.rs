//! Score ledger - append-only transactions over user score records
//!
//! `total_score` for every user always equals the sum of that user's
//! transaction awards; `verify_user_total` checks the invariant by
//! replay. History is never mutated: a correction would be a new,
//! explicitly negative transaction.

use action_auth::UserId;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// `action_id` is a natural idempotency key: at most one
    /// transaction may ever exist for it
    #[error("Transaction already recorded for action {0}")]
    DuplicateAction(Uuid),
}

/// One applied score delta. Append-only; one per consumed action token.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ScoreTransaction {
    pub transaction_id: Uuid,
    pub user_id: UserId,
    pub action_id: Uuid,
    pub score_before: u64,
    pub score_after: u64,
    pub score_awarded: u64,
    /// Unix milliseconds
    pub applied_at: i64,
    pub validated: bool,
}

/// Current score state for one user; mutated only by the ledger
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct UserScoreRecord {
    pub user_id: UserId,
    pub username: String,
    pub total_score: u64,
    /// Unix milliseconds of the last applied transaction
    pub last_updated_at: i64,
}

/// Applies validated score deltas atomically and records transactions
pub struct ScoreLedger {
    records: DashMap<UserId, UserScoreRecord>,
    transactions: RwLock<Vec<ScoreTransaction>>,
    /// action_id -> transaction_id, claimed atomically before apply
    by_action: DashMap<Uuid, Uuid>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            transactions: RwLock::new(Vec::new()),
            by_action: DashMap::new(),
        }
    }

    /// Apply a validated award to a user's total.
    ///
    /// Callers serialize per-user applies (the submission pipeline
    /// holds a per-user lock); the DashMap entry lock additionally
    /// protects the record itself, so `score_before` is always the
    /// total immediately prior under the serialization order. The
    /// transaction is recorded before the updated record becomes
    /// visible.
    pub fn apply(
        &self,
        user_id: &str,
        username: &str,
        score_awarded: u64,
        action_id: Uuid,
        now_ms: i64,
    ) -> Result<ScoreTransaction, LedgerError> {
        let transaction_id = Uuid::new_v4();

        // Claim the idempotency key first; a duplicate application
        // must leave no trace
        match self.by_action.entry(action_id) {
            Entry::Occupied(_) => return Err(LedgerError::DuplicateAction(action_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(transaction_id);
            }
        }

        let mut record = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| UserScoreRecord {
                user_id: user_id.to_string(),
                username: username.to_string(),
                total_score: 0,
                last_updated_at: now_ms,
            });

        let score_before = record.total_score;
        let score_after = score_before.saturating_add(score_awarded);

        let transaction = ScoreTransaction {
            transaction_id,
            user_id: user_id.to_string(),
            action_id,
            score_before,
            score_after,
            score_awarded,
            applied_at: now_ms,
            validated: true,
        };

        self.transactions.write().push(transaction.clone());

        record.total_score = score_after;
        record.last_updated_at = now_ms;
        record.username = username.to_string();

        tracing::debug!(
            user_id,
            score_before,
            score_after,
            action_id = %action_id,
            "Applied score transaction"
        );

        Ok(transaction)
    }

    pub fn get_record(&self, user_id: &str) -> Option<UserScoreRecord> {
        self.records.get(user_id).map(|r| r.value().clone())
    }

    pub fn username_of(&self, user_id: &str) -> Option<String> {
        self.records.get(user_id).map(|r| r.username.clone())
    }

    /// All transactions for one user, in commit order
    pub fn transactions_for(&self, user_id: &str) -> Vec<ScoreTransaction> {
        self.transactions
            .read()
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn user_count(&self) -> usize {
        self.records.len()
    }

    pub fn has_transaction_for(&self, action_id: &Uuid) -> bool {
        self.by_action.contains_key(action_id)
    }

    /// Replay a user's transactions and check that the stored total
    /// equals their sum
    pub fn verify_user_total(&self, user_id: &str) -> bool {
        let replayed: u64 = self
            .transactions
            .read()
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .map(|tx| tx.score_awarded)
            .sum();

        match self.get_record(user_id) {
            Some(record) => record.total_score == replayed,
            None => replayed == 0,
        }
    }
}

impl Default for ScoreLedger {
    fn default() -> Self {
        Self::new()
    }
}

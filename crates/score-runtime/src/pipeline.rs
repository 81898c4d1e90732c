//! Submission pipeline
//!
//! One `submit` call per request: rate limit, validate/consume, then
//! ledger apply + ranking upsert as a single atomic unit under a
//! per-user lock. Every commit emits a sequence-numbered `ScoreEvent`
//! onto one ordered queue; the broadcast side drains it in order, so
//! per-room delivery order always matches ledger-commit order.

use crate::{
    ledger::{ScoreLedger, ScoreTransaction},
    ranking::RankingEngine,
};
use action_auth::{ActionError, ActionToken, ActionValidator, RateLimiter, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// Commit-ordered mutation event consumed by the broadcast coordinator
#[derive(Clone, Debug)]
pub struct ScoreEvent {
    /// Monotonic commit sequence number
    pub seq: u64,
    pub user_id: UserId,
    pub username: String,
    pub new_score: u64,
    pub new_rank: usize,
    pub previous_rank: Option<usize>,
}

/// What a successful submission returns to the caller
#[derive(Clone, Debug)]
pub struct SubmissionOutcome {
    pub transaction: ScoreTransaction,
    pub rank: usize,
    pub previous_rank: Option<usize>,
}

/// Orchestrates validated score submissions end to end
pub struct SubmissionPipeline {
    validator: ActionValidator,
    rate_limiter: RateLimiter,
    ledger: Arc<ScoreLedger>,
    ranking: Arc<RankingEngine>,
    /// Serializes ledger+ranking for one user; different users proceed
    /// in parallel
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
    /// Orders {upsert, seq, event send} so the event stream matches
    /// commit order. Contention here is the same contention the
    /// ranking index write lock already imposes.
    commit_lock: Mutex<()>,
    seq: AtomicU64,
    event_tx: mpsc::UnboundedSender<ScoreEvent>,
}

impl SubmissionPipeline {
    /// Build the pipeline and the ordered event stream it feeds
    pub fn new(
        validator: ActionValidator,
        rate_limiter: RateLimiter,
        ledger: Arc<ScoreLedger>,
        ranking: Arc<RankingEngine>,
    ) -> (Self, mpsc::UnboundedReceiver<ScoreEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pipeline = Self {
            validator,
            rate_limiter,
            ledger,
            ranking,
            user_locks: DashMap::new(),
            commit_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
            event_tx,
        };

        (pipeline, event_rx)
    }

    pub fn ledger(&self) -> &Arc<ScoreLedger> {
        &self.ledger
    }

    pub fn ranking(&self) -> &Arc<RankingEngine> {
        &self.ranking
    }

    /// Drop fully-elapsed rate-limit windows; called from the
    /// periodic maintenance sweep
    pub fn purge_stale_rate_windows(&self, now_ms: i64) {
        self.rate_limiter.purge_stale(now_ms);
    }

    /// Process one submitted token.
    ///
    /// The rate limiter runs before the consume check so a
    /// rate-limited client can retry with the same token; signature
    /// and freshness are still verified before anything is consumed.
    /// Either the whole pipeline succeeds and a transaction is
    /// recorded, or nothing is.
    pub fn submit(
        &self,
        token: &ActionToken,
        username: &str,
        source_addr: &str,
        now_ms: i64,
    ) -> Result<SubmissionOutcome, ActionError> {
        self.rate_limiter.allow(&token.user_id, source_addr, now_ms)?;

        let validated = self.validator.validate(token, now_ms)?;

        let user_lock = self
            .user_locks
            .entry(validated.user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _user_guard = user_lock.lock();

        // The consume marker already excludes duplicate action ids; a
        // duplicate here means the marker store and ledger disagree
        let transaction = self
            .ledger
            .apply(
                &validated.user_id,
                username,
                validated.expected_score,
                validated.action_id,
                now_ms,
            )
            .map_err(|e| {
                tracing::error!(
                    action_id = %validated.action_id,
                    "Consumed token hit ledger idempotency backstop: {e}"
                );
                ActionError::ReplayedAction
            })?;

        let (change, seq) = {
            let _commit_guard = self.commit_lock.lock();
            let change = self.ranking.upsert(
                &validated.user_id,
                transaction.score_after,
                transaction.applied_at,
            );
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);

            let event = ScoreEvent {
                seq,
                user_id: validated.user_id.clone(),
                username: username.to_string(),
                new_score: transaction.score_after,
                new_rank: change.rank,
                previous_rank: change.previous_rank,
            };
            // Receiver dropped means broadcasting is shut down; the
            // write path still completes
            let _ = self.event_tx.send(event);

            (change, seq)
        };

        tracing::info!(
            user_id = %validated.user_id,
            score_awarded = validated.expected_score,
            new_total = transaction.score_after,
            rank = change.rank,
            seq,
            "Score submission committed"
        );

        Ok(SubmissionOutcome {
            transaction,
            rank: change.rank,
            previous_rank: change.previous_rank,
        })
    }
}

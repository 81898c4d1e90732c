//! Score runtime - the mutation core of the leaderboard
//!
//! This crate owns the state the rest of the system observes:
//! - Append-only score ledger with per-user serialized applies
//! - Ordered ranking index answering rank and top-K queries
//! - The submission pipeline binding ledger + ranking into one atomic
//!   step and emitting a commit-ordered event stream

pub mod ledger;
pub mod pipeline;
pub mod ranking;

pub use ledger::{LedgerError, ScoreLedger, ScoreTransaction, UserScoreRecord};
pub use pipeline::{ScoreEvent, SubmissionOutcome, SubmissionPipeline};
pub use ranking::{RankChange, RankSnapshot, RankingEngine, Standing};

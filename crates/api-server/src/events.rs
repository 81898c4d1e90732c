//! Wire types for room events

use serde::Serialize;

/// One row of the broadcast/paginated leaderboard
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub score: u64,
    /// Unix milliseconds of the last score change
    pub last_updated: i64,
}

/// Event delivered to room subscribers.
///
/// A targeted `score:update` names only the affected user; a full
/// `leaderboard:update` replaces the displayed top-K, since a top-K
/// membership change can shift every displayed rank.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum RoomEvent {
    #[serde(rename = "score:update")]
    #[serde(rename_all = "camelCase")]
    ScoreUpdate {
        user_id: String,
        new_score: u64,
        new_rank: usize,
        previous_rank: Option<usize>,
    },

    #[serde(rename = "leaderboard:update")]
    LeaderboardUpdate { leaderboard: Vec<LeaderboardEntry> },
}

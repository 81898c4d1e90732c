//! Broadcast coordinator
//!
//! Single consumer of the commit-ordered score event stream. For each
//! event it decides what the room sees: a top-K boundary crossing
//! (user entered, left, or moved within the top-K) can shift every
//! displayed rank, so those get a full `leaderboard:update` snapshot;
//! anything else only affects the submitting user's own off-board
//! rank and gets a cheap targeted `score:update`.
//!
//! One task, one ordered queue, in-order fan-out: per-room delivery
//! order always matches ledger-commit order.

use crate::{
    events::{LeaderboardEntry, RoomEvent},
    rooms::RoomRegistry,
};
use score_runtime::{RankingEngine, ScoreEvent, ScoreLedger};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The one room every leaderboard client subscribes to
pub const LEADERBOARD_ROOM: &str = "leaderboard";

/// Observes ledger/ranking mutations and fans events out to rooms
pub struct BroadcastCoordinator {
    rooms: Arc<RoomRegistry>,
    ranking: Arc<RankingEngine>,
    ledger: Arc<ScoreLedger>,
    top_k: usize,
}

impl BroadcastCoordinator {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        ranking: Arc<RankingEngine>,
        ledger: Arc<ScoreLedger>,
        top_k: usize,
    ) -> Self {
        Self {
            rooms,
            ranking,
            ledger,
            top_k,
        }
    }

    /// Drain the event stream until the pipeline shuts down
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ScoreEvent>) {
        tracing::info!(top_k = self.top_k, "Broadcast coordinator started");

        while let Some(event) = events.recv().await {
            let room_event = self.decide(&event);
            let delivered = self.rooms.publish(LEADERBOARD_ROOM, &room_event);
            tracing::debug!(
                seq = event.seq,
                user_id = %event.user_id,
                delivered,
                full_refresh = matches!(room_event, RoomEvent::LeaderboardUpdate { .. }),
                "Broadcast event"
            );
        }

        tracing::info!("Broadcast coordinator stopped");
    }

    /// Choose between a full refresh and a targeted delta
    pub fn decide(&self, event: &ScoreEvent) -> RoomEvent {
        let crossed_boundary = event.new_rank <= self.top_k
            || event.previous_rank.is_some_and(|rank| rank <= self.top_k);

        if crossed_boundary {
            RoomEvent::LeaderboardUpdate {
                leaderboard: self.leaderboard_snapshot(),
            }
        } else {
            RoomEvent::ScoreUpdate {
                user_id: event.user_id.clone(),
                new_score: event.new_score,
                new_rank: event.new_rank,
                previous_rank: event.previous_rank,
            }
        }
    }

    /// Current top-K with usernames and update times joined in from
    /// the ledger
    pub fn leaderboard_snapshot(&self) -> Vec<LeaderboardEntry> {
        self.ranking
            .top_k(self.top_k)
            .into_iter()
            .map(|snapshot| {
                let record = self.ledger.get_record(&snapshot.user_id);
                LeaderboardEntry {
                    rank: snapshot.rank,
                    username: record
                        .as_ref()
                        .map(|r| r.username.clone())
                        .unwrap_or_else(|| snapshot.user_id.clone()),
                    last_updated: record.map(|r| r.last_updated_at).unwrap_or_default(),
                    user_id: snapshot.user_id,
                    score: snapshot.score,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn coordinator() -> (BroadcastCoordinator, Arc<ScoreLedger>, Arc<RankingEngine>) {
        let rooms = Arc::new(RoomRegistry::new());
        let ranking = Arc::new(RankingEngine::new());
        let ledger = Arc::new(ScoreLedger::new());
        (
            BroadcastCoordinator::new(rooms, ranking.clone(), ledger.clone(), 10),
            ledger,
            ranking,
        )
    }

    fn seed_users(ledger: &ScoreLedger, ranking: &RankingEngine, count: u64) {
        // user-1 highest score, user-`count` lowest
        for i in 1..=count {
            let user = format!("user-{i}");
            let score = (count + 1 - i) * 100;
            let tx = ledger
                .apply(&user, &user, score, Uuid::new_v4(), i as i64)
                .unwrap();
            ranking.upsert(&user, tx.score_after, tx.applied_at);
        }
    }

    fn event(user: &str, rank: usize, previous_rank: Option<usize>) -> ScoreEvent {
        ScoreEvent {
            seq: 0,
            user_id: user.to_string(),
            username: user.to_string(),
            new_score: 100,
            new_rank: rank,
            previous_rank,
        }
    }

    #[test]
    fn test_entering_top_k_from_unranked_full_refresh() {
        let (coordinator, ledger, ranking) = coordinator();
        let tx = ledger.apply("alice", "Alice", 100, Uuid::new_v4(), 1).unwrap();
        ranking.upsert("alice", tx.score_after, tx.applied_at);

        let decision = coordinator.decide(&event("alice", 1, None));
        match decision {
            RoomEvent::LeaderboardUpdate { leaderboard } => {
                assert_eq!(leaderboard.len(), 1);
                assert_eq!(leaderboard[0].user_id, "alice");
                assert_eq!(leaderboard[0].username, "Alice");
            }
            other => panic!("expected full refresh, got {other:?}"),
        }
    }

    #[test]
    fn test_crossing_into_top_k_full_refresh() {
        let (coordinator, ledger, ranking) = coordinator();
        seed_users(&ledger, &ranking, 11);

        // Rank 11 rises past rank 10: the top-10 set changed, so a
        // targeted delta would be wrong
        let decision = coordinator.decide(&event("user-11", 10, Some(11)));
        assert!(matches!(decision, RoomEvent::LeaderboardUpdate { .. }));
    }

    #[test]
    fn test_leaving_top_k_full_refresh() {
        let (coordinator, ledger, ranking) = coordinator();
        seed_users(&ledger, &ranking, 12);

        let decision = coordinator.decide(&event("user-10", 11, Some(10)));
        assert!(matches!(decision, RoomEvent::LeaderboardUpdate { .. }));
    }

    #[test]
    fn test_off_board_movement_targeted_delta() {
        let (coordinator, ledger, ranking) = coordinator();
        seed_users(&ledger, &ranking, 30);

        let decision = coordinator.decide(&event("user-25", 20, Some(25)));
        assert_eq!(
            decision,
            RoomEvent::ScoreUpdate {
                user_id: "user-25".to_string(),
                new_score: 100,
                new_rank: 20,
                previous_rank: Some(25),
            }
        );
    }

    #[test]
    fn test_snapshot_limited_to_top_k() {
        let (coordinator, ledger, ranking) = coordinator();
        seed_users(&ledger, &ranking, 15);

        let snapshot = coordinator.leaderboard_snapshot();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot[0].user_id, "user-1");
        assert_eq!(snapshot[9].rank, 10);
    }
}

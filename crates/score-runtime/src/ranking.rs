//! Ranking engine - ordered index over user scores
//!
//! Keyed by `(score desc, last_updated_at asc, user_id)`: a higher
//! score ranks first, and for equal scores the earlier achiever wins
//! the higher rank, which makes rank order deterministic. The ordered
//! index is a size-augmented treap, so insert, remove, and rank are
//! all O(log n) and a page read is O(log n + k). Index and position
//! map live under one RwLock so queries always observe a consistent
//! snapshot, never a half-applied upsert.

use action_auth::UserId;
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;

/// One derived leaderboard row
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RankSnapshot {
    /// 1-based
    pub rank: usize,
    pub user_id: UserId,
    pub score: u64,
}

/// Result of an upsert, used by the broadcast layer to detect top-K
/// boundary crossings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankChange {
    /// 1-based rank after the upsert
    pub rank: usize,
    /// Rank immediately before, `None` if the user was unranked
    pub previous_rank: Option<usize>,
}

/// One user's standing, read as a single snapshot
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Standing {
    pub score: u64,
    /// 1-based
    pub rank: usize,
    /// Share of ranked users strictly below, 0..100
    pub percentile: f64,
}

type RankKey = (Reverse<u64>, i64, UserId);

type Link = Option<Box<Node>>;

struct Node {
    key: RankKey,
    priority: u64,
    /// Nodes in this subtree, self included
    size: usize,
    left: Link,
    right: Link,
}

impl Node {
    fn boxed(key: RankKey) -> Box<Node> {
        Box::new(Node {
            key,
            priority: rand::random(),
            size: 1,
            left: None,
            right: None,
        })
    }

    fn update_size(&mut self) {
        self.size = 1 + subtree_size(&self.left) + subtree_size(&self.right);
    }
}

fn subtree_size(link: &Link) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

fn merge(a: Link, b: Link) -> Link {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(mut b)) => {
            if a.priority >= b.priority {
                a.right = merge(a.right.take(), Some(b));
                a.update_size();
                Some(a)
            } else {
                b.left = merge(Some(a), b.left.take());
                b.update_size();
                Some(b)
            }
        }
    }
}

/// Split into (keys < `key`, keys >= `key`)
fn split(link: Link, key: &RankKey) -> (Link, Link) {
    match link {
        None => (None, None),
        Some(mut node) => {
            if node.key < *key {
                let (mid, right) = split(node.right.take(), key);
                node.right = mid;
                node.update_size();
                (Some(node), right)
            } else {
                let (left, mid) = split(node.left.take(), key);
                node.left = mid;
                node.update_size();
                (left, Some(node))
            }
        }
    }
}

fn remove_key(link: Link, key: &RankKey) -> (Link, bool) {
    match link {
        None => (None, false),
        Some(mut node) => {
            if *key < node.key {
                let (left, removed) = remove_key(node.left.take(), key);
                node.left = left;
                node.update_size();
                (Some(node), removed)
            } else if *key > node.key {
                let (right, removed) = remove_key(node.right.take(), key);
                node.right = right;
                node.update_size();
                (Some(node), removed)
            } else {
                (merge(node.left.take(), node.right.take()), true)
            }
        }
    }
}

/// In-order keys at positions `skip..`, at most `take` total in `out`
fn collect_page<'a>(link: &'a Link, skip: usize, take: usize, out: &mut Vec<&'a RankKey>) {
    let Some(node) = link.as_ref() else {
        return;
    };
    if out.len() == take || skip >= node.size {
        return;
    }

    let left_size = subtree_size(&node.left);
    if skip < left_size {
        collect_page(&node.left, skip, take, out);
    }
    if left_size >= skip && out.len() < take {
        out.push(&node.key);
    }
    if out.len() < take {
        collect_page(&node.right, skip.saturating_sub(left_size + 1), take, out);
    }
}

/// Treap keyed by `RankKey`, augmented with subtree sizes for O(log n)
/// rank queries
#[derive(Default)]
struct OrderedIndex {
    root: Link,
}

impl OrderedIndex {
    fn len(&self) -> usize {
        subtree_size(&self.root)
    }

    /// Insert a key known to be absent
    fn insert(&mut self, key: RankKey) {
        let (left, right) = split(self.root.take(), &key);
        self.root = merge(merge(left, Some(Node::boxed(key))), right);
    }

    fn remove(&mut self, key: &RankKey) -> bool {
        let (root, removed) = remove_key(self.root.take(), key);
        self.root = root;
        removed
    }

    /// 1-based position of `key` in sorted order
    fn rank_of(&self, key: &RankKey) -> Option<usize> {
        let mut link = self.root.as_deref();
        let mut before = 0usize;

        while let Some(node) = link {
            if *key < node.key {
                link = node.left.as_deref();
            } else if *key > node.key {
                before += subtree_size(&node.left) + 1;
                link = node.right.as_deref();
            } else {
                return Some(before + subtree_size(&node.left) + 1);
            }
        }
        None
    }

    /// Keys at sorted positions `offset..offset + limit`
    fn page(&self, offset: usize, limit: usize) -> Vec<&RankKey> {
        let mut out = Vec::with_capacity(limit.min(self.len()));
        if limit > 0 {
            collect_page(&self.root, offset, limit, &mut out);
        }
        out
    }
}

struct RankingIndex {
    ordered: OrderedIndex,
    /// user -> (score, last_updated_at) currently in the ordered index
    positions: HashMap<UserId, (u64, i64)>,
}

impl RankingIndex {
    fn key_for(&self, user_id: &str) -> Option<RankKey> {
        self.positions
            .get(user_id)
            .map(|&(score, at)| (Reverse(score), at, user_id.to_string()))
    }
}

/// Mutation-ordered ranked view over all user scores
pub struct RankingEngine {
    index: RwLock<RankingIndex>,
}

impl RankingEngine {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(RankingIndex {
                ordered: OrderedIndex::default(),
                positions: HashMap::new(),
            }),
        }
    }

    /// Insert or move a user in the ranked index.
    ///
    /// When the score is unchanged the original achievement time is
    /// kept, so a user never loses a tie-break they already won.
    pub fn upsert(&self, user_id: &str, new_score: u64, updated_at: i64) -> RankChange {
        let mut index = self.index.write();

        let previous_rank = index
            .key_for(user_id)
            .and_then(|key| index.ordered.rank_of(&key));

        let achieved_at = match index.positions.get(user_id) {
            Some(&(old_score, old_at)) if old_score == new_score => old_at,
            _ => updated_at,
        };

        if let Some(old_key) = index.key_for(user_id) {
            index.ordered.remove(&old_key);
        }

        let key: RankKey = (Reverse(new_score), achieved_at, user_id.to_string());
        index.ordered.insert(key.clone());
        index
            .positions
            .insert(user_id.to_string(), (new_score, achieved_at));

        let rank = index
            .ordered
            .rank_of(&key)
            .unwrap_or_else(|| index.ordered.len());

        RankChange {
            rank,
            previous_rank,
        }
    }

    /// Top K entries in rank order
    pub fn top_k(&self, k: usize) -> Vec<RankSnapshot> {
        self.page(0, k)
    }

    /// A page of the leaderboard, ranks starting at `offset + 1`
    pub fn page(&self, offset: usize, limit: usize) -> Vec<RankSnapshot> {
        let index = self.index.read();
        index
            .ordered
            .page(offset, limit)
            .into_iter()
            .enumerate()
            .map(|(i, (Reverse(score), _, user_id))| RankSnapshot {
                rank: offset + i + 1,
                user_id: user_id.clone(),
                score: *score,
            })
            .collect()
    }

    /// Score, rank, and percentile from one read of the index; `None`
    /// if unranked. Callers that need score and rank to agree read
    /// here instead of joining separate queries.
    pub fn standing_of(&self, user_id: &str) -> Option<Standing> {
        let index = self.index.read();
        let (score, at) = *index.positions.get(user_id)?;
        let key: RankKey = (Reverse(score), at, user_id.to_string());
        let rank = index.ordered.rank_of(&key)?;
        let total = index.ordered.len();

        Some(Standing {
            score,
            rank,
            percentile: 100.0 * (total - rank) as f64 / total as f64,
        })
    }

    /// 1-based rank, `None` if unranked
    pub fn rank_of(&self, user_id: &str) -> Option<usize> {
        self.standing_of(user_id).map(|standing| standing.rank)
    }

    /// Share of ranked users strictly below `user_id`, 0..100
    pub fn percentile_of(&self, user_id: &str) -> Option<f64> {
        self.standing_of(user_id).map(|standing| standing.percentile)
    }

    pub fn len(&self) -> usize {
        self.index.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_upsert_is_unranked_to_rank_one() {
        let ranking = RankingEngine::new();
        let change = ranking.upsert("alice", 100, 1);
        assert_eq!(
            change,
            RankChange {
                rank: 1,
                previous_rank: None
            }
        );
    }

    #[test]
    fn test_top_k_sorted_score_desc_then_time_asc() {
        let ranking = RankingEngine::new();
        ranking.upsert("alice", 300, 10);
        ranking.upsert("bob", 500, 20);
        ranking.upsert("carol", 300, 5); // same score as alice, earlier
        ranking.upsert("dave", 100, 1);

        let top = ranking.top_k(10);
        let order: Vec<&str> = top.iter().map(|s| s.user_id.as_str()).collect();
        assert_eq!(order, vec!["bob", "carol", "alice", "dave"]);

        // Every rank is its 1-based position
        for (i, snapshot) in top.iter().enumerate() {
            assert_eq!(snapshot.rank, i + 1);
        }
    }

    #[test]
    fn test_top_k_truncates() {
        let ranking = RankingEngine::new();
        for i in 0..20u64 {
            ranking.upsert(&format!("user-{i}"), i * 10, i as i64);
        }
        assert_eq!(ranking.top_k(10).len(), 10);
        assert_eq!(ranking.top_k(10)[0].score, 190);
    }

    #[test]
    fn test_upsert_moves_user_and_reports_previous_rank() {
        let ranking = RankingEngine::new();
        ranking.upsert("alice", 100, 1);
        ranking.upsert("bob", 200, 2);
        ranking.upsert("carol", 300, 3);

        assert_eq!(ranking.rank_of("alice"), Some(3));

        let change = ranking.upsert("alice", 250, 4);
        assert_eq!(change.previous_rank, Some(3));
        assert_eq!(change.rank, 2);
        assert_eq!(ranking.rank_of("bob"), Some(3));
    }

    #[test]
    fn test_equal_score_keeps_original_achievement_time() {
        let ranking = RankingEngine::new();
        ranking.upsert("alice", 100, 1);
        ranking.upsert("bob", 100, 2);
        assert_eq!(ranking.rank_of("alice"), Some(1));

        // Re-upserting alice at the same score later must not demote her
        ranking.upsert("alice", 100, 50);
        assert_eq!(ranking.rank_of("alice"), Some(1));
    }

    #[test]
    fn test_page_offsets_ranks() {
        let ranking = RankingEngine::new();
        for i in 0..10u64 {
            ranking.upsert(&format!("user-{i}"), 1_000 - i, i as i64);
        }

        let page = ranking.page(3, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].rank, 4);
        assert_eq!(page[0].user_id, "user-3");
        assert_eq!(page[1].rank, 5);
    }

    #[test]
    fn test_percentile() {
        let ranking = RankingEngine::new();
        ranking.upsert("a", 400, 1);
        ranking.upsert("b", 300, 2);
        ranking.upsert("c", 200, 3);
        ranking.upsert("d", 100, 4);

        assert_eq!(ranking.percentile_of("a"), Some(75.0));
        assert_eq!(ranking.percentile_of("d"), Some(0.0));
        assert_eq!(ranking.percentile_of("nobody"), None);
    }

    #[test]
    fn test_standing_is_one_consistent_snapshot() {
        let ranking = RankingEngine::new();
        assert_eq!(ranking.standing_of("alice"), None);

        ranking.upsert("alice", 300, 1);
        ranking.upsert("bob", 500, 2);

        let standing = ranking.standing_of("alice").unwrap();
        assert_eq!(standing.score, 300);
        assert_eq!(standing.rank, 2);
        assert_eq!(standing.percentile, 0.0);

        let standing = ranking.standing_of("bob").unwrap();
        assert_eq!(standing.rank, 1);
        assert_eq!(standing.percentile, 50.0);
    }

    #[test]
    fn test_ordered_index_matches_sorted_reference() {
        let ranking = RankingEngine::new();
        let mut model: HashMap<String, (u64, i64)> = HashMap::new();

        // Churn a small user set through colliding scores so the index
        // sees inserts, moves, and ties
        for i in 0..400i64 {
            let user = format!("user-{}", i % 37);
            let score = ((i * 7919) % 50) as u64;
            let achieved_at = match model.get(&user) {
                Some(&(old_score, old_at)) if old_score == score => old_at,
                _ => i,
            };
            ranking.upsert(&user, score, i);
            model.insert(user, (score, achieved_at));
        }

        let mut expected: Vec<RankKey> = model
            .iter()
            .map(|(user, &(score, at))| (Reverse(score), at, user.clone()))
            .collect();
        expected.sort();

        let page = ranking.page(0, expected.len());
        assert_eq!(page.len(), expected.len());

        for (i, ((Reverse(score), _, user_id), snapshot)) in
            expected.iter().zip(page.iter()).enumerate()
        {
            assert_eq!(snapshot.rank, i + 1);
            assert_eq!(snapshot.user_id, *user_id);
            assert_eq!(snapshot.score, *score);
            assert_eq!(ranking.rank_of(user_id), Some(i + 1));
        }
    }
}

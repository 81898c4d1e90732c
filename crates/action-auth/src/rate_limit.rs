//! Submission rate limiting
//!
//! Three independent fixed-window counters: per user, per source
//! address, and global. A submission passes only if all three have
//! remaining capacity. Rate-limit state is fully decoupled from the
//! ledger; a denial never touches score state.

use crate::{error::ActionError, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;

/// Rate limiter settings; counts are per window
#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    pub per_user_limit: u32,
    pub per_user_window_ms: i64,
    pub per_source_limit: u32,
    pub per_source_window_ms: i64,
    pub global_limit: u32,
    pub global_window_ms: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            per_user_limit: 10,
            per_user_window_ms: 60_000,
            per_source_limit: 100,
            per_source_window_ms: 60_000,
            global_limit: 10_000,
            global_window_ms: 1_000,
        }
    }
}

/// One fixed window of submissions
#[derive(Clone, Copy, Debug)]
struct Window {
    start_ms: i64,
    count: u32,
}

/// Bump the window under the caller's lock. Returns the remaining
/// window time if the limit is exhausted, None if admitted.
fn bump(window: &mut Window, limit: u32, window_ms: i64, now_ms: i64) -> Option<i64> {
    if now_ms - window.start_ms >= window_ms {
        window.start_ms = now_ms;
        window.count = 0;
    }

    if window.count < limit {
        window.count += 1;
        None
    } else {
        Some(window.start_ms + window_ms - now_ms)
    }
}

/// Bounds submission frequency per user, per source address, and
/// globally
pub struct RateLimiter {
    config: RateLimiterConfig,
    per_user: DashMap<UserId, Window>,
    per_source: DashMap<String, Window>,
    global: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            per_user: DashMap::new(),
            per_source: DashMap::new(),
            global: Mutex::new(Window {
                start_ms: 0,
                count: 0,
            }),
        }
    }

    /// Admit or deny one submission attempt.
    ///
    /// Denial carries a retry-after equal to the shortest remaining
    /// time among the exhausted windows. Denied attempts still count
    /// against the windows they passed.
    pub fn allow(
        &self,
        user_id: &str,
        source_addr: &str,
        now_ms: i64,
    ) -> Result<(), ActionError> {
        let mut denials: Vec<i64> = Vec::new();

        {
            let mut entry = self
                .per_user
                .entry(user_id.to_string())
                .or_insert(Window {
                    start_ms: now_ms,
                    count: 0,
                });
            if let Some(remaining) = bump(
                entry.value_mut(),
                self.config.per_user_limit,
                self.config.per_user_window_ms,
                now_ms,
            ) {
                denials.push(remaining);
            }
        }

        {
            let mut entry = self
                .per_source
                .entry(source_addr.to_string())
                .or_insert(Window {
                    start_ms: now_ms,
                    count: 0,
                });
            if let Some(remaining) = bump(
                entry.value_mut(),
                self.config.per_source_limit,
                self.config.per_source_window_ms,
                now_ms,
            ) {
                denials.push(remaining);
            }
        }

        {
            let mut global = self.global.lock();
            if let Some(remaining) = bump(
                &mut global,
                self.config.global_limit,
                self.config.global_window_ms,
                now_ms,
            ) {
                denials.push(remaining);
            }
        }

        match denials.iter().min() {
            Some(&retry_after_ms) => {
                tracing::debug!(user_id, source_addr, retry_after_ms, "Rate limited");
                Err(ActionError::RateLimitExceeded { retry_after_ms })
            }
            None => Ok(()),
        }
    }

    /// Drop per-key windows that have fully elapsed
    pub fn purge_stale(&self, now_ms: i64) {
        let user_window = self.config.per_user_window_ms;
        self.per_user
            .retain(|_, w| now_ms - w.start_ms < user_window);
        let source_window = self.config.per_source_window_ms;
        self.per_source
            .retain(|_, w| now_ms - w.start_ms < source_window);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

//! Sliding-window rate limiting for outbound tool services.
//!
//! Every caller of one service kind shares one limiter. Callers over budget
//! are delayed, not rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Budget applied to service kinds that were never configured.
pub const DEFAULT_REQUESTS_PER_WINDOW: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    recent: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            recent: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Waits for a slot. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wake_at = {
                let mut recent = self.recent.lock().await;
                let now = Instant::now();
                while recent
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    recent.pop_front();
                }
                if recent.len() < self.max_requests {
                    recent.push_back(now);
                    return true;
                }
                match recent.front() {
                    Some(oldest) => *oldest + self.window,
                    None => continue,
                }
            };

            debug!(wait_ms = (wake_at - Instant::now()).as_millis(), "rate limited, waiting");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

/// Limiters keyed by service kind (`file_search`, `mcp:<server>`).
#[derive(Debug, Default)]
pub struct RateLimiters {
    limiters: Mutex<HashMap<String, Arc<SlidingWindowLimiter>>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    // The map only ever holds fully inserted entries, so a panic elsewhere
    // cannot leave it half-written.
    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<SlidingWindowLimiter>>> {
        self.limiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the budget for `kind`. Replaces any limiter already handed out
    /// only for future callers.
    pub fn configure(&self, kind: &str, max_requests: usize, window: Duration) {
        let limiter = Arc::new(SlidingWindowLimiter::new(max_requests, window));
        self.map().insert(kind.to_string(), limiter);
    }

    pub fn get(&self, kind: &str) -> Arc<SlidingWindowLimiter> {
        Arc::clone(self.map().entry(kind.to_string()).or_insert_with(|| {
            Arc::new(SlidingWindowLimiter::new(
                DEFAULT_REQUESTS_PER_WINDOW,
                DEFAULT_WINDOW,
            ))
        }))
    }

    /// Shorthand for `get(kind).acquire(cancel)`.
    pub async fn acquire(&self, kind: &str, cancel: &CancellationToken) -> bool {
        self.get(kind).acquire(cancel).await
    }
}

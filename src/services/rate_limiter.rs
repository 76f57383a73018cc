use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{config::LimitConfig, models::subscription::Identity};

/// Per-identity sliding-window admission control.
///
/// Each identity keeps the timestamps of its admitted actions inside the
/// trailing window. Denied attempts are not recorded, so a user who keeps
/// tapping while throttled is readmitted as soon as the oldest entry ages out.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    windows: Arc<Mutex<HashMap<Identity, VecDeque<Instant>>>>,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    pub fn new(config: LimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            window: config.window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admits the action at `now` if the identity has room in its window.
    ///
    /// # Arguments
    ///
    /// * `identity` - The acting user.
    /// * `now` - The time of the action.
    ///
    /// # Returns
    ///
    /// `true` when the action is admitted and recorded.
    pub async fn admit(&self, identity: Identity, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(identity).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.capacity {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Drops identities whose window has emptied by `now`.
    ///
    /// # Returns
    ///
    /// The number of identities removed.
    pub async fn purge_idle(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < self.window)
        });
        before - windows.len()
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

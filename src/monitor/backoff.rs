// Backoff Tracker - Per-directory cool-down after scan failures

use crate::constants::{BACKOFF_BASE_DELAY, BACKOFF_MAX_DELAY, BACKOFF_MAX_JITTER};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Next-allowed scan time per directory. Absence means "not backed off".
pub struct BackoffTracker {
    next_allowed: RwLock<HashMap<PathBuf, Instant>>,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self {
            next_allowed: RwLock::new(HashMap::new()),
            base_delay: BACKOFF_BASE_DELAY,
            max_delay: BACKOFF_MAX_DELAY,
            max_jitter: BACKOFF_MAX_JITTER,
        }
    }

    /// Override the jitter bound (zero disables jitter)
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Record a failure for `dir` and return the total delay applied
    pub fn register_failure(&self, dir: &Path) -> Duration {
        self.register_failure_at(dir, Instant::now())
    }

    pub fn register_failure_at(&self, dir: &Path, now: Instant) -> Duration {
        let mut next_allowed = self
            .next_allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let delay = match next_allowed.get(dir) {
            Some(deadline) if *deadline > now => {
                let remaining = *deadline - now;
                remaining.saturating_mul(2).min(self.max_delay)
            }
            _ => self.base_delay,
        };
        let total = delay + self.jitter();

        next_allowed.insert(dir.to_path_buf(), now + total);

        tracing::warn!(
            dir = %dir.display(),
            backoff_secs = total.as_secs(),
            "Directory scan failed, backing off"
        );

        total
    }

    /// True while `dir` is backed off. Once the deadline has passed the entry is removed.
    pub fn should_skip(&self, dir: &Path) -> bool {
        self.should_skip_at(dir, Instant::now())
    }

    pub fn should_skip_at(&self, dir: &Path, now: Instant) -> bool {
        {
            let next_allowed = self
                .next_allowed
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match next_allowed.get(dir) {
                None => return false,
                Some(deadline) if now < *deadline => return true,
                Some(_) => {}
            }
        }

        let mut next_allowed = self
            .next_allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // A failure may have been registered between the two locks.
        match next_allowed.get(dir) {
            Some(deadline) if now < *deadline => true,
            Some(_) => {
                next_allowed.remove(dir);
                false
            }
            None => false,
        }
    }

    /// Remove every entry whose deadline has passed. Returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        self.clear_expired_at(Instant::now())
    }

    pub fn clear_expired_at(&self, now: Instant) -> usize {
        let mut next_allowed = self
            .next_allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = next_allowed.len();
        next_allowed.retain(|_, deadline| *deadline > now);
        let removed = before - next_allowed.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleared expired directory backoffs");
        }
        removed
    }

    /// Number of directories currently tracked, expired or not
    pub fn len(&self) -> usize {
        self.next_allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Suppressed,
}

/// Per template cooldown. Entries are never evicted; there is at most one
/// per template file, so at most a couple per pin.
pub struct RateLimiter {
    cooldown: Duration,
    last_dispatch: HashMap<PathBuf, DateTime<Utc>>,
}

impl RateLimiter {
    /// A zero cooldown disables rate limiting.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_dispatch: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Allows if `key` has never dispatched or its last dispatch is strictly
    /// more than the cooldown ago, recording `now` as the new dispatch time.
    /// A suppressed call leaves the recorded time untouched.
    pub fn check_and_update(&mut self, key: &Path, now: DateTime<Utc>) -> RateLimitDecision {
        let allowed = match self.last_dispatch.get(key) {
            None => true,
            Some(_) if self.cooldown.is_zero() => true,
            Some(last) => now.signed_duration_since(*last) > self.cooldown,
        };

        if allowed {
            self.last_dispatch.insert(key.to_owned(), now);
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Suppressed
        }
    }

    #[cfg(test)]
    pub fn last_dispatch(&self, key: &Path) -> Option<DateTime<Utc>> {
        self.last_dispatch.get(key).copied()
    }
}

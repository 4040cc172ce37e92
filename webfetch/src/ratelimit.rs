//! Per-client cooldown between admitted fetches.
//!
//! One mutex guards the whole table, so the check and the update for a client
//! happen under a single guard and two racing requests from the same client
//! cannot both pass.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    last_admitted: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit `client_id` at `now` unless its previous admission is within the
    /// cooldown. A rejected attempt leaves the recorded timestamp untouched.
    ///
    /// A `now` earlier than the recorded timestamp counts as inside the window.
    pub fn try_admit(&self, client_id: &str, now: Instant) -> bool {
        let mut table = self.table();
        if let Some(last) = table.get(client_id)
            && now.saturating_duration_since(*last) < self.cooldown
        {
            return false;
        }
        table.insert(client_id.to_string(), now);
        true
    }

    /// Time `client_id` still has to wait at `now`, if any.
    #[must_use]
    pub fn retry_after(&self, client_id: &str, now: Instant) -> Option<Duration> {
        let table = self.table();
        let last = table.get(client_id)?;
        let elapsed = now.saturating_duration_since(*last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Drop entries whose cooldown has elapsed. Returns how many were removed.
    ///
    /// Removing an elapsed entry never changes a later decision: a missing
    /// entry and an elapsed one both admit.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, last| now.saturating_duration_since(*last) < self.cooldown);
        before - table.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    // The table only holds timestamps, so a panic mid-update cannot leave it
    // inconsistent.
    fn table(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

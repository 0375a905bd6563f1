//! Mass-sync circuit breaker.
//!
//! Counts user-record mutations inside a rolling time window and rejects
//! every further synchronization attempt once a configured ceiling is
//! exceeded, until the window rolls over. This is the safeguard against a
//! runaway bulk job relinking or recreating accounts in rapid succession.
//!
//! Counters are process-local and the breaker is explicitly injected
//! (`Arc`); a multi-instance deployment needs the counts in a shared store
//! instead.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::SyncError;

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Rolling window length.
    pub window: Duration,
    /// Mutations allowed inside one window.
    pub ceiling: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            ceiling: 20,
        }
    }
}

/// Rolling-window mutation counter.
#[derive(Debug)]
pub struct MassSyncBreaker {
    config: BreakerConfig,
    events: Mutex<VecDeque<Instant>>,
}

impl MassSyncBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Reject with the distinguished error when the window is saturated.
    /// Called before any mutation; never mutates the counter itself.
    pub fn check(&self) -> Result<(), SyncError> {
        self.check_at(Instant::now())
    }

    /// Record one committed user-record mutation.
    pub fn record_mutation(&self) {
        self.record_at(Instant::now());
    }

    fn check_at(&self, now: Instant) -> Result<(), SyncError> {
        let mut events = self.lock();
        Self::prune(&mut events, now, self.config.window);
        let count = events.len();
        if count >= self.config.ceiling {
            warn!(
                count,
                ceiling = self.config.ceiling,
                window_secs = self.config.window.as_secs(),
                "Mass-sync circuit breaker tripped"
            );
            return Err(SyncError::MassSyncBlocked {
                count,
                ceiling: self.config.ceiling,
                window_secs: self.config.window.as_secs(),
            });
        }
        Ok(())
    }

    fn record_at(&self, now: Instant) {
        let mut events = self.lock();
        Self::prune(&mut events, now, self.config.window);
        events.push_back(now);
    }

    fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = events.front() {
            if now.duration_since(*front) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // Counter state stays usable even if a holder panicked.
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

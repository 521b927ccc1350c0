//! Governance gate: the time-boxed unlock window for secret access.
//!
//! The gate stores a single `unlocked_until` instant.  Whether it is open is
//! recomputed from the clock on every query; there is no timer, so expiry
//! happens lazily the first time someone looks after the deadline.  State is
//! not persisted: a restart always comes up locked.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Jump to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Locked / Unlocked(until) state machine.
pub struct GovernanceGate {
    clock: Arc<dyn Clock>,
    unlocked_until: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for GovernanceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceGate")
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}

impl Default for GovernanceGate {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl GovernanceGate {
    /// Create a locked gate reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            unlocked_until: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.unlocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the gate until `now + duration` and return that instant.
    ///
    /// Replaces any existing window; windows do not stack.
    pub fn unlock(&self, duration: Duration) -> DateTime<Utc> {
        let until = self.clock.now() + duration;
        *self.state() = Some(until);
        tracing::info!(expires_at = %until, "governance gate unlocked");
        until
    }

    /// Close the gate.
    pub fn lock(&self) {
        *self.state() = None;
        tracing::info!("governance gate locked");
    }

    /// Whether the current time is within the unlock window.
    pub fn is_unlocked(&self) -> bool {
        let until = *self.state();
        until.is_some_and(|until| self.clock.now() <= until)
    }

    /// End of the current window, or `None` while locked.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let until = *self.state();
        until.filter(|until| self.clock.now() <= *until)
    }
}

//! Per-kind cooldown bookkeeping.
//!
//! The tracker knows nothing about thresholds. It records when each kind was
//! last started and which kinds currently have an effect running, and answers
//! whether a kind may start again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::action::ActionKind;

#[derive(Debug, Default)]
struct TrackerState {
    last_triggered: HashMap<ActionKind, DateTime<Utc>>,
    in_flight: HashSet<ActionKind>,
}

/// Outcome of an attempt to start an action.
#[derive(Debug)]
pub enum Claim {
    /// Cooldown stamped; hold the guard for as long as the effect runs
    Granted(InFlightGuard),
    /// Last start is still inside the cooldown window
    CoolingDown { remaining: Duration },
    /// A previous run of this kind has not finished yet
    InFlight,
}

/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl CooldownTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // Critical sections never panic mid-update, so a poisoned map is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if `kind` never fired or its cooldown has elapsed at `now`.
    #[must_use]
    pub fn is_ready(&self, kind: ActionKind, cooldown: Duration, now: DateTime<Utc>) -> bool {
        remaining(self.lock().last_triggered.get(&kind), cooldown, now).is_none()
    }

    /// Record (or overwrite) the last start time of `kind`.
    pub fn mark_triggered(&self, kind: ActionKind, at: DateTime<Utc>) {
        self.lock().last_triggered.insert(kind, at);
    }

    /// Last recorded start time of `kind`.
    #[must_use]
    pub fn last_triggered(&self, kind: ActionKind) -> Option<DateTime<Utc>> {
        self.lock().last_triggered.get(&kind).copied()
    }

    /// Time left before `kind` may fire again, if any.
    #[must_use]
    pub fn remaining(
        &self,
        kind: ActionKind,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        remaining(self.lock().last_triggered.get(&kind), cooldown, now)
    }

    #[must_use]
    pub fn is_in_flight(&self, kind: ActionKind) -> bool {
        self.lock().in_flight.contains(&kind)
    }

    /// Check readiness, stamp the cooldown and mark `kind` in flight as one
    /// step under the lock, so overlapping ticks cannot both start it.
    pub fn try_claim(&self, kind: ActionKind, cooldown: Duration, now: DateTime<Utc>) -> Claim {
        let mut state = self.lock();

        if let Some(remaining) = remaining(state.last_triggered.get(&kind), cooldown, now) {
            return Claim::CoolingDown { remaining };
        }
        // Only reachable when the cooldown is shorter than the run itself.
        if state.in_flight.contains(&kind) {
            return Claim::InFlight;
        }

        state.last_triggered.insert(kind, now);
        state.in_flight.insert(kind);

        Claim::Granted(InFlightGuard {
            state: Arc::clone(&self.state),
            kind,
        })
    }

    /// Forget every cooldown stamp. In-flight markers stay with their guards.
    pub fn reset(&self) {
        self.lock().last_triggered.clear();
    }
}

fn remaining(
    last: Option<&DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = last?;
    // Cooldowns too large for a calendar offset never expire.
    let Some(ready_at) = chrono::Duration::from_std(cooldown)
        .ok()
        .and_then(|window| last.checked_add_signed(window))
    else {
        return Some(cooldown);
    };
    if now >= ready_at {
        return None;
    }
    (ready_at - now).to_std().ok()
}

/// Clears the in-flight marker for its kind when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    state: Arc<Mutex<TrackerState>>,
    kind: ActionKind,
}

impl InFlightGuard {
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .remove(&self.kind);
    }
}

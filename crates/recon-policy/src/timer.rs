//! Per-entity refresh timer.
//!
//! # Invariants
//!
//! - **Never → due**: a timer that has never dispatched is always due.
//! - **Due at the interval**: dispatch once at least `interval` has elapsed
//!   since the last request.
//! - **Advances only on dispatch**: a `false` decision leaves the timer
//!   untouched, so `last_inspect_request_time` never decreases.

use chrono::{DateTime, Duration, Utc};

/// Tracks when a refresh was last requested for one entity.
///
/// Not synchronized. Callers serialize access per entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationTimer {
    /// `None` until the first dispatch.
    last_inspect_request_time: Option<DateTime<Utc>>,
}

impl ReconciliationTimer {
    /// Timer in the "never requested" state.
    pub fn new() -> Self {
        Self {
            last_inspect_request_time: None,
        }
    }

    /// Read-only probe: would a dispatch happen at `now`?
    pub fn is_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_inspect_request_time {
            None => true,
            Some(last) => now.signed_duration_since(last) >= interval,
        }
    }

    /// Decide whether to dispatch at `now` and, if so, record `now` as the
    /// last request time in the same step.
    pub fn should_dispatch(&mut self, now: DateTime<Utc>, interval: Duration) -> bool {
        let due = self.is_due(now, interval);
        if due {
            self.last_inspect_request_time = Some(now);
        }
        due
    }

    pub fn last_inspect_request_time(&self) -> Option<DateTime<Utc>> {
        self.last_inspect_request_time
    }

    pub fn has_dispatched(&self) -> bool {
        self.last_inspect_request_time.is_some()
    }
}

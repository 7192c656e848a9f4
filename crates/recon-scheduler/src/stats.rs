use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::TickResult;

/// Point-in-time tick counters.
///
/// Adapter health shows up here (`dispatch_failures`, `slow_dispatches`),
/// not in tick results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks_failed: u64,
    pub ticks_skipped: u64,
    pub ticks_no_action: u64,
    pub ticks_dispatched: u64,
    pub dispatch_failures: u64,
    pub slow_dispatches: u64,
}

impl SchedulerStats {
    pub fn total_ticks(&self) -> u64 {
        self.ticks_failed + self.ticks_skipped + self.ticks_no_action + self.ticks_dispatched
    }
}

#[derive(Debug, Default)]
pub(crate) struct TickCounters {
    failed: AtomicU64,
    skipped: AtomicU64,
    no_action: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    slow_dispatches: AtomicU64,
}

impl TickCounters {
    pub(crate) fn record(&self, result: &TickResult) {
        let counter = match result {
            TickResult::Failed(_) => &self.failed,
            TickResult::Skipped => &self.skipped,
            TickResult::NoActionTaken => &self.no_action,
            TickResult::DispatchedRefresh => &self.dispatched,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_slow_dispatch(&self) {
        self.slow_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            ticks_failed: self.failed.load(Ordering::Relaxed),
            ticks_skipped: self.skipped.load(Ordering::Relaxed),
            ticks_no_action: self.no_action.load(Ordering::Relaxed),
            ticks_dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            slow_dispatches: self.slow_dispatches.load(Ordering::Relaxed),
        }
    }
}

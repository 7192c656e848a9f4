//! recon-testkit
//!
//! In-memory fakes for the scheduler's collaborators and a harness that
//! wires them together. Test-only: depend on it from `[dev-dependencies]`.

mod clock;
mod dispatcher;
mod store;

use std::sync::{Arc, Mutex, MutexGuard};

use recon_policy::PolicySet;
use recon_scheduler::{MaintenanceSwitch, ReconciliationScheduler, SchedulerDeps, SchedulerOptions};

pub use clock::ManualClock;
pub use dispatcher::{DispatchMode, RecordingDispatcher};
pub use store::{entity, InMemoryStateStore};

/// Scheduler wired to fakes, with handles to every fake.
pub struct Harness {
    pub store: Arc<InMemoryStateStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub maintenance: Arc<MaintenanceSwitch>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ReconciliationScheduler>,
}

impl Harness {
    pub fn new(policies: PolicySet) -> Self {
        Self::with_options(policies, SchedulerOptions::default())
    }

    pub fn with_options(policies: PolicySet, options: SchedulerOptions) -> Self {
        let store = Arc::new(InMemoryStateStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let maintenance = Arc::new(MaintenanceSwitch::new(false));
        let clock = Arc::new(ManualClock::at_epoch());

        let deps = SchedulerDeps {
            store: store.clone(),
            dispatcher: dispatcher.clone(),
            maintenance: maintenance.clone(),
            clock: clock.clone(),
        };
        let scheduler = Arc::new(ReconciliationScheduler::new(deps, policies, options));

        Self {
            store,
            dispatcher,
            maintenance,
            clock,
            scheduler,
        }
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to `info`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

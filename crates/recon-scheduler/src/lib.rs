//! recon-scheduler
//!
//! Adaptive reconciliation scheduler for externally managed entities.
//!
//! One [`ReconciliationScheduler::tick`] per entity per period:
//! fetch state -> maintenance check -> policy/timer decision -> optional
//! fire-and-forget refresh dispatch. Only the state fetch can fail a tick;
//! dispatch failures are logged and counted, never returned.
//!
//! The periodic trigger is either the host's own mechanism or
//! [`MaintenanceLoop`].

mod collaborators;
mod driver;
mod error;
mod scheduler;
mod stats;

pub use collaborators::{
    AdapterDispatcher, Clock, EntityState, MaintenanceModeFlag, MaintenanceSwitch, RefreshRequest,
    StateStore, SystemClock,
};
pub use driver::{MaintenanceLoop, MIN_PERIOD};
pub use error::{DispatchError, StateFetchError};
pub use scheduler::{
    PassSummary, ReconciliationScheduler, SchedulerDeps, SchedulerOptions, TickResult,
};
pub use stats::SchedulerStats;

pub use recon_policy::{EntityId, EntityKind, PolicySet, StalenessConfig, StalenessPolicy};

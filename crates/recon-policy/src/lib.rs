//! recon-policy
//!
//! Refresh decision logic for externally managed entities.
//!
//! Architectural decisions:
//! - Two-tier backoff: recently changed entities are polled on the active
//!   interval, quiescent entities on the slow interval
//! - First decision for an entity always dispatches
//! - Timer advances only when it decides to dispatch
//! - Invalid durations are rejected at construction, never at decision time
//!
//! Pure deterministic logic. No IO, no wall-clock. Callers provide `now`.

mod staleness;
mod timer;
mod types;

pub use staleness::{Freshness, PolicyError, PolicySet, StalenessConfig, StalenessPolicy};
pub use timer::ReconciliationTimer;
pub use types::*;

//! Boundary to the scheduler's external collaborators.
//!
//! This module defines **only** the data crossing the boundary and the
//! traits the host implements. No persistence, no adapter protocol, no
//! scheduling logic belong here.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use recon_policy::{EntityId, EntityKind};

use crate::{DispatchError, StateFetchError};

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Last-known state of an entity as held by the [`StateStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityState {
    pub entity_id: EntityId,
    /// Selects the staleness policy.
    pub kind: EntityKind,
    /// Reference the adapter uses to locate the entity (document self link).
    pub self_link: String,
    /// Most recent observed change. Written by the store only.
    pub last_known_update_time: DateTime<Utc>,
}

/// Refresh/inspect request handed to the [`AdapterDispatcher`].
///
/// Carries no completion hook: the scheduler never observes the refresh
/// itself, only whether the request was accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshRequest {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub resource_reference: String,
    pub requested_at: DateTime<Utc>,
}

impl RefreshRequest {
    pub fn for_state(state: &EntityState, requested_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: state.entity_id.clone(),
            kind: state.kind.clone(),
            resource_reference: state.self_link.clone(),
            requested_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only access to the last-known state of entities.
///
/// Implementations must be safe for concurrent use across entities.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn fetch(&self, entity_id: &EntityId) -> Result<EntityState, StateFetchError>;
}

/// Hands refresh requests to the adapter that owns the entity.
///
/// `Ok(())` means the request was accepted for processing, not that the
/// refresh completed.
#[async_trait::async_trait]
pub trait AdapterDispatcher: Send + Sync {
    async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), DispatchError>;
}

/// External switch that disables reconciliation (test / non-production runs).
pub trait MaintenanceModeFlag: Send + Sync {
    fn is_suppressed(&self) -> bool;
}

/// Source of `now` for tick decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// ---------------------------------------------------------------------------
// Stock implementations
// ---------------------------------------------------------------------------

/// Wall-clock [`Clock`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Runtime-switchable [`MaintenanceModeFlag`].
#[derive(Debug, Default)]
pub struct MaintenanceSwitch {
    suppressed: AtomicBool,
}

impl MaintenanceSwitch {
    pub fn new(suppressed: bool) -> Self {
        Self {
            suppressed: AtomicBool::new(suppressed),
        }
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }
}

impl MaintenanceModeFlag for MaintenanceSwitch {
    fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }
}

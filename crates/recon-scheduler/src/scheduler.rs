//! Reconciliation scheduler: one tick per entity per period.
//!
//! # Tick
//!
//! 1. Fetch state from the [`StateStore`] (bounded by `fetch_timeout`).
//!    Failure ends the tick with [`TickResult::Failed`]; nothing dispatched.
//!    `NotFound` also ends tracking of the entity.
//! 2. Maintenance suppressed → [`TickResult::Skipped`]; timer untouched.
//! 3. Select the interval from the entity kind's [`StalenessPolicy`].
//! 4. Ask the entity's [`ReconciliationTimer`]. Not due →
//!    [`TickResult::NoActionTaken`]. Due → hand a [`RefreshRequest`] to the
//!    [`AdapterDispatcher`] and return [`TickResult::DispatchedRefresh`]
//!    whatever the hand-off outcome.
//!
//! # Invariants
//!
//! - **Serialized per entity**: the entity's timer lock is held from the
//!   decision until the dispatch hand-off returns. At most one dispatch per
//!   entity is outstanding; concurrent ticks of one entity queue.
//! - **Independent across entities**: the registry lock is synchronous,
//!   short, and never held across an `.await`.
//! - **No rollback**: a failed dispatch still advances the timer.
//! - **Untrack survives in-flight ticks**: an entity untracked mid-dispatch
//!   keeps its mutex as a tombstone until the tick lets go, so a re-track
//!   queues behind the outstanding hand-off instead of racing it.
//!
//! [`StalenessPolicy`]: recon_policy::StalenessPolicy

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use recon_policy::{EntityId, PolicySet, ReconciliationTimer};
use tracing::{debug, info, warn};

use crate::stats::TickCounters;
use crate::{
    AdapterDispatcher, Clock, EntityState, MaintenanceModeFlag, RefreshRequest, SchedulerStats,
    StateFetchError, StateStore,
};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one tick for one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickResult {
    /// State could not be fetched; nothing was dispatched.
    Failed(StateFetchError),
    /// Maintenance is suppressed; nothing was evaluated.
    Skipped,
    /// The selected interval has not elapsed since the last request.
    NoActionTaken,
    /// A refresh request was handed to the adapter (accepted or not).
    DispatchedRefresh,
}

impl TickResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, TickResult::Failed(_))
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, TickResult::DispatchedRefresh)
    }
}

/// Aggregate of one pass over all tracked entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub failed: usize,
    pub skipped: usize,
    pub no_action: usize,
    pub dispatched: usize,
}

impl PassSummary {
    fn add(&mut self, result: &TickResult) {
        match result {
            TickResult::Failed(_) => self.failed += 1,
            TickResult::Skipped => self.skipped += 1,
            TickResult::NoActionTaken => self.no_action += 1,
            TickResult::DispatchedRefresh => self.dispatched += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.failed + self.skipped + self.no_action + self.dispatched
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Timeouts applied around the external collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Hard bound on the state fetch.
    pub fetch_timeout: Duration,
    /// Soft bound on the dispatch hand-off: a warning is logged once the
    /// hand-off has been pending this long; the tick keeps waiting.
    pub dispatch_warn_after: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            dispatch_warn_after: Duration::from_secs(60),
        }
    }
}

/// External collaborators, injected by the host.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn StateStore>,
    pub dispatcher: Arc<dyn AdapterDispatcher>,
    pub maintenance: Arc<dyn MaintenanceModeFlag>,
    pub clock: Arc<dyn Clock>,
}

/// Timer plus the registry generation it was last reconciled against.
#[derive(Debug, Default)]
struct TimerCell {
    timer: ReconciliationTimer,
    generation: u64,
}

type TimerHandle = Arc<tokio::sync::Mutex<TimerCell>>;

/// Registry entry for one entity.
///
/// An untracked entity whose handle is still held by a tick stays here as a
/// tombstone (`tracked == false`) so a re-track queues on the same mutex.
/// The bumped `generation` makes the next holder start from "never".
#[derive(Debug)]
struct Slot {
    handle: TimerHandle,
    tracked: bool,
    generation: u64,
}

impl Slot {
    fn fresh() -> Self {
        Self {
            handle: Arc::default(),
            tracked: true,
            generation: 0,
        }
    }
}

/// Holds an entity's timer handle for the length of one tick and drops
/// idle tombstones when released.
struct Lease<'a> {
    scheduler: &'a ReconciliationScheduler,
    entity_id: &'a EntityId,
    handle: Option<TimerHandle>,
}

impl Lease<'_> {
    fn handle(&self) -> Option<&TimerHandle> {
        self.handle.as_ref()
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.scheduler.release(self.entity_id, handle);
        }
    }
}

/// Drives ticks for any number of tracked entities.
pub struct ReconciliationScheduler {
    deps: SchedulerDeps,
    policies: PolicySet,
    options: SchedulerOptions,
    timers: Mutex<BTreeMap<EntityId, Slot>>,
    counters: TickCounters,
}

impl std::fmt::Debug for ReconciliationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationScheduler")
            .field("policies", &self.policies)
            .field("options", &self.options)
            .field("tracked", &self.tracked().len())
            .finish_non_exhaustive()
    }
}

impl ReconciliationScheduler {
    pub fn new(deps: SchedulerDeps, policies: PolicySet, options: SchedulerOptions) -> Self {
        Self {
            deps,
            policies,
            options,
            timers: Mutex::new(BTreeMap::new()),
            counters: TickCounters::default(),
        }
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    // -----------------------------------------------------------------------
    // Tracking registry
    // -----------------------------------------------------------------------

    /// Begin tracking `entity_id`. Returns `false` if it was already tracked.
    ///
    /// Re-tracking an entity whose previous tick is still dispatching waits
    /// for that dispatch before its own first decision.
    pub fn track(&self, entity_id: EntityId) -> bool {
        let mut timers = self.registry();
        match timers.get_mut(&entity_id) {
            Some(slot) if slot.tracked => return false,
            Some(slot) => slot.tracked = true,
            None => {
                timers.insert(entity_id.clone(), Slot::fresh());
            }
        }
        debug!(entity_id = %entity_id, "tracking entity");
        true
    }

    /// Stop tracking `entity_id` and drop its timer.
    ///
    /// A tick already in flight finishes its hand-off; the dropped state is
    /// not re-inserted and a later re-track starts from "never requested".
    pub fn untrack(&self, entity_id: &EntityId) -> bool {
        let mut timers = self.registry();
        let Some(slot) = timers.get_mut(entity_id) else {
            return false;
        };
        if !slot.tracked {
            return false;
        }
        if Arc::strong_count(&slot.handle) == 1 {
            timers.remove(entity_id);
        } else {
            slot.tracked = false;
            slot.generation += 1;
        }
        debug!(entity_id = %entity_id, "untracked entity");
        true
    }

    pub fn is_tracked(&self, entity_id: &EntityId) -> bool {
        self.registry().get(entity_id).is_some_and(|slot| slot.tracked)
    }

    /// Tracked entities, sorted.
    pub fn tracked(&self) -> Vec<EntityId> {
        self.registry()
            .iter()
            .filter(|(_, slot)| slot.tracked)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// When a refresh was last requested for `entity_id`, if ever.
    ///
    /// Waits for an in-flight tick of the same entity to finish.
    pub async fn last_inspect_request_time(
        &self,
        entity_id: &EntityId,
    ) -> Option<DateTime<Utc>> {
        let lease = self.acquire(entity_id, false);
        let handle = lease.handle()?;
        let mut cell = handle.lock().await;
        if !self.sync_cell(entity_id, handle, &mut cell) {
            return None;
        }
        cell.timer.last_inspect_request_time()
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<EntityId, Slot>> {
        // Map updates are single inserts/removes/flag flips; a poisoned
        // guard holds a consistent map.
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clone the entity's handle into a lease. With `may_track`, an
    /// untracked entity becomes tracked; otherwise the lease is empty.
    fn acquire<'a>(&'a self, entity_id: &'a EntityId, may_track: bool) -> Lease<'a> {
        let mut timers = self.registry();
        let handle = match timers.get_mut(entity_id) {
            Some(slot) if slot.tracked => Some(Arc::clone(&slot.handle)),
            Some(slot) if may_track => {
                slot.tracked = true;
                Some(Arc::clone(&slot.handle))
            }
            Some(_) => None,
            None if may_track => {
                let slot = Slot::fresh();
                let handle = Arc::clone(&slot.handle);
                timers.insert(entity_id.clone(), slot);
                Some(handle)
            }
            None => None,
        };
        drop(timers);
        Lease {
            scheduler: self,
            entity_id,
            handle,
        }
    }

    /// Remove the entity's tombstone once nobody but the registry holds it.
    ///
    /// Handles are only cloned and dropped under the registry lock, so the
    /// strong count read here is exact.
    fn release(&self, entity_id: &EntityId, handle: TimerHandle) {
        let mut timers = self.registry();
        let idle_tombstone = timers.get(entity_id).is_some_and(|slot| {
            !slot.tracked
                && Arc::ptr_eq(&slot.handle, &handle)
                && Arc::strong_count(&handle) == 2
        });
        drop(handle);
        if idle_tombstone {
            timers.remove(entity_id);
        }
    }

    /// Bring `cell` in line with the registry. Returns whether the entity is
    /// still tracked under this handle.
    fn sync_cell(
        &self,
        entity_id: &EntityId,
        handle: &TimerHandle,
        cell: &mut TimerCell,
    ) -> bool {
        let timers = self.registry();
        match timers.get(entity_id) {
            Some(slot) if Arc::ptr_eq(&slot.handle, handle) => {
                if cell.generation != slot.generation {
                    cell.timer = ReconciliationTimer::new();
                    cell.generation = slot.generation;
                }
                slot.tracked
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    /// Run one tick for `entity_id`.
    ///
    /// An untracked entity becomes tracked once its state has been fetched.
    /// An entity the store reports as not found stops being tracked.
    pub async fn tick(&self, entity_id: &EntityId) -> TickResult {
        let result = self.run_tick(entity_id).await;
        self.counters.record(&result);
        result
    }

    /// Start tracking and run the first tick right away.
    pub async fn track_and_tick(&self, entity_id: EntityId) -> TickResult {
        self.track(entity_id.clone());
        self.tick(&entity_id).await
    }

    /// Tick every tracked entity concurrently.
    pub async fn tick_all(&self) -> PassSummary {
        let ids = self.tracked();
        let results = join_all(ids.iter().map(|id| self.tick(id))).await;

        let mut summary = PassSummary::default();
        for (id, result) in ids.iter().zip(&results) {
            if let TickResult::Failed(err) = result {
                debug!(entity_id = %id, error = %err, "tick failed during pass");
            }
            summary.add(result);
        }
        summary
    }

    async fn run_tick(&self, entity_id: &EntityId) -> TickResult {
        let was_tracked = self.is_tracked(entity_id);

        let state = match self.fetch_state(entity_id).await {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    entity_id = %entity_id,
                    error = %err,
                    "failed to fetch state for periodic maintenance"
                );
                if matches!(err, StateFetchError::NotFound(_)) && self.untrack(entity_id) {
                    info!(entity_id = %entity_id, "entity gone from state store; untracked");
                }
                return TickResult::Failed(err);
            }
        };

        if self.deps.maintenance.is_suppressed() {
            debug!(entity_id = %entity_id, "maintenance suppressed; skipping tick");
            return TickResult::Skipped;
        }

        // A tracked entity untracked during the fetch is not revived.
        let lease = self.acquire(entity_id, !was_tracked);
        let Some(handle) = lease.handle() else {
            debug!(entity_id = %entity_id, "untracked during tick; nothing to do");
            return TickResult::NoActionTaken;
        };

        let mut cell = handle.lock().await;
        if !self.sync_cell(entity_id, handle, &mut cell) {
            debug!(entity_id = %entity_id, "untracked during tick; nothing to do");
            return TickResult::NoActionTaken;
        }

        let now = self.deps.clock.now();
        let policy = self.policies.policy_for(&state.kind);
        let interval = policy.select_interval(state.last_known_update_time, now);

        if !cell.timer.should_dispatch(now, interval) {
            debug!(
                entity_id = %entity_id,
                kind = %state.kind,
                interval_secs = interval.num_seconds(),
                "refresh not due"
            );
            return TickResult::NoActionTaken;
        }

        let request = RefreshRequest::for_state(&state, now);
        info!(
            entity_id = %entity_id,
            kind = %state.kind,
            interval_secs = interval.num_seconds(),
            "requesting entity refresh"
        );
        self.dispatch(&request).await;

        // Timer lock released here, after the hand-off.
        drop(cell);
        TickResult::DispatchedRefresh
    }

    async fn fetch_state(&self, entity_id: &EntityId) -> Result<EntityState, StateFetchError> {
        let bound = self.options.fetch_timeout;
        match tokio::time::timeout(bound, self.deps.store.fetch(entity_id)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StateFetchError::Timeout {
                entity_id: entity_id.clone(),
                after: bound,
            }),
        }
    }

    /// Hand `request` to the adapter. Failures are logged and counted only.
    async fn dispatch(&self, request: &RefreshRequest) {
        let warn_after = self.options.dispatch_warn_after;
        let mut pending = self.deps.dispatcher.request_refresh(request);

        let outcome = match tokio::time::timeout(warn_after, &mut pending).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                self.counters.record_slow_dispatch();
                warn!(
                    entity_id = %request.entity_id,
                    waited_ms = warn_after.as_millis() as u64,
                    "refresh dispatch still pending"
                );
                pending.await
            }
        };

        if let Err(err) = outcome {
            self.counters.record_dispatch_failure();
            warn!(entity_id = %request.entity_id, error = %err, "refresh dispatch failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispatchError, MaintenanceSwitch};
    use chrono::TimeZone;
    use recon_policy::EntityKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedStore {
        updated: DateTime<Utc>,
    }

    #[async_trait::async_trait]
    impl StateStore for FixedStore {
        async fn fetch(&self, entity_id: &EntityId) -> Result<EntityState, StateFetchError> {
            if entity_id.as_str().starts_with("/missing") {
                return Err(StateFetchError::NotFound(entity_id.clone()));
            }
            Ok(EntityState {
                entity_id: entity_id.clone(),
                kind: EntityKind::new("kubernetes"),
                self_link: entity_id.as_str().to_string(),
                last_known_update_time: self.updated,
            })
        }
    }

    #[derive(Default)]
    struct CountingDispatcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl AdapterDispatcher for CountingDispatcher {
        async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DispatchError::Rejected {
                    entity_id: request.entity_id.clone(),
                    message: "busy".to_string(),
                });
            }
            Ok(())
        }
    }

    struct FrozenClock(DateTime<Utc>);

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn scheduler(dispatcher: Arc<CountingDispatcher>, suppressed: bool) -> ReconciliationScheduler {
        let deps = SchedulerDeps {
            store: Arc::new(FixedStore { updated: t0() }),
            dispatcher,
            maintenance: Arc::new(MaintenanceSwitch::new(suppressed)),
            clock: Arc::new(FrozenClock(t0())),
        };
        ReconciliationScheduler::new(deps, PolicySet::default(), SchedulerOptions::default())
    }

    #[tokio::test]
    async fn first_tick_dispatches_second_does_not() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let s = scheduler(Arc::clone(&dispatcher), false);
        let id = EntityId::new("/k8s/pod-a");

        assert_eq!(s.tick(&id).await, TickResult::DispatchedRefresh);
        assert_eq!(s.tick(&id).await, TickResult::NoActionTaken);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.last_inspect_request_time(&id).await, Some(t0()));
    }

    #[tokio::test]
    async fn dispatch_failure_still_reports_dispatched() {
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let s = scheduler(dispatcher, false);
        let id = EntityId::new("/k8s/pod-a");

        assert_eq!(s.tick(&id).await, TickResult::DispatchedRefresh);
        assert_eq!(s.stats().dispatch_failures, 1);
        assert_eq!(s.last_inspect_request_time(&id).await, Some(t0()));
    }

    #[tokio::test]
    async fn suppressed_tick_leaves_timer_untouched() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let s = scheduler(Arc::clone(&dispatcher), true);
        let id = EntityId::new("/k8s/pod-a");

        s.track(id.clone());
        assert_eq!(s.tick(&id).await, TickResult::Skipped);
        assert_eq!(s.last_inspect_request_time(&id).await, None);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_failure_fails_tick() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let s = scheduler(Arc::clone(&dispatcher), false);
        let id = EntityId::new("/missing");

        let result = s.tick(&id).await;
        assert_eq!(result, TickResult::Failed(StateFetchError::NotFound(id)));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.stats().ticks_failed, 1);
    }

    #[test]
    fn track_is_idempotent_and_sorted() {
        let s = scheduler(Arc::new(CountingDispatcher::default()), false);
        assert!(s.track(EntityId::new("/b")));
        assert!(s.track(EntityId::new("/a")));
        assert!(!s.track(EntityId::new("/a")));
        assert_eq!(s.tracked(), vec![EntityId::new("/a"), EntityId::new("/b")]);
        assert!(s.untrack(&EntityId::new("/a")));
        assert!(!s.untrack(&EntityId::new("/a")));
        assert!(!s.is_tracked(&EntityId::new("/a")));
    }

    #[tokio::test]
    async fn not_found_ticks_leave_registry_empty() {
        let s = scheduler(Arc::new(CountingDispatcher::default()), false);
        s.track(EntityId::new("/missing-tracked"));

        assert!(s.tick(&EntityId::new("/missing-tracked")).await.is_failed());
        for i in 0..100 {
            let id = EntityId::new(format!("/missing-{i}"));
            assert!(s.tick(&id).await.is_failed());
        }
        assert!(s.tracked().is_empty());
        assert!(s.registry().is_empty());
    }

    #[tokio::test]
    async fn held_handle_keeps_tombstone_until_released() {
        let s = scheduler(Arc::new(CountingDispatcher::default()), false);
        let id = EntityId::new("/k8s/pod-a");
        s.track(id.clone());

        let lease = s.acquire(&id, false);
        assert!(lease.handle().is_some());
        assert!(s.untrack(&id));
        assert!(!s.untrack(&id));
        assert!(!s.is_tracked(&id));
        assert_eq!(s.registry().len(), 1);

        drop(lease);
        assert!(s.registry().is_empty());
    }

    #[tokio::test]
    async fn retrack_over_tombstone_starts_from_never() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let s = scheduler(Arc::clone(&dispatcher), false);
        let id = EntityId::new("/k8s/pod-a");

        assert!(s.track_and_tick(id.clone()).await.is_dispatched());
        let lease = s.acquire(&id, false);
        s.untrack(&id);
        assert!(s.track(id.clone()));
        drop(lease);

        assert_eq!(s.last_inspect_request_time(&id).await, None);
        assert_eq!(s.tick(&id).await, TickResult::DispatchedRefresh);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }
}

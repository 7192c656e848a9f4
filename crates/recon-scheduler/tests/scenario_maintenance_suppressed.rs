//! Scenario: maintenance mode suppresses all reconciliation
//!
//! # Invariants under test
//!
//! 1. While suppressed, every tick returns `Skipped` no matter how much
//!    time has passed.
//! 2. `last_inspect_request_time` is never mutated while suppressed.
//! 3. Lifting suppression resumes normal decisions (first tick dispatches).

use chrono::Duration;
use recon_policy::{EntityId, PolicySet};
use recon_scheduler::TickResult;
use recon_testkit::{entity, Harness, ManualClock};

#[tokio::test]
async fn suppressed_ticks_skip_and_never_touch_timer() {
    let h = Harness::new(PolicySet::default());
    let id = EntityId::new("/resources/kubernetes-pods/pod-1");
    h.store
        .insert(entity(id.as_str(), "kubernetes", ManualClock::minutes(0)));
    h.scheduler.track(id.clone());
    h.maintenance.set_suppressed(true);

    for _ in 0..5 {
        h.clock.advance(Duration::hours(3));
        assert_eq!(h.scheduler.tick(&id).await, TickResult::Skipped);
    }

    assert_eq!(h.scheduler.last_inspect_request_time(&id).await, None);
    assert_eq!(h.dispatcher.request_count(), 0);
    assert_eq!(h.scheduler.stats().ticks_skipped, 5);

    h.maintenance.set_suppressed(false);
    assert_eq!(h.scheduler.tick(&id).await, TickResult::DispatchedRefresh);
}

#[tokio::test]
async fn suppression_mid_life_freezes_timer() {
    let h = Harness::new(PolicySet::default());
    let id = EntityId::new("/resources/kubernetes-pods/pod-2");
    h.store
        .insert(entity(id.as_str(), "kubernetes", ManualClock::minutes(0)));

    h.clock.set(ManualClock::minutes(1));
    assert!(h.scheduler.tick(&id).await.is_dispatched());

    h.maintenance.set_suppressed(true);
    h.clock.set(ManualClock::minutes(30));
    assert_eq!(h.scheduler.tick(&id).await, TickResult::Skipped);
    assert_eq!(
        h.scheduler.last_inspect_request_time(&id).await,
        Some(ManualClock::minutes(1))
    );
}

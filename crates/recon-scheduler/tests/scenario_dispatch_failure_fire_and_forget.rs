//! Scenario: dispatch failures are fire-and-forget
//!
//! # Invariants under test
//!
//! 1. Adapter rejection or outage still yields `DispatchedRefresh`.
//! 2. The timer advances anyway: the next tick inside the interval is
//!    `NoActionTaken` (no hot-loop against a broken adapter).
//! 3. Failures and slow hand-offs are counted in `SchedulerStats`.

use std::time::Duration;

use recon_policy::{EntityId, PolicySet};
use recon_scheduler::{SchedulerOptions, TickResult};
use recon_testkit::{entity, DispatchMode, Harness, ManualClock};

#[tokio::test]
async fn rejected_dispatch_is_not_a_tick_failure() {
    let h = Harness::new(PolicySet::default());
    let id = EntityId::new("/resources/kubernetes-pods/pod-1");
    h.store
        .insert(entity(id.as_str(), "kubernetes", ManualClock::minutes(0)));
    h.dispatcher.set_mode(DispatchMode::Reject);

    h.clock.set(ManualClock::minutes(1));
    assert_eq!(h.scheduler.tick(&id).await, TickResult::DispatchedRefresh);

    h.clock.set(ManualClock::minutes(3));
    assert_eq!(h.scheduler.tick(&id).await, TickResult::NoActionTaken);

    assert_eq!(h.dispatcher.count_for(&id), 1);
    assert_eq!(
        h.scheduler.last_inspect_request_time(&id).await,
        Some(ManualClock::minutes(1))
    );

    let stats = h.scheduler.stats();
    assert_eq!(stats.dispatch_failures, 1);
    assert_eq!(stats.ticks_failed, 0);
}

#[tokio::test]
async fn unreachable_adapter_retried_only_on_next_interval() {
    let h = Harness::new(PolicySet::default());
    let id = EntityId::new("/resources/pks/clusters/c1");
    h.store
        .insert(entity(id.as_str(), "pks_cluster", ManualClock::minutes(0)));
    h.dispatcher.set_mode(DispatchMode::Unreachable);

    for minute in 0..10 {
        h.clock.set(ManualClock::minutes(minute));
        h.scheduler.tick(&id).await;
    }

    // Active tier (5m): requests at t=0 and t=5 only.
    assert_eq!(h.dispatcher.count_for(&id), 2);
    assert_eq!(h.scheduler.stats().dispatch_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn slow_hand_off_is_flagged_but_awaited() {
    let options = SchedulerOptions {
        dispatch_warn_after: Duration::from_secs(2),
        ..SchedulerOptions::default()
    };
    let h = Harness::with_options(PolicySet::default(), options);
    let id = EntityId::new("/resources/kubernetes-pods/pod-1");
    h.store
        .insert(entity(id.as_str(), "kubernetes", ManualClock::minutes(0)));
    h.dispatcher.set_delay(Some(Duration::from_secs(10)));

    let started = tokio::time::Instant::now();
    assert_eq!(h.scheduler.tick(&id).await, TickResult::DispatchedRefresh);
    assert!(started.elapsed() >= Duration::from_secs(10));

    let stats = h.scheduler.stats();
    assert_eq!(stats.slow_dispatches, 1);
    assert_eq!(stats.dispatch_failures, 0);
}

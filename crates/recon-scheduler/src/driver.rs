//! Periodic trigger: ticks every tracked entity once per period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::ReconciliationScheduler;

/// Shortest accepted period; `tokio::time::interval` rejects zero.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Background task running [`ReconciliationScheduler::tick_all`] on a
/// fixed period.
///
/// A pass that overruns the period delays the next one instead of
/// bunching passes together. [`MaintenanceLoop::shutdown`] lets a pass in
/// flight finish. A `period` below [`MIN_PERIOD`] is raised to it.
#[derive(Debug)]
pub struct MaintenanceLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceLoop {
    pub fn spawn(scheduler: Arc<ReconciliationScheduler>, period: Duration) -> Self {
        let (shutdown, mut stop_rx) = watch::channel(false);
        if period < MIN_PERIOD {
            warn!(
                requested_ms = period.as_millis() as u64,
                "maintenance period below minimum; clamping"
            );
        }
        let period = period.max(MIN_PERIOD);

        let handle = tokio::spawn(async move {
            info!(period_ms = period.as_millis() as u64, "maintenance loop started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let summary = scheduler.tick_all().await;
                        if summary.failed > 0 {
                            warn!(
                                failed = summary.failed,
                                total = summary.total(),
                                "maintenance pass had failed ticks"
                            );
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("maintenance loop stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "maintenance loop task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

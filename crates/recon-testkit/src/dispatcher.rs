use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use recon_policy::EntityId;
use recon_scheduler::{AdapterDispatcher, DispatchError, RefreshRequest};

use crate::lock;

/// How [`RecordingDispatcher`] answers requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    #[default]
    Accept,
    Reject,
    Unreachable,
}

#[derive(Debug, Default)]
struct InFlight {
    current: BTreeMap<EntityId, usize>,
    peak: BTreeMap<EntityId, usize>,
}

/// [`AdapterDispatcher`] that records every request it sees.
///
/// Requests are recorded whatever the [`DispatchMode`], so tests can assert
/// on attempted dispatches as well as accepted ones.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<RefreshRequest>>,
    mode: Mutex<DispatchMode>,
    delay: Mutex<Option<Duration>>,
    in_flight: Mutex<InFlight>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: DispatchMode) {
        *lock(&self.mode) = mode;
    }

    /// Hold every hand-off for `delay` (tokio time) before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn requests(&self) -> Vec<RefreshRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn count_for(&self, id: &EntityId) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| &r.entity_id == id)
            .count()
    }

    /// Highest number of simultaneously pending hand-offs seen for `id`.
    pub fn peak_in_flight(&self, id: &EntityId) -> usize {
        lock(&self.in_flight).peak.get(id).copied().unwrap_or(0)
    }

    fn enter(&self, id: &EntityId) {
        let mut f = lock(&self.in_flight);
        let n = {
            let cur = f.current.entry(id.clone()).or_insert(0);
            *cur += 1;
            *cur
        };
        let peak = f.peak.entry(id.clone()).or_insert(0);
        *peak = (*peak).max(n);
    }

    fn leave(&self, id: &EntityId) {
        if let Some(cur) = lock(&self.in_flight).current.get_mut(id) {
            *cur = cur.saturating_sub(1);
        }
    }
}

#[async_trait::async_trait]
impl AdapterDispatcher for RecordingDispatcher {
    async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), DispatchError> {
        lock(&self.requests).push(request.clone());
        self.enter(&request.entity_id);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.leave(&request.entity_id);

        let mode = *lock(&self.mode);
        match mode {
            DispatchMode::Accept => Ok(()),
            DispatchMode::Reject => Err(DispatchError::Rejected {
                entity_id: request.entity_id.clone(),
                message: "injected rejection".to_string(),
            }),
            DispatchMode::Unreachable => Err(DispatchError::Unreachable {
                entity_id: request.entity_id.clone(),
                message: "injected outage".to_string(),
            }),
        }
    }
}

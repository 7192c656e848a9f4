use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recon_policy::{EntityId, EntityKind};
use recon_scheduler::{EntityState, StateFetchError, StateStore};

use crate::lock;

/// Build an [`EntityState`] whose self link equals its id.
pub fn entity(id: &str, kind: &str, last_known_update_time: DateTime<Utc>) -> EntityState {
    EntityState {
        entity_id: EntityId::new(id),
        kind: EntityKind::new(kind),
        self_link: id.to_string(),
        last_known_update_time,
    }
}

/// [`StateStore`] backed by a map, with failure and latency injection.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: Mutex<BTreeMap<EntityId, EntityState>>,
    unavailable: Mutex<BTreeSet<EntityId>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: EntityState) {
        lock(&self.states).insert(state.entity_id.clone(), state);
    }

    /// Record an observed change at `at`. No-op for unknown ids.
    pub fn touch(&self, id: &EntityId, at: DateTime<Utc>) {
        if let Some(state) = lock(&self.states).get_mut(id) {
            state.last_known_update_time = at;
        }
    }

    pub fn remove(&self, id: &EntityId) -> Option<EntityState> {
        lock(&self.states).remove(id)
    }

    /// Make fetches for `id` fail as a transient outage.
    pub fn set_unavailable(&self, id: &EntityId, unavailable: bool) {
        let mut set = lock(&self.unavailable);
        if unavailable {
            set.insert(id.clone());
        } else {
            set.remove(id);
        }
    }

    /// Delay every fetch by `delay` (tokio time).
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn fetch(&self, entity_id: &EntityId) -> Result<EntityState, StateFetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.unavailable).contains(entity_id) {
            return Err(StateFetchError::Unavailable {
                entity_id: entity_id.clone(),
                message: "injected outage".to_string(),
            });
        }

        lock(&self.states)
            .get(entity_id)
            .cloned()
            .ok_or_else(|| StateFetchError::NotFound(entity_id.clone()))
    }
}

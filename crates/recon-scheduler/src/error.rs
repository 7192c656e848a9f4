use std::fmt;
use std::time::Duration;

use recon_policy::EntityId;

// ---------------------------------------------------------------------------
// State fetch
// ---------------------------------------------------------------------------

/// The entity's last-known state could not be read. Fails the tick.
///
/// Not retried by the scheduler; the next periodic tick is the retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateFetchError {
    /// The store has no document for this entity.
    NotFound(EntityId),
    /// The store could not be reached or returned a transient error.
    Unavailable { entity_id: EntityId, message: String },
    /// The fetch did not complete within the configured bound.
    Timeout { entity_id: EntityId, after: Duration },
}

impl StateFetchError {
    pub fn entity_id(&self) -> &EntityId {
        match self {
            StateFetchError::NotFound(id) => id,
            StateFetchError::Unavailable { entity_id, .. } => entity_id,
            StateFetchError::Timeout { entity_id, .. } => entity_id,
        }
    }
}

impl fmt::Display for StateFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFetchError::NotFound(id) => write!(f, "entity state not found: {id}"),
            StateFetchError::Unavailable { entity_id, message } => {
                write!(f, "state store unavailable for {entity_id}: {message}")
            }
            StateFetchError::Timeout { entity_id, after } => {
                write!(
                    f,
                    "state fetch for {entity_id} timed out after {}ms",
                    after.as_millis()
                )
            }
        }
    }
}

impl std::error::Error for StateFetchError {}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// The adapter did not accept a refresh request.
///
/// Logged at warn level by the scheduler; never fails a tick and never
/// rolls back the entity's timer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// The adapter answered and refused the request.
    Rejected { entity_id: EntityId, message: String },
    /// The adapter could not be reached.
    Unreachable { entity_id: EntityId, message: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Rejected { entity_id, message } => {
                write!(f, "adapter rejected refresh for {entity_id}: {message}")
            }
            DispatchError::Unreachable { entity_id, message } => {
                write!(f, "adapter unreachable for {entity_id}: {message}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_in_millis() {
        let err = StateFetchError::Timeout {
            entity_id: EntityId::new("/k8s/pod-1"),
            after: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "state fetch for /k8s/pod-1 timed out after 2000ms");
        assert_eq!(err.entity_id().as_str(), "/k8s/pod-1");
    }

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError::Unreachable {
            entity_id: EntityId::new("/pks/c1"),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "adapter unreachable for /pks/c1: connection refused");
    }
}

//! Staleness policy: interval selection by age of last observed change.
//!
//! # Invariants
//!
//! - **Strict threshold**: an entity whose age is exactly
//!   `recent_age_threshold` is quiescent (slow interval).
//! - **Skew tolerant**: a `last_known_update_time` in the future (negative
//!   age) counts as recently active.
//! - **Total**: once constructed, selection never fails.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::EntityKind;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Raw interval settings for one [`StalenessPolicy`].
///
/// Not validated until passed to [`StalenessPolicy::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StalenessConfig {
    /// Entities changed within this window of `now` are recently active.
    pub recent_age_threshold: Duration,
    /// Refresh period for recently active entities.
    pub active_interval: Duration,
    /// Refresh period for quiescent entities.
    pub slow_interval: Duration,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            recent_age_threshold: Duration::minutes(10),
            active_interval: Duration::minutes(5),
            slow_interval: Duration::hours(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration rejected at construction time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// A duration was zero or negative.
    NonPositiveDuration {
        field: &'static str,
        kind: Option<EntityKind>,
    },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::NonPositiveDuration { field, kind: None } => {
                write!(f, "policy duration must be positive: {field}")
            }
            PolicyError::NonPositiveDuration {
                field,
                kind: Some(kind),
            } => {
                write!(f, "policy duration must be positive: {field} (kind={kind})")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Freshness class of an entity at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Changed within `recent_age_threshold`; polled on the active interval.
    RecentlyActive,
    /// No change within `recent_age_threshold`; polled on the slow interval.
    Quiescent,
}

/// Validated two-tier backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StalenessPolicy {
    cfg: StalenessConfig,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            cfg: StalenessConfig::default(),
        }
    }
}

impl StalenessPolicy {
    /// Validate `cfg` and build a policy. Every duration must be positive.
    pub fn new(cfg: StalenessConfig) -> Result<Self, PolicyError> {
        validate(&cfg, None)?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.cfg
    }

    /// Classify an entity by the age of its last observed change.
    pub fn freshness(
        &self,
        last_known_update_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Freshness {
        let age = now.signed_duration_since(last_known_update_time);
        if age < self.cfg.recent_age_threshold {
            Freshness::RecentlyActive
        } else {
            Freshness::Quiescent
        }
    }

    /// Refresh interval that currently applies to an entity.
    pub fn select_interval(
        &self,
        last_known_update_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Duration {
        match self.freshness(last_known_update_time, now) {
            Freshness::RecentlyActive => self.cfg.active_interval,
            Freshness::Quiescent => self.cfg.slow_interval,
        }
    }
}

fn validate(cfg: &StalenessConfig, kind: Option<&EntityKind>) -> Result<(), PolicyError> {
    let fields = [
        ("recent_age_threshold", cfg.recent_age_threshold),
        ("active_interval", cfg.active_interval),
        ("slow_interval", cfg.slow_interval),
    ];
    for (field, d) in fields {
        if d <= Duration::zero() {
            return Err(PolicyError::NonPositiveDuration {
                field,
                kind: kind.cloned(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Policy set
// ---------------------------------------------------------------------------

/// Default policy plus per-kind overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicySet {
    default: StalenessPolicy,
    overrides: BTreeMap<EntityKind, StalenessPolicy>,
}

impl PolicySet {
    /// Build a set from a default config and per-kind override configs.
    ///
    /// Fails on the first invalid config; the error names the offending kind.
    pub fn new(
        default: StalenessConfig,
        overrides: BTreeMap<EntityKind, StalenessConfig>,
    ) -> Result<Self, PolicyError> {
        let default = StalenessPolicy::new(default)?;
        let mut out = BTreeMap::new();
        for (kind, cfg) in overrides {
            validate(&cfg, Some(&kind))?;
            out.insert(kind, StalenessPolicy { cfg });
        }
        Ok(Self {
            default,
            overrides: out,
        })
    }

    /// A set with a single policy used for every kind.
    pub fn uniform(policy: StalenessPolicy) -> Self {
        Self {
            default: policy,
            overrides: BTreeMap::new(),
        }
    }

    pub fn default_policy(&self) -> &StalenessPolicy {
        &self.default
    }

    /// Policy for `kind`; unknown kinds fall back to the default.
    pub fn policy_for(&self, kind: &EntityKind) -> &StalenessPolicy {
        self.overrides.get(kind).unwrap_or(&self.default)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = StalenessConfig::default();
        assert_eq!(cfg.recent_age_threshold, Duration::minutes(10));
        assert_eq!(cfg.active_interval, Duration::minutes(5));
        assert_eq!(cfg.slow_interval, Duration::hours(1));
    }

    #[test]
    fn recent_entity_gets_active_interval() {
        let p = StalenessPolicy::default();
        let now = t0() + Duration::minutes(9);
        assert_eq!(p.select_interval(t0(), now), Duration::minutes(5));
        assert_eq!(p.freshness(t0(), now), Freshness::RecentlyActive);
    }

    #[test]
    fn threshold_boundary_is_quiescent() {
        let p = StalenessPolicy::default();
        let now = t0() + Duration::minutes(10);
        assert_eq!(p.select_interval(t0(), now), Duration::hours(1));
    }

    #[test]
    fn future_update_time_counts_as_recent() {
        let p = StalenessPolicy::default();
        let now = t0();
        let skewed = t0() + Duration::minutes(3);
        assert_eq!(p.select_interval(skewed, now), Duration::minutes(5));
    }

    #[test]
    fn zero_duration_rejected() {
        let cfg = StalenessConfig {
            active_interval: Duration::zero(),
            ..StalenessConfig::default()
        };
        let err = StalenessPolicy::new(cfg).unwrap_err();
        assert_eq!(
            err,
            PolicyError::NonPositiveDuration {
                field: "active_interval",
                kind: None
            }
        );
    }

    #[test]
    fn negative_override_names_kind() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            EntityKind::new("pks_cluster"),
            StalenessConfig {
                slow_interval: Duration::seconds(-1),
                ..StalenessConfig::default()
            },
        );
        let err = PolicySet::new(StalenessConfig::default(), overrides).unwrap_err();
        assert_eq!(
            err.to_string(),
            "policy duration must be positive: slow_interval (kind=pks_cluster)"
        );
    }

    #[test]
    fn unknown_kind_falls_back_to_default() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            EntityKind::new("pks_cluster"),
            StalenessConfig {
                active_interval: Duration::minutes(2),
                ..StalenessConfig::default()
            },
        );
        let set = PolicySet::new(StalenessConfig::default(), overrides).unwrap();

        let pks = set.policy_for(&EntityKind::new("pks_cluster"));
        assert_eq!(pks.config().active_interval, Duration::minutes(2));

        let other = set.policy_for(&EntityKind::new("kubernetes"));
        assert_eq!(other, set.default_policy());
    }
}

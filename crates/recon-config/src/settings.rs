//! Typed scheduler settings extracted from merged config JSON.
//!
//! # Invariants
//!
//! - Every duration is a whole number of seconds, strictly positive and
//!   representable as a `chrono::Duration`; anything else fails with
//!   `CONFIG_INVALID_DURATION`.
//! - A kind override inherits each missing field from the top-level values.
//! - Missing sections mean defaults, never an error.

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;

use recon_policy::{EntityKind, PolicySet, StalenessConfig};
use recon_scheduler::{MaintenanceSwitch, SchedulerOptions};

const DEFAULT_LOOP_PERIOD_SECS: i64 = 60;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIntervals {
    active_interval_secs: Option<i64>,
    slow_interval_secs: Option<i64>,
    recent_age_threshold_secs: Option<i64>,
}

// Unknown keys here are left to the unused-key report.
#[derive(Debug, Default, Deserialize)]
struct RawReconcile {
    active_interval_secs: Option<i64>,
    slow_interval_secs: Option<i64>,
    recent_age_threshold_secs: Option<i64>,
    fetch_timeout_secs: Option<i64>,
    dispatch_warn_after_secs: Option<i64>,
    loop_period_secs: Option<i64>,
    #[serde(default)]
    kinds: BTreeMap<String, RawIntervals>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMaintenance {
    skip: Option<bool>,
}

/// Everything the host needs to build and drive a scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub staleness: StalenessConfig,
    pub kind_overrides: BTreeMap<EntityKind, StalenessConfig>,
    pub fetch_timeout: StdDuration,
    pub dispatch_warn_after: StdDuration,
    pub loop_period: StdDuration,
    pub skip_maintenance: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let options = SchedulerOptions::default();
        Self {
            staleness: StalenessConfig::default(),
            kind_overrides: BTreeMap::new(),
            fetch_timeout: options.fetch_timeout,
            dispatch_warn_after: options.dispatch_warn_after,
            loop_period: StdDuration::from_secs(DEFAULT_LOOP_PERIOD_SECS as u64),
            skip_maintenance: false,
        }
    }
}

impl SchedulerSettings {
    /// Read `/reconcile` and `/maintenance` from merged config JSON.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let reconcile: RawReconcile = section(config_json, "/reconcile")?;
        let maintenance: RawMaintenance = section(config_json, "/maintenance")?;

        let defaults = StalenessConfig::default();
        let staleness = StalenessConfig {
            active_interval: secs_or(
                "reconcile.active_interval_secs",
                reconcile.active_interval_secs,
                defaults.active_interval,
            )?,
            slow_interval: secs_or(
                "reconcile.slow_interval_secs",
                reconcile.slow_interval_secs,
                defaults.slow_interval,
            )?,
            recent_age_threshold: secs_or(
                "reconcile.recent_age_threshold_secs",
                reconcile.recent_age_threshold_secs,
                defaults.recent_age_threshold,
            )?,
        };

        let mut kind_overrides = BTreeMap::new();
        for (kind, raw) in reconcile.kinds {
            let cfg = StalenessConfig {
                active_interval: secs_or(
                    &format!("reconcile.kinds.{kind}.active_interval_secs"),
                    raw.active_interval_secs,
                    staleness.active_interval,
                )?,
                slow_interval: secs_or(
                    &format!("reconcile.kinds.{kind}.slow_interval_secs"),
                    raw.slow_interval_secs,
                    staleness.slow_interval,
                )?,
                recent_age_threshold: secs_or(
                    &format!("reconcile.kinds.{kind}.recent_age_threshold_secs"),
                    raw.recent_age_threshold_secs,
                    staleness.recent_age_threshold,
                )?,
            };
            kind_overrides.insert(EntityKind::new(kind), cfg);
        }

        let base = SchedulerSettings::default();
        Ok(Self {
            staleness,
            kind_overrides,
            fetch_timeout: std_secs_or(
                "reconcile.fetch_timeout_secs",
                reconcile.fetch_timeout_secs,
                base.fetch_timeout,
            )?,
            dispatch_warn_after: std_secs_or(
                "reconcile.dispatch_warn_after_secs",
                reconcile.dispatch_warn_after_secs,
                base.dispatch_warn_after,
            )?,
            loop_period: std_secs_or(
                "reconcile.loop_period_secs",
                reconcile.loop_period_secs,
                base.loop_period,
            )?,
            skip_maintenance: maintenance.skip.unwrap_or(false),
        })
    }

    /// Validated policies for [`recon_scheduler::ReconciliationScheduler::new`].
    pub fn policy_set(&self) -> Result<PolicySet> {
        PolicySet::new(self.staleness, self.kind_overrides.clone())
            .map_err(|e| anyhow::anyhow!("CONFIG_INVALID_POLICY: {e}"))
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            fetch_timeout: self.fetch_timeout,
            dispatch_warn_after: self.dispatch_warn_after,
        }
    }

    /// A switch initialised from `maintenance.skip`.
    pub fn maintenance_switch(&self) -> MaintenanceSwitch {
        MaintenanceSwitch::new(self.skip_maintenance)
    }
}

fn section<T>(config_json: &Value, pointer: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match config_json.pointer(pointer) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone())
            .with_context(|| format!("CONFIG_INVALID_SECTION: {pointer}")),
    }
}

fn positive_secs(field: &str, secs: i64) -> Result<i64> {
    if secs <= 0 {
        bail!("CONFIG_INVALID_DURATION: {field} must be > 0 seconds (got {secs})");
    }
    Ok(secs)
}

fn secs_or(field: &str, raw: Option<i64>, default: Duration) -> Result<Duration> {
    match raw {
        None => Ok(default),
        Some(secs) => {
            let secs = positive_secs(field, secs)?;
            match Duration::try_seconds(secs) {
                Some(d) => Ok(d),
                None => bail!("CONFIG_INVALID_DURATION: {field} out of range (got {secs})"),
            }
        }
    }
}

fn std_secs_or(field: &str, raw: Option<i64>, default: StdDuration) -> Result<StdDuration> {
    match raw {
        None => Ok(default),
        Some(secs) => Ok(StdDuration::from_secs(positive_secs(field, secs)? as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_yields_defaults() {
        let s = SchedulerSettings::from_config_json(&json!({})).unwrap();
        assert_eq!(s, SchedulerSettings::default());
        assert_eq!(s.staleness.active_interval, Duration::minutes(5));
        assert_eq!(s.loop_period, StdDuration::from_secs(60));
    }

    #[test]
    fn unknown_field_inside_kind_is_rejected() {
        let cfg = json!({"reconcile": {"kinds": {"pks": {"active_secs": 10}}}});
        let err = SchedulerSettings::from_config_json(&cfg).unwrap_err();
        assert!(format!("{err:#}").contains("CONFIG_INVALID_SECTION"));
    }
}

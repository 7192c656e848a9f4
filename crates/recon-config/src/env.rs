//! Environment overrides, applied after YAML extraction.

use crate::SchedulerSettings;

/// `1`, `true` or `yes` (any case) suppresses periodic maintenance. Other
/// values leave the configured setting in place.
pub const ENV_SKIP_MAINTENANCE: &str = "RECON_SKIP_MAINTENANCE";

/// Load `.env.local` from the working directory if present.
///
/// Variables already set in the process environment win. A missing file is
/// not an error.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::from_filename(".env.local") {
        tracing::debug!(path = %path.display(), "loaded dotenv file");
    }
}

pub fn apply_env_overrides(settings: &mut SchedulerSettings) {
    apply_env_overrides_with(settings, |k| std::env::var(k).ok());
}

/// [`apply_env_overrides`] with an injectable lookup, for tests.
pub fn apply_env_overrides_with<F>(settings: &mut SchedulerSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let forced = lookup(ENV_SKIP_MAINTENANCE).is_some_and(|raw| parse_flag(&raw));
    if forced && !settings.skip_maintenance {
        tracing::info!(
            var = ENV_SKIP_MAINTENANCE,
            "maintenance skip forced from environment"
        );
    }
    settings.skip_maintenance |= forced;
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn unset_variable_leaves_settings_alone() {
        let mut s = SchedulerSettings {
            skip_maintenance: true,
            ..SchedulerSettings::default()
        };
        apply_env_overrides_with(&mut s, |_| None);
        assert!(s.skip_maintenance);
    }

    #[test]
    fn truthy_value_forces_skip_falsy_does_not_clear_it() {
        let mut s = SchedulerSettings::default();
        apply_env_overrides_with(&mut s, |k| {
            (k == ENV_SKIP_MAINTENANCE).then(|| "yes".to_string())
        });
        assert!(s.skip_maintenance);

        apply_env_overrides_with(&mut s, |_| Some("false".to_string()));
        assert!(s.skip_maintenance);

        let mut fresh = SchedulerSettings::default();
        apply_env_overrides_with(&mut fresh, |_| Some("0".to_string()));
        assert!(!fresh.skip_maintenance);
    }
}

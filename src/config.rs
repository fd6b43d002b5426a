use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;

use crate::clock::DEFAULT_TIMEZONE;
use crate::engine::{CheckInPolicy, EngineSettings};
use crate::scheduler::ReminderSettings;

#[derive(Debug, thiserror::Error)]
#[error("{var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Service configuration, read from `ROOMBOOK_*` environment variables.
///
/// | Env Var                            | Default       |
/// |------------------------------------|---------------|
/// | `ROOMBOOK_DATA_DIR`                | `./data`      |
/// | `ROOMBOOK_METRICS_PORT`            | unset         |
/// | `ROOMBOOK_TIMEZONE`                | `Asia/Seoul`  |
/// | `ROOMBOOK_LOCK_TIMEOUT_MS`         | `5000`        |
/// | `ROOMBOOK_REMINDER_INTERVAL_SECS`  | `60`          |
/// | `ROOMBOOK_REMINDER_LEAD_MINUTES`   | `10`          |
/// | `ROOMBOOK_REMINDER_GRACE_MINUTES`  | `15`          |
/// | `ROOMBOOK_CHECKIN_LEAD_MINUTES`    | `15`          |
/// | `ROOMBOOK_GEOFENCE_RADIUS_M`       | `50`          |
/// | `ROOMBOOK_COMPACT_THRESHOLD`       | `1000`        |
/// | `ROOMBOOK_SEED_FILE`               | unset         |
/// | `ROOMBOOK_MAIL_BRAND`              | `Roombook`    |
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub timezone: Tz,
    pub lock_timeout: Duration,
    pub reminder: ReminderSettings,
    pub check_in: CheckInPolicy,
    pub compact_threshold: u64,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset and empty variables take the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let data_dir = get("ROOMBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into();
        let metrics_port = parse_opt(&get, "ROOMBOOK_METRICS_PORT")?;
        let timezone = parse_or(&get, "ROOMBOOK_TIMEZONE", DEFAULT_TIMEZONE)?;

        let lock_timeout_ms: u64 = parse_or(&get, "ROOMBOOK_LOCK_TIMEOUT_MS", 5_000)?;
        if lock_timeout_ms == 0 {
            return Err(invalid("ROOMBOOK_LOCK_TIMEOUT_MS", "0", "must be positive"));
        }

        let interval_secs: u64 = parse_or(&get, "ROOMBOOK_REMINDER_INTERVAL_SECS", 60)?;
        if interval_secs == 0 {
            return Err(invalid("ROOMBOOK_REMINDER_INTERVAL_SECS", "0", "must be positive"));
        }
        let lead_min: u32 = parse_or(&get, "ROOMBOOK_REMINDER_LEAD_MINUTES", 10)?;
        let grace_min: u32 = parse_or(&get, "ROOMBOOK_REMINDER_GRACE_MINUTES", 15)?;
        let brand = get("ROOMBOOK_MAIL_BRAND").unwrap_or_else(|| "Roombook".into());

        let check_in_lead: u32 = parse_or(&get, "ROOMBOOK_CHECKIN_LEAD_MINUTES", 15)?;
        let radius_m: f64 = parse_or(&get, "ROOMBOOK_GEOFENCE_RADIUS_M", 50.0)?;
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(invalid("ROOMBOOK_GEOFENCE_RADIUS_M", &radius_m.to_string(), "must be positive"));
        }

        Ok(Self {
            data_dir,
            metrics_port,
            timezone,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            reminder: ReminderSettings {
                interval: Duration::from_secs(interval_secs),
                lead: TimeDelta::minutes(lead_min.into()),
                grace: TimeDelta::minutes(grace_min.into()),
                brand,
            },
            check_in: CheckInPolicy {
                lead: TimeDelta::minutes(check_in_lead.into()),
                radius_m,
            },
            compact_threshold: parse_or(&get, "ROOMBOOK_COMPACT_THRESHOLD", 1000)?,
            seed_file: get("ROOMBOOK_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_timeout: self.lock_timeout,
            check_in: self.check_in,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| invalid(var, &raw, e)),
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_opt(get, var)?.unwrap_or(default))
}

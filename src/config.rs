use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::coordinator::CoordinatorSettings;

/// Process configuration, read from `SALONSLOT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub schedule_file: Option<PathBuf>,
    pub compact_threshold: u64,
    pub request_timeout: Duration,
    pub heal_past_days: u32,
    pub heal_future_days: u32,
    pub notify_recipient: String,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            timezone: chrono_tz::Asia::Tokyo,
            schedule_file: None,
            compact_threshold: 1000,
            request_timeout: Duration::from_millis(5000),
            heal_past_days: 30,
            heal_future_days: 90,
            notify_recipient: "owner".into(),
            metrics_port: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("invalid {key}={raw:?}: {e}"))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("SALONSLOT_BIND") {
            config.bind = v;
        }
        if let Some(v) = var("SALONSLOT_PORT") {
            config.port = parse("SALONSLOT_PORT", &v)?;
        }
        if let Some(v) = var("SALONSLOT_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SALONSLOT_TIMEZONE") {
            config.timezone = parse("SALONSLOT_TIMEZONE", &v)?;
        }
        config.schedule_file = var("SALONSLOT_SCHEDULE_FILE").map(PathBuf::from);
        if let Some(v) = var("SALONSLOT_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("SALONSLOT_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = var("SALONSLOT_REQUEST_TIMEOUT_MS") {
            let ms: u64 = parse("SALONSLOT_REQUEST_TIMEOUT_MS", &v)?;
            if ms == 0 {
                return Err("SALONSLOT_REQUEST_TIMEOUT_MS must be positive".into());
            }
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = var("SALONSLOT_HEAL_PAST_DAYS") {
            config.heal_past_days = parse("SALONSLOT_HEAL_PAST_DAYS", &v)?;
        }
        if let Some(v) = var("SALONSLOT_HEAL_FUTURE_DAYS") {
            config.heal_future_days = parse("SALONSLOT_HEAL_FUTURE_DAYS", &v)?;
        }
        let window = i64::from(config.heal_past_days) + i64::from(config.heal_future_days);
        if window > crate::limits::MAX_HEAL_WINDOW_DAYS {
            return Err(format!(
                "heal window of {window} days exceeds {}",
                crate::limits::MAX_HEAL_WINDOW_DAYS
            ));
        }
        if let Some(v) = var("SALONSLOT_NOTIFY_RECIPIENT") {
            config.notify_recipient = v;
        }
        if let Some(v) = var("SALONSLOT_METRICS_PORT") {
            config.metrics_port = Some(parse("SALONSLOT_METRICS_PORT", &v)?);
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            timezone: self.timezone,
            request_timeout: self.request_timeout,
            heal_past_days: self.heal_past_days,
            heal_future_days: self.heal_future_days,
            default_recipient: self.notify_recipient.clone(),
        }
    }
}

use crate::errors::ConfigError;
use chrono_tz::Tz;
use std::{env, path::PathBuf, time::Duration};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_PATH: &str = "data/state.json";
const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;
const DEFAULT_ROLLOVER_SECS: u64 = 60;
const DEFAULT_LOG_FILTER: &str = "info";

/// Log filter from `RUST_LOG`-style directives, `info` when unset or unparsable.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_path: PathBuf,
    pub timezone: Tz,
    pub rollover_interval: Duration,
    pub purge_on_rollover: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            timezone: DEFAULT_TIMEZONE,
            rollover_interval: Duration::from_secs(DEFAULT_ROLLOVER_SECS),
            purge_on_rollover: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = lookup("PORT") {
            config.port = value.trim().parse().map_err(|err| invalid("PORT", &value, err))?;
        }
        if let Some(path) = lookup("APP_DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("APP_TIMEZONE") {
            config.timezone = value
                .trim()
                .parse()
                .map_err(|err| invalid("APP_TIMEZONE", &value, err))?;
        }
        if let Some(value) = lookup("ROLLOVER_INTERVAL_SECS") {
            let secs: u64 = value
                .trim()
                .parse()
                .map_err(|err| invalid("ROLLOVER_INTERVAL_SECS", &value, err))?;
            if secs == 0 {
                return Err(invalid("ROLLOVER_INTERVAL_SECS", &value, "must be at least 1"));
            }
            config.rollover_interval = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("ROLLOVER_PURGE") {
            config.purge_on_rollover = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid("ROLLOVER_PURGE", &value, "expected true or false")),
            };
        }

        Ok(config)
    }
}

fn invalid(name: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidVar {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

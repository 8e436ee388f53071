use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{Ms, MINUTE_MS};
use crate::resolver::BusinessHours;

/// Runtime settings, read from `ROOMLOCK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Appends after which the sweeper compacts the WAL.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    /// Optional JSON file listing rooms and identities to load at startup.
    pub seed_file: Option<PathBuf>,
    pub service: ServiceConfig,
}

/// Knobs consumed by the booking service itself.
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    /// Bound on waiting for a room/user ledger during a write.
    pub store_timeout: Duration,
    /// Extra attempts after a transient store failure.
    pub max_retries: u32,
    /// First backoff step; doubles per attempt.
    pub retry_backoff: Duration,
    pub business_hours: BusinessHours,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(2_000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
            business_hours: BusinessHours::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(30),
            seed_file: None,
            service: ServiceConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={raw}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let svc = defaults.service;

        let utc_offset_ms = env_parse::<Ms>("ROOMLOCK_UTC_OFFSET_MINUTES")
            .map(|m| m * MINUTE_MS)
            .unwrap_or(svc.business_hours.utc_offset_ms);
        let business_hours = BusinessHours {
            open_hour: env_parse("ROOMLOCK_OPEN_HOUR").unwrap_or(svc.business_hours.open_hour),
            close_hour: env_parse("ROOMLOCK_CLOSE_HOUR").unwrap_or(svc.business_hours.close_hour),
            utc_offset_ms,
        };

        Self {
            data_dir: std::env::var("ROOMLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: env_parse("ROOMLOCK_METRICS_PORT"),
            compact_threshold: env_parse("ROOMLOCK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            sweep_interval: env_parse("ROOMLOCK_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            seed_file: std::env::var("ROOMLOCK_SEED_FILE").ok().map(PathBuf::from),
            service: ServiceConfig {
                store_timeout: env_parse("ROOMLOCK_STORE_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(svc.store_timeout),
                max_retries: env_parse("ROOMLOCK_MAX_RETRIES").unwrap_or(svc.max_retries),
                retry_backoff: env_parse("ROOMLOCK_RETRY_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(svc.retry_backoff),
                business_hours,
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

//! Environment-driven settings for the queue worker and maintenance loops.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ENRICH_MAX_RETRIES` | 3 |
//! | `ENRICH_LEASE_SECS` | 300 |
//! | `ENRICH_POLL_INTERVAL_MS` | 500 |
//! | `ENRICH_BATCH_SIZE` | 10 |
//! | `ENRICH_WORKER_NODE` | `worker-<uuid>` |
//! | `ENRICH_WORKER_STRATEGY` | unset (any) |
//! | `ENRICH_RETRY_BASE_MS` | 1000 |
//! | `ENRICH_RETRY_MAX_MS` | 60000 |
//! | `ENRICH_SWEEP_INTERVAL_SECS` | 60 |
//! | `ENRICH_COMPLETED_RETENTION_HOURS` | 24 |
//! | `ENRICH_FAILED_RETENTION_HOURS` | 168 |
//! | `DATABASE_URL` | unset |

use std::str::FromStr;
use std::time::Duration;

use enrich_core::{DEFAULT_MAX_RETRIES, Strategy, StrategyCatalog};

use crate::queue::BackoffPolicy;
use crate::workers::{MaintenanceConfig, WorkerConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
    /// Only `ASYNC` and `BATCH` name a worker pool.
    #[error("{0} does not name a worker pool")]
    UnsupportedStrategy(Strategy),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSettings {
    pub max_retries: u32,
    pub lease: Duration,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub worker_node: String,
    pub worker_strategy: Option<Strategy>,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub sweep_interval: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
    pub database_url: Option<String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            lease: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            batch_size: 10,
            worker_node: format!("worker-{}", uuid::Uuid::now_v7()),
            worker_strategy: None,
            retry_base: Duration::from_millis(1000),
            retry_max: Duration::from_millis(60_000),
            sweep_interval: Duration::from_secs(60),
            completed_retention: hours(24),
            failed_retention: hours(168),
            database_url: None,
        }
    }
}

impl EnrichmentSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; unset or blank keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let worker_strategy = match get("ENRICH_WORKER_STRATEGY") {
            None => None,
            Some(raw) => {
                let strategy = Strategy::from_str(&raw).map_err(|_| SettingsError::Invalid {
                    key: "ENRICH_WORKER_STRATEGY",
                    value: raw.clone(),
                })?;
                match strategy {
                    Strategy::Async | Strategy::Batch => Some(strategy),
                    other => return Err(SettingsError::UnsupportedStrategy(other)),
                }
            }
        };

        Ok(Self {
            max_retries: parse(&get, "ENRICH_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            lease: parse_duration(&get, "ENRICH_LEASE_SECS", secs)?.unwrap_or(defaults.lease),
            poll_interval: parse_duration(&get, "ENRICH_POLL_INTERVAL_MS", millis)?.unwrap_or(defaults.poll_interval),
            batch_size: parse(&get, "ENRICH_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            worker_node: get("ENRICH_WORKER_NODE").unwrap_or(defaults.worker_node),
            worker_strategy,
            retry_base: parse_duration(&get, "ENRICH_RETRY_BASE_MS", millis)?.unwrap_or(defaults.retry_base),
            retry_max: parse_duration(&get, "ENRICH_RETRY_MAX_MS", millis)?.unwrap_or(defaults.retry_max),
            sweep_interval: parse_duration(&get, "ENRICH_SWEEP_INTERVAL_SECS", secs)?
                .unwrap_or(defaults.sweep_interval),
            completed_retention: parse_duration(&get, "ENRICH_COMPLETED_RETENTION_HOURS", checked_hours)?
                .unwrap_or(defaults.completed_retention),
            failed_retention: parse_duration(&get, "ENRICH_FAILED_RETENTION_HOURS", checked_hours)?
                .unwrap_or(defaults.failed_retention),
            database_url: get("DATABASE_URL"),
        })
    }

    /// Apply the configured catalog-wide retry budget.
    pub fn apply_retry_budget(&self, catalog: StrategyCatalog) -> StrategyCatalog {
        catalog.with_max_retries(self.max_retries)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let config = WorkerConfig::default()
            .with_node(self.worker_node.clone())
            .with_poll_interval(self.poll_interval)
            .with_batch_size(self.batch_size)
            .with_lease(self.lease)
            .with_backoff(BackoffPolicy::exponential(self.retry_base, self.retry_max));
        match self.worker_strategy {
            Some(strategy) => config.with_strategy(strategy),
            None => config,
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            interval: self.sweep_interval,
            completed_retention: self.completed_retention,
            failed_retention: self.failed_retention,
        }
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h * 60 * 60)
}

fn secs(s: u64) -> Option<Duration> {
    Some(Duration::from_secs(s))
}

fn millis(ms: u64) -> Option<Duration> {
    Some(Duration::from_millis(ms))
}

fn checked_hours(h: u64) -> Option<Duration> {
    h.checked_mul(60 * 60).map(Duration::from_secs)
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, SettingsError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| raw.parse::<T>().map_err(|_| SettingsError::Invalid { key, value: raw }))
        .transpose()
}

/// Durations must fit chrono's range so timestamps derived from them stay
/// exact.
fn parse_duration<G>(
    get: &G,
    key: &'static str,
    unit: fn(u64) -> Option<Duration>,
) -> Result<Option<Duration>, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<u64>()
                .ok()
                .and_then(unit)
                .filter(|d| chrono::Duration::from_std(*d).is_ok())
                .ok_or(SettingsError::Invalid { key, value: raw })
        })
        .transpose()
}

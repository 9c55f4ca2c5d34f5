//! Engine configuration.
//!
//! Every setting has a default and can be overridden through the
//! environment. Malformed values are logged and replaced by the default.

use std::str::FromStr;
use std::time::Duration;

use crate::workers::WorkerConfig;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_CACHE_NAMESPACE: &str = "products";
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time-to-live applied to every cache write.
    pub cache_ttl: Duration,
    /// Key prefix for cache entries.
    pub cache_namespace: String,
    pub reload_interval: Duration,
    pub reload_on_start: bool,
    /// Budget for a single store call, transactions included.
    pub store_timeout: Duration,
    pub workers: WorkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            reload_interval: Duration::from_secs(crate::scheduler::DEFAULT_RELOAD_INTERVAL_SECS),
            reload_on_start: true,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            workers: WorkerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup` (key → raw value).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            cache_ttl: Duration::from_secs(parse_or(&lookup, "CACHE_TTL_SECS", d.cache_ttl.as_secs())),
            cache_namespace: lookup("CACHE_NAMESPACE")
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or(d.cache_namespace),
            reload_interval: Duration::from_secs(parse_or(
                &lookup,
                "RELOAD_INTERVAL_SECS",
                d.reload_interval.as_secs(),
            )),
            reload_on_start: parse_or(&lookup, "RELOAD_ON_START", d.reload_on_start),
            store_timeout: Duration::from_millis(parse_or(
                &lookup,
                "STORE_TIMEOUT_MS",
                d.store_timeout.as_millis() as u64,
            )),
            workers: WorkerConfig {
                write_back_queue_capacity: parse_or(
                    &lookup,
                    "WRITE_BACK_QUEUE_CAPACITY",
                    d.workers.write_back_queue_capacity,
                ),
                write_back_workers: parse_or(&lookup, "WRITE_BACK_WORKERS", d.workers.write_back_workers),
                repair_queue_capacity: parse_or(
                    &lookup,
                    "REPAIR_QUEUE_CAPACITY",
                    d.workers.repair_queue_capacity,
                ),
            },
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, ?default, "invalid config value; using default");
            default
        }),
    }
}

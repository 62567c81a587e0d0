use std::time::Duration;

use serde::Deserialize;

use crate::store::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub server_port: u16,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_max_tx_attempts")]
    pub max_tx_attempts: u32,
    #[serde(default = "default_tx_backoff_ms")]
    pub tx_backoff_ms: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
}

fn default_port() -> u16 {
    8000
}

fn default_max_connections() -> u32 {
    8
}

fn default_max_tx_attempts() -> u32 {
    5
}

fn default_tx_backoff_ms() -> u64 {
    10
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_stale_after_hours() -> i64 {
    24
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_tx_attempts,
            backoff: Duration::from_millis(self.tx_backoff_ms),
        }
    }

    /// Never zero; a zero interval would stop the reconciler.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_after_hours)
    }
}

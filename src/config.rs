//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{KeyedWindowStore, RateLimitRules, RateLimiter};

/// Main configuration for a Floodgate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Limit rules: default quota, window, per-key overrides
    pub rules: RateLimitRules,

    /// Per-key store tuning
    #[serde(default)]
    pub store: StoreConfig,
}

/// Tuning for the keyed window store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seconds of no access after which a key's state is evicted
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Interval between background eviction sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Shard amount for the key table. Must be a power of two, at least 2.
    /// The minimum approximates a single global lock for single-consumer
    /// deployments; unset uses the default sized from available parallelism.
    #[serde(default)]
    pub shard_amount: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            shard_amount: None,
        }
    }
}

fn default_idle_ttl_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| FloodgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate rules and store tuning.
    pub fn validate(&self) -> Result<()> {
        self.rules.validate()?;
        if let Some(shards) = self.store.shard_amount {
            if shards < 2 || !shards.is_power_of_two() {
                return Err(FloodgateError::Config(format!(
                    "shard_amount must be a power of two >= 2, got {}",
                    shards
                )));
            }
        }
        Ok(())
    }

    /// Build a limiter from this configuration.
    pub fn build_limiter(&self) -> Result<RateLimiter> {
        self.validate()?;
        let store = KeyedWindowStore::with_settings(
            Duration::from_secs(self.store.idle_ttl_secs),
            self.store.shard_amount,
        );
        RateLimiter::from_rules_with_store(self.rules.clone(), store)
    }

    /// Interval between background eviction sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store.sweep_interval_secs)
    }
}

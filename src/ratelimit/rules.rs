//! Rate limit rules configuration.
//!
//! This module handles loading and validating the limit rules applied by the
//! limiter: a default quota plus optional per-key overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Rate limit rules: the default quota and any per-key overrides.
///
/// Rules are immutable once handed to a limiter. All quotas are requests per
/// window; the window length is shared by every key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Maximum admitted requests per window when no override matches
    pub default_rate: i64,
    /// Window length, in the same unit as caller-supplied timestamps (seconds)
    pub window_secs: i64,
    /// Per-key quota overrides
    #[serde(default)]
    pub overrides: HashMap<String, i64>,
}

impl RateLimitRules {
    /// Create rules with no overrides.
    pub fn new(default_rate: i64, window_secs: i64) -> Self {
        Self {
            default_rate,
            window_secs,
            overrides: HashMap::new(),
        }
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Validate the rules.
    ///
    /// A non-positive rate, window, or override value is rejected here, at
    /// construction time, rather than silently falling back to the default.
    pub fn validate(&self) -> Result<()> {
        if self.default_rate <= 0 {
            return Err(FloodgateError::InvalidArgument(format!(
                "default_rate must be positive, got {}",
                self.default_rate
            )));
        }
        if self.window_secs <= 0 {
            return Err(FloodgateError::InvalidArgument(format!(
                "window_secs must be positive, got {}",
                self.window_secs
            )));
        }
        for (key, rate) in &self.overrides {
            if *rate <= 0 {
                return Err(FloodgateError::InvalidArgument(format!(
                    "override for key '{}' must be positive, got {}",
                    key, rate
                )));
            }
        }
        Ok(())
    }

    /// The quota applied to `key`: its override if configured, otherwise the
    /// default.
    pub fn effective_rate(&self, key: &str) -> i64 {
        self.overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_rate)
    }
}

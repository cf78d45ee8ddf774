//! Engine configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to its default.

use crate::error::{EngineError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Minutes after `end_time` during which each party may still report attendance.
const fn default_grace_period_minutes() -> i64 {
    30
}

/// Seconds between two deadline sweeps.
const fn default_sweep_interval_secs() -> u64 {
    60
}

/// How many times a lost compare-and-swap is re-read and re-validated.
const fn default_cas_retry_limit() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_grace_period_minutes")]
    pub grace_period_minutes: i64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// 0 fails fast on the first conflict.
    #[serde(default = "default_cas_retry_limit")]
    pub cas_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period_minutes: default_grace_period_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            cas_retry_limit: default_cas_retry_limit(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid JSON, or holds invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grace_period_minutes < 0 {
            return Err(EngineError::ValidationError(
                "grace_period_minutes must not be negative".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(EngineError::ValidationError(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::minutes(self.grace_period_minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

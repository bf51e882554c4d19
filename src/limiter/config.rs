//! Limiter rate parameters and persisted definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RatekeeperError, Result};

/// The mutable rate parameters of a single limiter.
///
/// A limiter issues `count` tokens every `interval_millis` milliseconds, one
/// token per `interval_millis / count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterConfig {
    /// Human-readable identifier, used as the key for HTTP lookups
    pub name: String,
    /// Window in milliseconds over which `count` tokens are issued
    #[serde(alias = "interval")]
    pub interval_millis: i64,
    /// Number of tokens issued per window
    pub count: i64,
    /// Tolerance carried through configuration; stored and returned, never consumed
    #[serde(default)]
    pub precision: f64,
}

impl LimiterConfig {
    /// Create a validated configuration.
    pub fn new(name: impl Into<String>, interval_millis: i64, count: i64, precision: f64) -> Result<Self> {
        let config = Self {
            name: name.into(),
            interval_millis,
            count,
            precision,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the rate invariants.
    ///
    /// The name must be non-empty, both `interval_millis` and `count` must be
    /// positive, and the derived emission period must not round down to zero.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RatekeeperError::InvalidConfig("name is required".to_string()));
        }
        if self.interval_millis <= 0 {
            return Err(RatekeeperError::InvalidConfig(format!(
                "interval must be positive, got {} for limiter '{}'",
                self.interval_millis, self.name
            )));
        }
        if self.count <= 0 {
            return Err(RatekeeperError::InvalidConfig(format!(
                "count must be positive, got {} for limiter '{}'",
                self.count, self.name
            )));
        }
        if self.period_nanos() == 0 {
            return Err(RatekeeperError::InvalidConfig(format!(
                "{} tokens per {}ms is too fine-grained for limiter '{}'",
                self.count, self.interval_millis, self.name
            )));
        }
        Ok(())
    }

    /// The emission period, `interval_millis / count`.
    ///
    /// Only meaningful for a validated configuration.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos())
    }

    fn period_nanos(&self) -> u64 {
        if self.interval_millis <= 0 || self.count <= 0 {
            return 0;
        }
        let interval_nanos = (self.interval_millis as u128) * 1_000_000;
        (interval_nanos / self.count as u128).min(u64::MAX as u128) as u64
    }
}

/// A limiter definition as held by the definition store.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterDefinition {
    /// Stable key used by reconciliation
    pub limiter_id: String,
    /// Rate parameters, including the display name
    pub config: LimiterConfig,
    /// Store-assigned modification stamp
    pub updated_at: i64,
}

impl LimiterDefinition {
    pub fn new(limiter_id: impl Into<String>, config: LimiterConfig, updated_at: i64) -> Self {
        Self {
            limiter_id: limiter_id.into(),
            config,
            updated_at,
        }
    }
}

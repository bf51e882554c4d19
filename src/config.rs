//! Configuration management for Ratekeeper.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `RATEKEEPER__`-prefixed environment variables (e.g.
//! `RATEKEEPER__SERVER__LISTEN_ADDR`). Everything is read once at startup.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{RatekeeperError, Result};

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconciliation configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Definition store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// How long an acquire request waits for a token, in milliseconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_acquire_timeout() -> u64 {
    1000
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Whether stored definitions are reconciled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between reconciliation passes
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// Stop limiters whose stored definition disappeared
    #[serde(default = "default_true")]
    pub prune_missing: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            prune_missing: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    5
}

/// Definition store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://limits.db?mode=rwc".to_string()
}

impl ServiceConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("RATEKEEPER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ServiceConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.reconciler.enabled && self.reconciler.interval_secs == 0 {
            return Err(RatekeeperError::Config(
                "reconciler.interval_secs must be positive".to_string(),
            ));
        }
        if self.store.database_url.is_empty() {
            return Err(RatekeeperError::Config(
                "store.database_url is required".to_string(),
            ));
        }
        Ok(())
    }
}

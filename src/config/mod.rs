//! Configuration management
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `CALLSCRIBE__SECTION__KEY` environment overrides.

use crate::infrastructure::persistence::store::mask_password;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the optional config file
pub const CONFIG_PATH_ENV: &str = "CALLSCRIBE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "callscribe.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub distributor: DistributorConfig,
    pub finalizer: FinalizerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long a subscription waits for its call to appear
    pub subscribe_timeout_ms: u64,
    /// How long a closed call keeps absorbing trailing events
    pub closed_grace_period_ms: u64,
    pub sweep_interval_ms: u64,
    /// Finished calls remembered after eviction so redelivered events
    /// cannot reopen them
    pub finished_call_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Segments retained per call for reconnect replay
    pub replay_window: usize,
    /// Pending deliveries allowed per subscriber before it is disconnected
    pub subscriber_queue_bound: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizerConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_summary_chars: usize,
    pub max_key_findings: usize,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Connection target, e.g. `memory://local`
    pub connection: String,
    pub call_table: String,
    pub summary_table: String,
    pub location_table: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig {
                subscribe_timeout_ms: 5_000,
                closed_grace_period_ms: 30_000,
                sweep_interval_ms: 1_000,
                finished_call_capacity: 10_000,
            },
            distributor: DistributorConfig {
                replay_window: 64,
                subscriber_queue_bound: 256,
            },
            finalizer: FinalizerConfig {
                max_attempts: 4,
                base_delay_ms: 250,
                max_delay_ms: 5_000,
                max_summary_chars: 600,
                max_key_findings: 5,
            },
            storage: StorageConfig {
                connection: "memory://local".to_string(),
                call_table: "calls".to_string(),
                summary_table: "summaries".to_string(),
                location_table: "locations".to_string(),
                retry: RetryConfig {
                    max_attempts: 5,
                    base_delay_ms: 100,
                    max_delay_ms: 2_000,
                },
            },
        }
    }
}

impl Config {
    /// Load configuration from defaults, the file at `path` (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix("CALLSCRIBE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load using `CALLSCRIBE_CONFIG` or the default file name
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Some(Path::new(&path)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Message(msg.to_string()));

        if self.distributor.subscriber_queue_bound == 0 {
            return fail("distributor.subscriber_queue_bound must be positive");
        }
        if self.distributor.replay_window > self.distributor.subscriber_queue_bound {
            return fail("distributor.replay_window must not exceed subscriber_queue_bound");
        }
        if self.finalizer.max_attempts == 0 {
            return fail("finalizer.max_attempts must be positive");
        }
        if self.storage.retry.max_attempts == 0 {
            return fail("storage.retry.max_attempts must be positive");
        }
        if self.registry.sweep_interval_ms == 0 {
            return fail("registry.sweep_interval_ms must be positive");
        }
        if self.registry.finished_call_capacity == 0 {
            return fail("registry.finished_call_capacity must be positive");
        }
        Ok(())
    }
}

// Connection targets may carry credentials
impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("connection", &mask_password(&self.connection))
            .field("call_table", &self.call_table)
            .field("summary_table", &self.summary_table)
            .field("location_table", &self.location_table)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RegistryConfig {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn closed_grace_period(&self) -> Duration {
        Duration::from_millis(self.closed_grace_period_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

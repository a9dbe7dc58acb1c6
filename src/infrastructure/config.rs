//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::image::ContainerRuntime;
use crate::executor::DEFAULT_IMAGE_SECRET_ENV;
use crate::pipeline::{ConfigError, DEFAULT_NUM_RETRIES, DEFAULT_TIMEOUT_SECS};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long `run` waits for the first attempt before returning
    pub settle_window_secs: u64,
    /// Attempts used when a step does not set `num_retries`
    pub default_num_retries: u32,
    /// Timeout used when a step does not set `timeout_secs`
    pub default_timeout_secs: u64,
    /// Kill attempts that outlive their timeout
    pub enforce_timeout: bool,
    /// Environment variable holding the image pull secret
    pub image_secret_env: String,
    /// RSS sampling period when metrics logging is on
    pub metrics_sample_interval_ms: u64,
    /// Container runtime used for image lookups
    pub container_runtime: ContainerRuntime,
    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_window_secs: 5,
            default_num_retries: DEFAULT_NUM_RETRIES,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            enforce_timeout: false,
            image_secret_env: DEFAULT_IMAGE_SECRET_ENV.to_string(),
            metrics_sample_interval_ms: 1000,
            container_runtime: ContainerRuntime::Docker,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads and validates a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parses and validates YAML config text; missing fields take defaults
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the executor cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settle_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "settle_window_secs",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.metrics_sample_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "metrics_sample_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.image_secret_env.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "image_secret_env",
                reason: "must name an environment variable".to_string(),
            });
        }
        Ok(())
    }

    /// Settle window as a duration
    #[must_use]
    pub fn settle_window(&self) -> Duration {
        Duration::from_secs(self.settle_window_secs)
    }

    /// RSS sampling period as a duration
    #[must_use]
    pub fn metrics_sample_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_sample_interval_ms)
    }
}

//! Configuration management for the image request queue

use crate::error::{AioError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration for an image request queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Name used in log messages (default: "image-io-queue")
    #[serde(default = "default_name")]
    pub name: String,

    /// Number of worker threads executing dispatched requests (default: 4)
    /// Valid range: 1 to 1024
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Name given to worker threads (default: "image-io-wq")
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Whether reads initially require the exclusive lock (default: false)
    #[serde(default)]
    pub require_lock_on_read: bool,

    /// Whether writes initially require the exclusive lock (default: false)
    #[serde(default)]
    pub require_lock_on_write: bool,

    /// Whether a request needing the lock may trigger its acquisition (default: true)
    /// When disabled such requests fail with `LockRequired`
    #[serde(default = "default_true")]
    pub auto_request_lock: bool,

    /// Number of automatic refresh retries before a stale request fails (default: 1)
    #[serde(default = "default_max_refresh_retries")]
    pub max_refresh_retries: u32,
}

// Default value functions for serde
fn default_name() -> String {
    "image-io-queue".to_string()
}

fn default_worker_threads() -> usize {
    4
}

fn default_thread_name() -> String {
    "image-io-wq".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_refresh_retries() -> u32 {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            name: default_name(),
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
            require_lock_on_read: false,
            require_lock_on_write: false,
            auto_request_lock: default_true(),
            max_refresh_retries: default_max_refresh_retries(),
        }
    }
}

impl QueueConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(QueueConfig)` if loading and validation succeed
    /// * `Err(AioError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            AioError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: QueueConfig = serde_yaml::from_str(&content).map_err(|e| {
            AioError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - name and thread_name must not be empty
    /// - worker_threads must be between 1 and 1024
    /// - max_refresh_retries must be at most 16
    pub fn validate(&self) -> Result<()> {
        const MAX_WORKER_THREADS: usize = 1024;
        const MAX_REFRESH_RETRIES: u32 = 16;

        if self.name.is_empty() {
            return Err(AioError::ConfigError("name must not be empty".to_string()));
        }

        if self.thread_name.is_empty() {
            return Err(AioError::ConfigError(
                "thread_name must not be empty".to_string(),
            ));
        }

        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(AioError::ConfigError(format!(
                "worker_threads must be between 1 and {}, got {}",
                MAX_WORKER_THREADS, self.worker_threads
            )));
        }

        if self.max_refresh_retries > MAX_REFRESH_RETRIES {
            return Err(AioError::ConfigError(format!(
                "max_refresh_retries must be at most {}, got {}",
                MAX_REFRESH_RETRIES, self.max_refresh_retries
            )));
        }

        Ok(())
    }

    /// Create a new QueueConfig with custom values
    pub fn new(worker_threads: usize, max_refresh_retries: u32) -> Result<Self> {
        let config = QueueConfig {
            worker_threads,
            max_refresh_retries,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.name, "image-io-queue");
        assert_eq!(config.worker_threads, 4);
        assert!(!config.require_lock_on_read);
        assert!(!config.require_lock_on_write);
        assert!(config.auto_request_lock);
        assert_eq!(config.max_refresh_retries, 1);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = QueueConfig::default();
        config.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_too_many_workers() {
        let mut config = QueueConfig::default();
        config.worker_threads = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_names() {
        let mut config = QueueConfig::default();
        config.name = String::new();
        assert!(config.validate().is_err());

        let mut config = QueueConfig::default();
        config.thread_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_refresh_retries() {
        let mut config = QueueConfig::default();
        config.max_refresh_retries = 0;
        assert!(config.validate().is_ok());

        config.max_refresh_retries = 17;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_config() {
        let config = QueueConfig::new(8, 3).unwrap();
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.max_refresh_retries, 3);
    }

    #[test]
    fn test_new_config_invalid() {
        assert!(QueueConfig::new(0, 1).is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: QueueConfig = serde_yaml::from_str("require_lock_on_write: true\n").unwrap();
        assert!(config.require_lock_on_write);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.thread_name, "image-io-wq");
    }
}

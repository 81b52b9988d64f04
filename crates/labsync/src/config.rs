//! Configuration for the offline queue, edit locks and merge defaults.
//!
//! All durations are stored as milliseconds so the JSON file stays readable.
//! Missing fields fall back to their defaults, so a partial file such as
//! `{"locks": {"lockDurationMs": 10000}}` is valid.

use crate::merge::MergeStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default slot name holding the serialized queue
pub const DEFAULT_QUEUE_KEY: &str = "offlineQueue";

/// Default number of failed replays before an entry is dropped
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Upper bound for `lockDurationMs` and `sweepIntervalMs` (24 h)
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Offline queue settings
    pub queue: QueueConfig,
    /// Edit lock settings
    pub locks: LockConfig,
    /// Merge settings
    pub merge: MergeConfig,
}

impl SyncConfig {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.storage_key.is_empty() {
            return Err(ConfigError::Invalid("queue.storageKey must not be empty".into()));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid("queue.maxAttempts must be at least 1".into()));
        }
        if self.locks.lock_duration_ms == 0 {
            return Err(ConfigError::Invalid("locks.lockDurationMs must be positive".into()));
        }
        if self.locks.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("locks.sweepIntervalMs must be positive".into()));
        }
        if self.locks.lock_duration_ms > MAX_DURATION_MS {
            return Err(ConfigError::Invalid(format!(
                "locks.lockDurationMs must be at most {}",
                MAX_DURATION_MS
            )));
        }
        if self.locks.sweep_interval_ms > MAX_DURATION_MS {
            return Err(ConfigError::Invalid(format!(
                "locks.sweepIntervalMs must be at most {}",
                MAX_DURATION_MS
            )));
        }
        Ok(())
    }
}

/// Offline queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Storage slot holding the serialized queue
    pub storage_key: String,
    /// Failed replays after which an entry is dropped
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_QUEUE_KEY.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl QueueConfig {
    /// Use a different storage slot
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Use a different attempt ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Edit lock settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct LockConfig {
    /// Lifetime of a lock after acquisition or renewal (default: 30 s)
    pub lock_duration_ms: u64,
    /// Period of the expired-lock sweep (default: 60 s)
    pub sweep_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: 30_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl LockConfig {
    /// Lock lifetime
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    /// Sweep period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Use a different lock lifetime
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Use a different sweep period
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Merge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeConfig {
    /// Edits closer together than this are considered concurrent (default: 1 s)
    pub timestamp_threshold_ms: u64,
    /// Strategy used when the caller does not pick one
    pub default_strategy: MergeStrategy,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            timestamp_threshold_ms: 1_000,
            default_strategy: MergeStrategy::MergeFields,
        }
    }
}

impl MergeConfig {
    /// Concurrency threshold for timestamp conflict detection
    pub fn timestamp_threshold(&self) -> Duration {
        Duration::from_millis(self.timestamp_threshold_ms)
    }
}

/// Loads, saves and updates a `SyncConfig` JSON file
pub struct ConfigManager {
    /// Path to the config file
    config_path: PathBuf,
    /// Current configuration (cached)
    current: SyncConfig,
}

impl ConfigManager {
    /// Create a manager for the given file; nothing is read until `load`
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            current: SyncConfig::default(),
        }
    }

    /// Path to the config file
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load config from disk, or use defaults if the file doesn't exist
    ///
    /// A file that fails to parse or validate is logged and replaced by defaults.
    pub fn load(&mut self) -> Result<&SyncConfig, ConfigError> {
        if !self.config_path.exists() {
            self.current = SyncConfig::default();
            return Ok(&self.current);
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let parsed = serde_json::from_str::<SyncConfig>(&content)
            .map_err(ConfigError::from)
            .and_then(|config| config.validate().map(|()| config));

        self.current = match parsed {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %self.config_path.display(),
                    "Failed to load config file, using defaults: {}",
                    e
                );
                SyncConfig::default()
            }
        };
        Ok(&self.current)
    }

    /// Save current config to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.current)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Current config
    pub fn get(&self) -> &SyncConfig {
        &self.current
    }

    /// Validate, replace and save
    pub fn update(&mut self, config: SyncConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.current = config;
        self.save()
    }

    /// Reset to defaults and save
    pub fn reset(&mut self) -> Result<&SyncConfig, ConfigError> {
        self.current = SyncConfig::default();
        self.save()?;
        Ok(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.queue.storage_key, "offlineQueue");
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.locks.lock_duration(), Duration::from_secs(30));
        assert_eq!(config.locks.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.merge.timestamp_threshold(), Duration::from_millis(1000));
        assert_eq!(config.merge.default_strategy, MergeStrategy::MergeFields);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"locks": {"lockDurationMs": 10000}}"#).unwrap();

        assert_eq!(config.locks.lock_duration_ms, 10_000);
        assert_eq!(config.locks.sweep_interval_ms, 60_000);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_strategy_names_in_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"merge": {"defaultStrategy": "user-choice"}}"#).unwrap();
        assert_eq!(config.merge.default_strategy, MergeStrategy::UserChoice);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = SyncConfig::default();
        config.queue.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SyncConfig::default();
        config.locks.sweep_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SyncConfig {
            queue: QueueConfig::default().with_storage_key(""),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_durations() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"locks":{"lockDurationMs":18446744073709551615}}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SyncConfig::default();
        config.locks.sweep_interval_ms = MAX_DURATION_MS + 1;
        assert!(config.validate().is_err());

        config.locks.sweep_interval_ms = MAX_DURATION_MS;
        config.locks.lock_duration_ms = MAX_DURATION_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manager_huge_duration_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labsync.json");
        std::fs::write(&path, r#"{"locks":{"lockDurationMs":18446744073709551615}}"#).unwrap();

        let mut manager = ConfigManager::new(&path);
        assert_eq!(*manager.load().unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_builders() {
        let locks = LockConfig::default()
            .with_lock_duration(Duration::from_millis(500))
            .with_sweep_interval(Duration::from_secs(5));
        assert_eq!(locks.lock_duration_ms, 500);
        assert_eq!(locks.sweep_interval_ms, 5_000);

        let queue = QueueConfig::default().with_max_attempts(5).with_storage_key("q2");
        assert_eq!(queue.max_attempts, 5);
        assert_eq!(queue.storage_key, "q2");
    }

    #[test]
    fn test_manager_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(temp_dir.path().join("labsync.json"));

        let config = manager.load().unwrap();
        assert_eq!(*config, SyncConfig::default());
    }

    #[test]
    fn test_manager_update_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("labsync.json");

        let mut manager = ConfigManager::new(&path);
        let mut config = SyncConfig::default();
        config.queue.max_attempts = 7;
        manager.update(config).unwrap();
        assert!(path.exists());

        let mut reloaded = ConfigManager::new(&path);
        assert_eq!(reloaded.load().unwrap().queue.max_attempts, 7);

        reloaded.reset().unwrap();
        let mut again = ConfigManager::new(&path);
        assert_eq!(again.load().unwrap().queue.max_attempts, 3);
    }

    #[test]
    fn test_manager_invalid_file_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labsync.json");
        std::fs::write(&path, "{ definitely not json").unwrap();

        let mut manager = ConfigManager::new(&path);
        assert_eq!(*manager.load().unwrap(), SyncConfig::default());

        std::fs::write(&path, r#"{"queue": {"maxAttempts": 0}}"#).unwrap();
        assert_eq!(*manager.load().unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_manager_update_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(temp_dir.path().join("labsync.json"));

        let mut config = SyncConfig::default();
        config.locks.lock_duration_ms = 0;
        assert!(manager.update(config).is_err());
        assert_eq!(*manager.get(), SyncConfig::default());
    }
}

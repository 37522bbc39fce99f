//! Cluster configuration.
//!
//! Resolution order: built-in defaults → config file → environment
//! variable overrides.
//!
//! Config file location:
//!   1. $STORAGE_CONFIG (explicit override)
//!   2. ./cluster.toml
//!
//! Env var overrides use double-underscore nesting, e.g.
//! STORAGE_REPLICATION__DEFAULT_FACTOR=5.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub replication: ReplicationConfig,
    pub monitoring: MonitoringConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub default_factor: u32,
    pub min_factor: u32,
    pub placement_strategy: PlacementStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    Random,
    LeastLoaded,
    Diverse,
}

impl std::str::FromStr for PlacementStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(PlacementStrategy::Random),
            "least_loaded" => Ok(PlacementStrategy::LeastLoaded),
            "diverse" => Ok(PlacementStrategy::Diverse),
            other => Err(ConfigError::UnknownPlacementStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub heartbeat_interval_secs: u64,
    pub failure_timeout_secs: u64,
    pub recovery_check_interval_secs: u64,
    pub enable_auto_recovery: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub checksum_algorithm: String,
    pub verify_on_write: bool,
    pub verify_on_read: bool,
    pub data_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationConfig::default(),
            monitoring: MonitoringConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            default_factor: 3,
            min_factor: 2,
            placement_strategy: PlacementStrategy::Diverse,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 3,
            failure_timeout_secs: 30,
            recovery_check_interval_secs: 5,
            enable_auto_recovery: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checksum_algorithm: "sha256".to_string(),
            verify_on_write: true,
            verify_on_read: true,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("unknown placement strategy: {0}")]
    UnknownPlacementStrategy(String),
}

impl ClusterConfig {
    /// Load config: defaults → file (if present) → env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ClusterConfig::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("STORAGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("cluster.toml"))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("STORAGE_REPLICATION__DEFAULT_FACTOR") {
            if let Ok(n) = v.parse() {
                self.replication.default_factor = n;
            }
        }
        if let Ok(v) = std::env::var("STORAGE_REPLICATION__MIN_FACTOR") {
            if let Ok(n) = v.parse() {
                self.replication.min_factor = n;
            }
        }
        if let Ok(v) = std::env::var("STORAGE_REPLICATION__PLACEMENT_STRATEGY") {
            self.replication.placement_strategy = v.parse()?;
        }
        if let Ok(v) = std::env::var("STORAGE_MONITORING__HEARTBEAT_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.monitoring.heartbeat_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("STORAGE_MONITORING__FAILURE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.monitoring.failure_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("STORAGE_MONITORING__RECOVERY_CHECK_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.monitoring.recovery_check_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("STORAGE_MONITORING__ENABLE_AUTO_RECOVERY") {
            self.monitoring.enable_auto_recovery = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("STORAGE_STORAGE__VERIFY_ON_WRITE") {
            self.storage.verify_on_write = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("STORAGE_STORAGE__VERIFY_ON_READ") {
            self.storage.verify_on_read = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("STORAGE_STORAGE__DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = ClusterConfig::default();
        assert_eq!(config.replication.default_factor, 3);
        assert_eq!(config.replication.min_factor, 2);
        assert_eq!(config.replication.placement_strategy, PlacementStrategy::Diverse);
        assert!(config.monitoring.enable_auto_recovery);
    }

    #[test]
    fn placement_strategy_parses_known_names() {
        assert_eq!("random".parse::<PlacementStrategy>().unwrap(), PlacementStrategy::Random);
        assert_eq!(
            "least_loaded".parse::<PlacementStrategy>().unwrap(),
            PlacementStrategy::LeastLoaded
        );
        assert!("bogus".parse::<PlacementStrategy>().is_err());
    }
}

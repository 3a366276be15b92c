//! Deployment settings types.
//!
//! This module defines the structs that map to the `fabric.deploy.yaml`
//! file. Relative paths in the file are resolved against the directory the
//! file was loaded from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::{EngineSettings, RetryPolicy};
use crate::resolver::MergePolicy;

/// The root settings structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Project-level settings.
    pub project: ProjectConfig,
    /// Where the inventory lives.
    #[serde(default)]
    pub inventory: InventoryConfig,
    /// Where baselines and run reports live.
    #[serde(default)]
    pub store: StoreConfig,
    /// Where devices are reached.
    #[serde(default)]
    pub target: TargetConfig,
    /// Deployment engine tuning.
    #[serde(default)]
    pub deploy: DeploySettings,
    /// Directory the file was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Environment (e.g., "lab", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Inventory location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryConfig {
    /// Path to `inventory.yml`; `group_vars/` and `host_vars/` sit next to it.
    #[serde(default = "default_inventory_path")]
    pub path: PathBuf,
}

/// Content store location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store directory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Device target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Spool directory standing in for live devices.
    #[serde(default = "default_spool_path")]
    pub spool: PathBuf,
}

/// Deployment engine tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploySettings {
    /// Retries after the first push attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Upper bound on a retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Bound on each session operation, in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Devices pushed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Restore the prior config after a terminal failure.
    #[serde(default = "default_rollback")]
    pub rollback_on_failure: bool,
    /// How nested mappings from different scopes combine.
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

// Default value functions

const fn default_max_retries() -> u32 {
    2
}

const fn default_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_session_timeout() -> u64 {
    30
}

const fn default_concurrency() -> usize {
    8
}

const fn default_rollback() -> bool {
    true
}

fn default_environment() -> String {
    String::from("lab")
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("inventory/inventory.yml")
}

fn default_store_path() -> PathBuf {
    PathBuf::from(crate::materializer::STORE_DIR)
}

fn default_spool_path() -> PathBuf {
    PathBuf::from("spool")
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: default_inventory_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            spool: default_spool_path(),
        }
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            session_timeout_secs: default_session_timeout(),
            concurrency: default_concurrency(),
            rollback_on_failure: default_rollback(),
            merge_policy: MergePolicy::default(),
        }
    }
}

impl DeploySettings {
    /// Retry policy described by these settings.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    /// Engine settings described by these settings.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            retry: self.retry_policy(),
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            concurrency: self.concurrency,
            rollback_on_failure: self.rollback_on_failure,
        }
    }
}

impl DeployConfig {
    /// Creates settings with defaults for everything but the project name.
    #[must_use]
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            project: ProjectConfig {
                name: name.into(),
                environment: default_environment(),
            },
            inventory: InventoryConfig::default(),
            store: StoreConfig::default(),
            target: TargetConfig::default(),
            deploy: DeploySettings::default(),
            base_dir: base_dir.into(),
        }
    }

    /// Returns the project name qualified by environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Absolute path of `inventory.yml`.
    #[must_use]
    pub fn inventory_path(&self) -> PathBuf {
        self.resolve(&self.inventory.path)
    }

    /// Absolute path of the store directory.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.resolve(&self.store.path)
    }

    /// Absolute path of the spool directory.
    #[must_use]
    pub fn spool_path(&self) -> PathBuf {
        self.resolve(&self.target.spool)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_resolved_against_base() {
        let mut config = DeployConfig::new("campus", "/srv/fabric");
        config.target.spool = PathBuf::from("/var/spool/fabric");

        assert_eq!(config.inventory_path(), PathBuf::from("/srv/fabric/inventory/inventory.yml"));
        assert_eq!(config.store_path(), PathBuf::from("/srv/fabric/.fabric"));
        assert_eq!(config.spool_path(), PathBuf::from("/var/spool/fabric"));
    }

    #[test]
    fn test_engine_settings() {
        let settings = DeploySettings {
            max_retries: 3,
            backoff_ms: 250,
            session_timeout_secs: 10,
            ..DeploySettings::default()
        };
        let engine = settings.engine_settings();

        assert_eq!(engine.retry.max_attempts(), 4);
        assert_eq!(engine.retry.base_delay, Duration::from_millis(250));
        assert_eq!(engine.session_timeout, Duration::from_secs(10));
        assert!(engine.rollback_on_failure);
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(DeployConfig::new("campus", ".").qualified_name(), "campus-lab");
    }
}

//! Settings module for the fabric deployment system.
//!
//! This module handles:
//! - Parsing `fabric.deploy.yaml` with environment overrides
//! - Validation of settings and inventory
//! - Content hashing of rendered configs

mod hash;
mod parser;
mod settings;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_CONCURRENCY, ENV_MAX_RETRIES, ENV_SPOOL_PATH, ENV_STORE_PATH,
    find_config_file,
};
pub use settings::{DeployConfig, DeploySettings, InventoryConfig, ProjectConfig, StoreConfig, TargetConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};

//! Settings parser for loading `fabric.deploy.yaml`.
//!
//! This module loads settings from YAML, applies `FABRIC_*` environment
//! overrides, and locates the settings file by walking up from a directory.

use crate::error::{ConfigError, FabricError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use super::settings::DeployConfig;

/// Environment variable overriding the store directory.
pub const ENV_STORE_PATH: &str = "FABRIC_STORE_PATH";

/// Environment variable overriding the spool directory.
pub const ENV_SPOOL_PATH: &str = "FABRIC_SPOOL_PATH";

/// Environment variable overriding the retry count.
pub const ENV_MAX_RETRIES: &str = "FABRIC_MAX_RETRIES";

/// Environment variable overriding push concurrency.
pub const ENV_CONCURRENCY: &str = "FABRIC_CONCURRENCY";

/// Settings parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for `.env` lookup.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        if !path.exists() {
            return Err(FabricError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FabricError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(config)
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            FabricError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed settings for project: {}", config.project.name);
        Ok(config)
    }

    /// Loads settings and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or an override has the
    /// wrong type.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies `FABRIC_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] if a numeric override does not
    /// parse.
    pub fn apply_env_overrides(
        config: &mut DeployConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(path) = lookup(ENV_STORE_PATH) {
            debug!("Overriding store.path from environment");
            config.store.path = PathBuf::from(path);
        }

        if let Some(path) = lookup(ENV_SPOOL_PATH) {
            debug!("Overriding target.spool from environment");
            config.target.spool = PathBuf::from(path);
        }

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            debug!("Overriding deploy.max_retries from environment");
            config.deploy.max_retries = parse_env(ENV_MAX_RETRIES, &value)?;
        }

        if let Some(value) = lookup(ENV_CONCURRENCY) {
            debug!("Overriding deploy.concurrency from environment");
            config.deploy.concurrency = parse_env(ENV_CONCURRENCY, &value)?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                FabricError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        FabricError::Config(ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value: value.to_string(),
        })
    })
}

/// Default settings file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["fabric.deploy.yaml", "fabric.deploy.yml", "fabric.yaml"];

/// Finds the settings file in a directory or its parents.
///
/// # Errors
///
/// Returns an error if no settings file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found settings file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(FabricError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MergePolicy;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: campus
";
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("parse");

        assert_eq!(config.project.name, "campus");
        assert_eq!(config.project.environment, "lab");
        assert_eq!(config.deploy.max_retries, 2);
        assert_eq!(config.deploy.merge_policy, MergePolicy::Replace);
        assert_eq!(config.target.spool, PathBuf::from("spool"));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
project:
  name: campus
  environment: prod
inventory:
  path: lab/inventory.yml
store:
  path: state
target:
  spool: /var/spool/fabric
deploy:
  max_retries: 4
  backoff_ms: 100
  max_backoff_ms: 2000
  session_timeout_secs: 15
  concurrency: 2
  rollback_on_failure: false
  merge_policy: deep_merge
";
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("parse");

        assert_eq!(config.deploy.max_retries, 4);
        assert_eq!(config.deploy.concurrency, 2);
        assert!(!config.deploy.rollback_on_failure);
        assert_eq!(config.deploy.merge_policy, MergePolicy::DeepMerge);
        assert_eq!(config.inventory.path, PathBuf::from("lab/inventory.yml"));
    }

    #[test]
    fn test_parse_error_carries_location() {
        let result = ConfigParser::new().parse_yaml("project: [", Some(Path::new("fabric.yaml")));
        assert!(matches!(
            result,
            Err(FabricError::Config(ConfigError::ParseError {
                location: Some(_),
                ..
            }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DeployConfig::new("campus", ".");
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SPOOL_PATH, "/tmp/spool"),
            (ENV_MAX_RETRIES, "5"),
            (ENV_CONCURRENCY, "16"),
        ]);

        ConfigParser::apply_env_overrides(&mut config, |name| env.get(name).map(|v| (*v).to_string()))
            .expect("overrides");

        assert_eq!(config.target.spool, PathBuf::from("/tmp/spool"));
        assert_eq!(config.deploy.max_retries, 5);
        assert_eq!(config.deploy.concurrency, 16);
        assert_eq!(config.store.path, PathBuf::from(".fabric"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = DeployConfig::new("campus", ".");
        let result = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == ENV_CONCURRENCY).then(|| String::from("many"))
        });

        assert!(matches!(
            result,
            Err(FabricError::Config(ConfigError::InvalidEnvVar { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        std::fs::write(temp.path().join("fabric.yaml"), "project:\n  name: campus\n").expect("write");
        let nested = temp.path().join("lab/site1");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("fabric.yaml"));

        let config = ConfigParser::new().load_file(&found).expect("load");
        assert_eq!(config.base_dir, temp.path());
    }
}

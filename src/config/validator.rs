//! Validation of settings and inventory.
//!
//! Every problem is collected in one pass so an operator sees all of them
//! at once; nothing here stops at the first error.

use crate::error::{ConfigError, FabricError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::settings::{DeployConfig, DeploySettings, ProjectConfig};
use crate::inventory::InventoryFile;
use crate::resolver::{ALL_GROUP, ScopeSet};

/// Retry count beyond which a run may stall for a long time.
const MAX_SENSIBLE_RETRIES: u32 = 10;

/// Validator for settings and inventory.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates settings and, when given, the inventory and its scopes.
    #[must_use]
    pub fn check(
        &self,
        config: &DeployConfig,
        inventory: Option<(&InventoryFile, &ScopeSet)>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_deploy(&config.deploy, &mut result);
        if let Some((file, scopes)) = inventory {
            Self::validate_inventory(file, scopes, &mut result);
        }

        debug!(
            "Validation found {} error(s), {} warning(s)",
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// Validates settings, failing on the first collected error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first problem.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config, None);
        match result.errors.first() {
            None => Ok(result),
            Some(first) => Err(FabricError::Config(ConfigError::validation(
                first.message.clone(),
                first.field.clone(),
            ))),
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.trim().is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_project_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_deploy(deploy: &DeploySettings, result: &mut ValidationResult) {
        if deploy.concurrency == 0 {
            result.error("deploy.concurrency", "Concurrency must be at least 1");
        }

        if deploy.session_timeout_secs == 0 {
            result.error("deploy.session_timeout_secs", "Session timeout must be at least 1 second");
        }

        if deploy.max_backoff_ms < deploy.backoff_ms {
            result.warnings.push(format!(
                "deploy.max_backoff_ms: {} is below backoff_ms {}; every retry waits {}ms",
                deploy.max_backoff_ms, deploy.backoff_ms, deploy.max_backoff_ms
            ));
        }

        if deploy.max_retries > MAX_SENSIBLE_RETRIES {
            result.warnings.push(format!(
                "deploy.max_retries: {} retries per device can stall a run",
                deploy.max_retries
            ));
        }
    }

    fn validate_inventory(file: &InventoryFile, scopes: &ScopeSet, result: &mut ValidationResult) {
        if file.devices.is_empty() {
            result.warnings.push(String::from("No devices defined in inventory"));
        }

        let mut seen = HashSet::new();
        for (i, device) in file.devices.iter().enumerate() {
            let field = format!("devices[{i}].name");
            if !seen.insert(device.name.as_str()) {
                result.error(&field, format!("Duplicate device: {}", device.name));
            }
            if !is_safe_device_name(&device.name) {
                result.error(
                    &field,
                    format!(
                        "Device name '{}' is unsafe. Use letters, digits, '-', '_' and '.' only.",
                        device.name
                    ),
                );
            }
        }

        let declared: HashSet<&str> = file.groups.iter().map(|g| g.name.as_str()).collect();
        let mut referenced: Vec<&str> = file.referenced_groups().into_iter().collect();
        referenced.sort_unstable();
        for group in referenced {
            if group == ALL_GROUP {
                continue;
            }
            if !declared.contains(group) {
                result.error("devices[].groups", format!("Unknown group referenced: {group}"));
            } else if scopes.group(group).is_none() {
                result
                    .warnings
                    .push(format!("group_vars/{group}.yml: group has no variables"));
            }
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Names must be lowercase alphanumeric with single hyphens, starting with
/// a letter.
fn is_valid_project_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Device names become store keys and spool file names.
fn is_safe_device_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{VariableScope, Vars};

    #[test]
    fn test_valid_project_name() {
        assert!(is_valid_project_name("campus"));
        assert!(is_valid_project_name("dub-fabric-2"));
        assert!(!is_valid_project_name(""));
        assert!(!is_valid_project_name("Campus"));
        assert!(!is_valid_project_name("2campus"));
        assert!(!is_valid_project_name("campus-"));
        assert!(!is_valid_project_name("campus--lab"));
    }

    #[test]
    fn test_safe_device_name() {
        assert!(is_safe_device_name("dub-st1-lf1"));
        assert!(is_safe_device_name("DUB_SSP1.lab"));
        assert!(!is_safe_device_name("../etc"));
        assert!(!is_safe_device_name("dub/ssp1"));
        assert!(!is_safe_device_name(".hidden"));
    }

    #[test]
    fn test_collects_every_settings_error() {
        let mut config = DeployConfig::new("", ".");
        config.deploy.concurrency = 0;
        config.deploy.session_timeout_secs = 0;

        let result = ConfigValidator::new().check(&config, None);
        assert_eq!(result.error_count(), 3);
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_inventory_problems() {
        let file: InventoryFile = serde_yaml::from_str(
            r"
groups:
  - name: leaf_defaults
    tier: leaf
  - name: data_switches
devices:
  - name: dub-st1-lf1
    dialect: nxos
    groups: [data_switches, ghost]
  - name: dub-st1-lf1
    dialect: nxos
  - name: dub/st1-lf2
    dialect: eos
",
        )
        .expect("parse");
        let scopes = ScopeSet::new().with(VariableScope::group("leaf_defaults", 10, Vars::new()));

        let result = ConfigValidator::new().check(&DeployConfig::new("campus", "."), Some((&file, &scopes)));

        let messages: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
        assert_eq!(result.error_count(), 3, "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("Duplicate device")));
        assert!(messages.iter().any(|m| m.contains("unsafe")));
        assert!(messages.iter().any(|m| m.contains("ghost")));
        assert_eq!(
            result.warnings,
            vec![String::from("group_vars/data_switches.yml: group has no variables")]
        );
    }
}

//! Variable scopes and the per-run scope snapshot.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Name of the implicit group every device belongs to.
pub const ALL_GROUP: &str = "all";

/// Specificity of the implicit `all` group.
pub const SPECIFICITY_ALL: u16 = 0;

/// Specificity of tier-default groups.
pub const SPECIFICITY_TIER: u16 = 10;

/// Specificity of any other group.
pub const SPECIFICITY_GROUP: u16 = 20;

/// Key/value mapping held by a scope.
pub type Vars = BTreeMap<String, Value>;

/// Where a scope sits in the precedence chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScopeKind {
    /// Inventory-derived facts, below every group.
    Facts,
    /// A group scope with its specificity level.
    Group {
        /// Higher is more specific.
        specificity: u16,
    },
    /// The device's own scope, above every group.
    Device,
}

/// A named bundle of variables attached to a group or a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableScope {
    /// Group or device name.
    pub name: String,
    /// Position in the chain.
    pub kind: ScopeKind,
    /// Variables defined by this scope.
    pub vars: Vars,
}

/// Read-only snapshot of every group and device scope, taken at run start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeSet {
    groups: BTreeMap<String, VariableScope>,
    devices: BTreeMap<String, VariableScope>,
}

impl VariableScope {
    /// Creates a group scope.
    #[must_use]
    pub fn group(name: &str, specificity: u16, vars: Vars) -> Self {
        Self {
            name: name.to_string(),
            kind: ScopeKind::Group { specificity },
            vars,
        }
    }

    /// Creates a device scope.
    #[must_use]
    pub fn device(name: &str, vars: Vars) -> Self {
        Self {
            name: name.to_string(),
            kind: ScopeKind::Device,
            vars,
        }
    }

    /// Returns the group specificity, if this is a group scope.
    #[must_use]
    pub const fn specificity(&self) -> Option<u16> {
        match self.kind {
            ScopeKind::Group { specificity } => Some(specificity),
            _ => None,
        }
    }
}

impl ScopeSet {
    /// Creates an empty scope set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a scope, replacing any scope with the same name and kind.
    pub fn insert(&mut self, scope: VariableScope) {
        match scope.kind {
            ScopeKind::Device => {
                self.devices.insert(scope.name.clone(), scope);
            }
            ScopeKind::Group { .. } | ScopeKind::Facts => {
                self.groups.insert(scope.name.clone(), scope);
            }
        }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, scope: VariableScope) -> Self {
        self.insert(scope);
        self
    }

    /// Gets a group scope by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&VariableScope> {
        self.groups.get(name)
    }

    /// Gets a device scope by name.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<&VariableScope> {
        self.devices.get(name)
    }

    /// Number of group scopes.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of device scopes.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

/// Builds a [`Vars`] mapping from a YAML snippet.
///
/// # Errors
///
/// Returns the YAML error if the snippet is not a string-keyed mapping.
pub fn vars_from_yaml(yaml: &str) -> std::result::Result<Vars, serde_yaml::Error> {
    let vars: Option<Vars> = serde_yaml::from_str(yaml)?;
    Ok(vars.unwrap_or_default())
}

//! Inventory and variable-scope providers.
//!
//! The core only sees the two provider traits. [`YamlInventory`] is the
//! default implementation reading an Ansible-style layout:
//!
//! ```text
//! inventory.yml
//! group_vars/<group>.yml
//! host_vars/<device>.yml
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{FabricError, InventoryError, Result};
use crate::resolver::{
    ALL_GROUP, SPECIFICITY_ALL, SPECIFICITY_GROUP, SPECIFICITY_TIER, ScopeSet, VariableScope,
    Vars,
};

use super::device::{ConnectionDescriptor, Device, Dialect, Tier, infer_site};

/// Source of the ordered device list.
pub trait InventoryProvider: Send + Sync {
    /// Returns every device, in inventory order.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be read.
    fn devices(&self) -> Result<Vec<Device>>;
}

/// Source of all group and device variable scopes.
pub trait ScopeProvider: Send + Sync {
    /// Returns a fresh snapshot of every scope.
    ///
    /// # Errors
    ///
    /// Returns an error if a vars file cannot be read.
    fn scopes(&self) -> Result<ScopeSet>;
}

/// Group declaration in `inventory.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Tier this group supplies defaults for.
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Explicit specificity, overriding the tier/group default.
    #[serde(default)]
    pub specificity: Option<u16>,
}

/// Device declaration in `inventory.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Hostname.
    pub name: String,
    /// Command dialect.
    pub dialect: Dialect,
    /// Tier, inferred from the hostname when omitted.
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Site, inferred from the hostname when omitted.
    #[serde(default)]
    pub site: Option<String>,
    /// Explicit group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Connection descriptor; defaults to the hostname on port 22.
    #[serde(default)]
    pub connection: Option<ConnectionDescriptor>,
}

/// The `inventory.yml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryFile {
    /// Declared groups.
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    /// Declared devices.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// YAML-backed inventory and scope provider.
#[derive(Debug, Clone)]
pub struct YamlInventory {
    /// Parsed inventory document.
    file: InventoryFile,
    /// Directory holding `group_vars/` and `host_vars/`.
    vars_dir: PathBuf,
}

impl InventoryFile {
    /// Returns the specificity a group scope gets.
    #[must_use]
    pub fn specificity_of(&self, group: &str) -> u16 {
        let declared = self.groups.iter().find(|g| g.name == group);
        match declared {
            Some(GroupEntry {
                specificity: Some(explicit),
                ..
            }) => *explicit,
            _ if group == ALL_GROUP => SPECIFICITY_ALL,
            Some(GroupEntry { tier: Some(_), .. }) => SPECIFICITY_TIER,
            _ => SPECIFICITY_GROUP,
        }
    }

    /// Names of every group referenced by a device.
    #[must_use]
    pub fn referenced_groups(&self) -> HashSet<&str> {
        self.devices
            .iter()
            .flat_map(|d| d.groups.iter().map(String::as_str))
            .collect()
    }

    /// Builds the device list, applying inference and tier-default groups.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names or an undeterminable tier.
    pub fn build_devices(&self) -> std::result::Result<Vec<Device>, InventoryError> {
        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(self.devices.len());

        for entry in &self.devices {
            if !seen.insert(entry.name.as_str()) {
                return Err(InventoryError::DuplicateDevice {
                    name: entry.name.clone(),
                });
            }

            let tier = entry
                .tier
                .or_else(|| Tier::infer_from_hostname(&entry.name))
                .ok_or_else(|| InventoryError::UnknownTier {
                    device: entry.name.clone(),
                })?;

            // Tier-default groups come first so explicit memberships stay
            // most specific last.
            let mut groups: Vec<String> = self
                .groups
                .iter()
                .filter(|g| g.tier == Some(tier) && !entry.groups.contains(&g.name))
                .map(|g| g.name.clone())
                .collect();
            groups.extend(entry.groups.iter().cloned());

            devices.push(Device {
                name: entry.name.clone(),
                tier,
                dialect: entry.dialect,
                groups,
                site: entry.site.clone().or_else(|| infer_site(&entry.name)),
                connection: entry.connection.clone().unwrap_or_else(|| ConnectionDescriptor {
                    host: entry.name.clone(),
                    port: 22,
                    params: BTreeMap::new(),
                }),
            });
        }

        Ok(devices)
    }
}

impl YamlInventory {
    /// Loads `inventory.yml`; vars directories are resolved next to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading inventory from: {}", path.display());

        if !path.exists() {
            return Err(InventoryError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path)?;
        let file: InventoryFile = serde_yaml::from_str(&content).map_err(|e| {
            FabricError::Inventory(InventoryError::ParseError {
                message: e.to_string(),
                location: path.display().to_string(),
            })
        })?;

        let vars_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        debug!(
            "Inventory declares {} groups and {} devices",
            file.groups.len(),
            file.devices.len()
        );
        Ok(Self { file, vars_dir })
    }

    /// Creates a provider from an already parsed document.
    #[must_use]
    pub fn from_parts(file: InventoryFile, vars_dir: impl Into<PathBuf>) -> Self {
        Self {
            file,
            vars_dir: vars_dir.into(),
        }
    }

    /// Returns the parsed inventory document.
    #[must_use]
    pub const fn file(&self) -> &InventoryFile {
        &self.file
    }

    fn group_vars_dir(&self) -> PathBuf {
        self.vars_dir.join("group_vars")
    }

    fn host_vars_dir(&self) -> PathBuf {
        self.vars_dir.join("host_vars")
    }
}

impl InventoryProvider for YamlInventory {
    fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.file.build_devices()?)
    }
}

impl ScopeProvider for YamlInventory {
    fn scopes(&self) -> Result<ScopeSet> {
        let mut set = ScopeSet::new();

        for (name, vars) in read_vars_dir(&self.group_vars_dir())? {
            let specificity = self.file.specificity_of(&name);
            set.insert(VariableScope::group(&name, specificity, vars));
        }

        for (name, vars) in read_vars_dir(&self.host_vars_dir())? {
            set.insert(VariableScope::device(&name, vars));
        }

        debug!(
            "Loaded {} group scopes and {} device scopes",
            set.group_count(),
            set.device_count()
        );
        Ok(set)
    }
}

/// Reads every `*.yml` / `*.yaml` file in a directory, keyed by file stem.
/// A missing directory yields nothing.
fn read_vars_dir(dir: &Path) -> Result<BTreeMap<String, Vars>> {
    let mut out = BTreeMap::new();
    if !dir.is_dir() {
        debug!("No vars directory at {}", dir.display());
        return Ok(out);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yml" || e == "yaml");
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_yaml {
            continue;
        }

        let content = std::fs::read_to_string(&path)?;
        let vars: Option<Vars> = serde_yaml::from_str(&content).map_err(|e| {
            FabricError::Inventory(InventoryError::ParseError {
                message: e.to_string(),
                location: path.display().to_string(),
            })
        })?;
        out.insert(stem.to_string(), vars.unwrap_or_default());
    }

    Ok(out)
}

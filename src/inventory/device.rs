//! Device identity types.
//!
//! A [`Device`] is created from the inventory at process start and is
//! immutable for the duration of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Topology layer of a device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Out-of-band management switches.
    Management,
    /// Route reflectors above the spines.
    Superspine,
    /// Per-site spines.
    Spine,
    /// Per-site leaves.
    Leaf,
}

/// Command dialect a device speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Cisco NX-OS.
    Nxos,
    /// Arista EOS.
    Eos,
}

/// Connection parameters, opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Management address.
    pub host: String,
    /// Management port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// A single network device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    /// Hostname, unique within the inventory.
    pub name: String,
    /// Topology tier.
    pub tier: Tier,
    /// Command dialect.
    pub dialect: Dialect,
    /// Group memberships, most specific last.
    pub groups: Vec<String>,
    /// Site (building) the device lives in, if any.
    pub site: Option<String>,
    /// Connection descriptor.
    pub connection: ConnectionDescriptor,
}

const fn default_port() -> u16 {
    22
}

impl Tier {
    /// Infers the tier from the campus hostname convention
    /// (`-ssp` superspine, `-sp` spine, `-lf` leaf, `-mgmt` management).
    #[must_use]
    pub fn infer_from_hostname(hostname: &str) -> Option<Self> {
        let segments: Vec<&str> = hostname.split('-').collect();
        // The first segment is the campus code, never a role.
        for segment in segments.iter().skip(1) {
            let role: String = segment.chars().take_while(char::is_ascii_alphabetic).collect();
            match role.as_str() {
                "ssp" => return Some(Self::Superspine),
                "sp" => return Some(Self::Spine),
                "lf" => return Some(Self::Leaf),
                "mgmt" => return Some(Self::Management),
                _ => {}
            }
        }
        None
    }

    /// Returns the tier name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Management => "management",
            Self::Superspine => "superspine",
            Self::Spine => "spine",
            Self::Leaf => "leaf",
        }
    }
}

impl Dialect {
    /// Returns the dialect name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nxos => "nxos",
            Self::Eos => "eos",
        }
    }
}

impl Device {
    /// Creates a device with a connection on the default port.
    #[must_use]
    pub fn new(name: &str, tier: Tier, dialect: Dialect, groups: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tier,
            dialect,
            groups: groups.iter().map(|g| (*g).to_string()).collect(),
            site: infer_site(name),
            connection: ConnectionDescriptor {
                host: name.to_string(),
                port: default_port(),
                params: BTreeMap::new(),
            },
        }
    }
}

/// Extracts a `stN` site segment from a hostname such as `dub-st1-lf1`.
#[must_use]
pub fn infer_site(hostname: &str) -> Option<String> {
    hostname
        .split('-')
        .skip(1)
        .find(|segment| {
            segment.len() > 2
                && segment.starts_with("st")
                && segment[2..].chars().all(|c| c.is_ascii_digit())
        })
        .map(String::from)
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

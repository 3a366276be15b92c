//! Typed section inputs decoded from a resolved variable set.
//!
//! Numeric fields are decoded as `i64` so out-of-range values (negative
//! ones included) surface as range errors rather than decode errors.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A VLAN given either as a bare id or as a mapping with a name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum VlanEntry {
    /// `- 100`
    Id(i64),
    /// `- {id: 100, name: users}`
    Named {
        /// VLAN id.
        id: i64,
        /// Optional VLAN name.
        #[serde(default)]
        name: Option<String>,
    },
}

impl VlanEntry {
    /// VLAN id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Id(id) | Self::Named { id, .. } => *id,
        }
    }

    /// VLAN name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Named { name, .. } => name.as_deref(),
        }
    }
}

/// `vni_mappings`: VLAN id to VXLAN network identifier.
pub type VniMappings = BTreeMap<i64, i64>;

/// LACP bundling mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LacpMode {
    /// Actively negotiate.
    #[default]
    Active,
    /// Respond only.
    Passive,
    /// Static bundle, no LACP.
    On,
}

impl LacpMode {
    /// Keyword used after `channel-group N mode`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::On => "on",
        }
    }
}

/// One entry of `portchannels`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortChannelInput {
    /// Port-channel number.
    pub id: i64,
    /// Member interfaces.
    #[serde(default)]
    pub members: Vec<String>,
    /// LACP mode for every member.
    #[serde(default)]
    pub mode: LacpMode,
    /// Interface description.
    #[serde(default)]
    pub description: Option<String>,
    /// MTU override; falls back to the device `mtu`.
    #[serde(default)]
    pub mtu: Option<i64>,
    /// Device on the far end of the bundle.
    #[serde(default)]
    pub peer: Option<String>,
}

/// One entry of `interfaces`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceInput {
    /// Interface name, e.g. `Ethernet1/1`.
    pub name: String,
    /// Interface description.
    #[serde(default)]
    pub description: Option<String>,
    /// Address in CIDR notation.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// MTU override; falls back to the device `mtu`.
    #[serde(default)]
    pub mtu: Option<i64>,
    /// Administratively down.
    #[serde(default)]
    pub shutdown: bool,
}

/// One value of `loopback_interfaces`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopbackInput {
    /// Interface description.
    #[serde(default)]
    pub description: Option<String>,
    /// Address in CIDR notation.
    pub ip_address: String,
}

/// `lines.console`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsoleLineInput {
    /// Idle timeout in minutes.
    pub exec_timeout: i64,
}

/// `lines.vty`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VtyLineInput {
    /// Idle timeout in minutes.
    pub exec_timeout: i64,
    /// Maximum concurrent sessions.
    #[serde(default)]
    pub session_limit: Option<i64>,
    /// Inbound access list name.
    #[serde(default)]
    pub access_class: Option<String>,
}

/// `lines`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinesInput {
    /// Console line.
    #[serde(default)]
    pub console: Option<ConsoleLineInput>,
    /// Virtual terminal lines.
    #[serde(default)]
    pub vty: Option<VtyLineInput>,
}

/// Inclusive legal range for a numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Smallest legal value.
    pub min: i64,
    /// Largest legal value.
    pub max: i64,
}

impl Range {
    /// Creates a range.
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Returns true if `value` lies within the range.
    #[must_use]
    pub const fn contains(self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Compares interface names so `Ethernet1/2` sorts before `Ethernet1/10`.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a).into_iter();
    let mut right = chunks(b).into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(m), Ok(n)) => m.cmp(&n),
                    _ => x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Splits a name into alternating digit and non-digit runs.
fn chunks(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_digit: Option<bool> = None;
    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        if prev_digit.is_some_and(|p| p != digit) {
            out.push(&s[start..i]);
            start = i;
        }
        prev_digit = Some(digit);
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

//! Device-pair adjacency derived from the inventory.
//!
//! Adjacency is only reported. Nothing here orders or blocks a push.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::device::{Device, Tier};

/// How a link between two devices was discovered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AdjacencyKind {
    /// Declared with a port-channel `peer`.
    Explicit,
    /// Derived from tier and site.
    Implicit,
}

/// A pair of devices sharing a physical link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkAdjacency {
    /// Lexically smaller device name.
    pub a: String,
    /// Lexically larger device name.
    pub b: String,
    /// Discovery kind.
    pub kind: AdjacencyKind,
    /// Short human-readable reason.
    pub reason: String,
}

/// Every adjacent pair in the fleet, one entry per pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdjacencyReport {
    links: Vec<LinkAdjacency>,
}

impl AdjacencyReport {
    /// Builds the report from the device list and explicit peer pairs.
    ///
    /// Explicit pairs win over implicit ones for the same two devices.
    #[must_use]
    pub fn build(devices: &[Device], explicit: &[(String, String)]) -> Self {
        let mut pairs: BTreeMap<(String, String), LinkAdjacency> = BTreeMap::new();

        for (left, right) in explicit {
            if left == right {
                continue;
            }
            let (a, b) = ordered(left, right);
            pairs.insert(
                (a.clone(), b.clone()),
                LinkAdjacency {
                    a,
                    b,
                    kind: AdjacencyKind::Explicit,
                    reason: String::from("port-channel peer"),
                },
            );
        }

        for (i, first) in devices.iter().enumerate() {
            for second in &devices[i + 1..] {
                let Some(reason) = implicit_reason(first, second) else {
                    continue;
                };
                let (a, b) = ordered(&first.name, &second.name);
                pairs.entry((a.clone(), b.clone())).or_insert(LinkAdjacency {
                    a,
                    b,
                    kind: AdjacencyKind::Implicit,
                    reason,
                });
            }
        }

        Self {
            links: pairs.into_values().collect(),
        }
    }

    /// All links, sorted by pair.
    #[must_use]
    pub fn links(&self) -> &[LinkAdjacency] {
        &self.links
    }

    /// Names of devices adjacent to `device`.
    #[must_use]
    pub fn peers_of(&self, device: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter_map(|l| {
                if l.a == device {
                    Some(l.b.as_str())
                } else if l.b == device {
                    Some(l.a.as_str())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Operator warnings for links whose both ends are pushed in the same run.
    #[must_use]
    pub fn warnings_for(&self, pushed: &[String]) -> Vec<String> {
        let pushed: HashSet<&str> = pushed.iter().map(String::as_str).collect();
        self.links
            .iter()
            .filter(|l| pushed.contains(l.a.as_str()) && pushed.contains(l.b.as_str()))
            .map(|l| {
                format!(
                    "{} and {} share a link ({}) and are both changing in this run",
                    l.a, l.b, l.reason
                )
            })
            .collect()
    }

    /// Number of links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns true if no links were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

fn ordered(x: &str, y: &str) -> (String, String) {
    if x <= y {
        (x.to_string(), y.to_string())
    } else {
        (y.to_string(), x.to_string())
    }
}

fn implicit_reason(x: &Device, y: &Device) -> Option<String> {
    match (x.tier, y.tier) {
        (Tier::Leaf, Tier::Spine) | (Tier::Spine, Tier::Leaf) => match (&x.site, &y.site) {
            (Some(a), Some(b)) if a == b => Some(format!("leaf-spine uplink in {a}")),
            _ => None,
        },
        (Tier::Spine, Tier::Superspine) | (Tier::Superspine, Tier::Spine) => {
            Some(String::from("spine-superspine uplink"))
        }
        _ => None,
    }
}

//! Device session capability.
//!
//! The engine never talks to a transport directly: it asks a
//! [`SessionProvider`] for a [`DeviceSession`], pushes a payload, and reads
//! the device state back for verification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::inventory::Device;
use crate::planner::PushPayload;
use crate::render::{ConfigBlock, RenderedConfig, Section, stanzas};

/// Configuration state read back from a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Blocks currently present on the device.
    pub blocks: Vec<ConfigBlock>,
}

impl DeviceSnapshot {
    /// Creates a snapshot from blocks.
    #[must_use]
    pub const fn new(blocks: Vec<ConfigBlock>) -> Self {
        Self { blocks }
    }

    /// Finds a block by section and key.
    #[must_use]
    pub fn block(&self, section: Section, key: &str) -> Option<&ConfigBlock> {
        self.blocks
            .iter()
            .find(|b| b.section == section && b.key == key)
    }

    fn block_mut(&mut self, section: Section, key: &str) -> Option<&mut ConfigBlock> {
        self.blocks
            .iter_mut()
            .find(|b| b.section == section && b.key == key)
    }

    /// Applies a payload the way a device would.
    ///
    /// A full payload replaces everything. A delta drops removed blocks,
    /// withdraws negated statements, then merges upserts line by line:
    /// statements the device already had stay unless they were withdrawn.
    pub fn apply(&mut self, payload: &PushPayload) {
        match payload {
            PushPayload::Full { blocks } => self.blocks.clone_from(blocks),
            PushPayload::Delta {
                upserts,
                retractions,
                removals,
            } => {
                self.blocks
                    .retain(|b| !removals.iter().any(|r| r.section == b.section && r.key == b.key));
                for retraction in retractions {
                    if let Some(existing) = self.block_mut(retraction.section, &retraction.key) {
                        existing.lines = withdraw(&existing.lines, &retraction.lines);
                    }
                }
                for block in upserts {
                    match self.block_mut(block.section, &block.key) {
                        Some(existing) => existing.lines = merge(&existing.lines, &block.lines),
                        None => self.blocks.push(block.clone()),
                    }
                }
                self.blocks.sort_by(|a, b| a.section.cmp(&b.section));
            }
        }
    }
}

/// Drops every statement a `no` line under the same header names, either
/// verbatim or by leading keyword. A member header left with nothing under
/// it no longer belongs to the block.
fn withdraw(lines: &[String], negations: &[String]) -> Vec<String> {
    // Negating the block's own object deletes everything under it.
    let deletes_object = match (lines.first(), negations.first()) {
        (Some(head), Some(first)) => first.strip_prefix("no ") == Some(head.as_str()),
        _ => false,
    };
    if deletes_object {
        return Vec::new();
    }

    let negated = stanzas(negations);
    let mut out = Vec::new();

    for stanza in stanzas(lines) {
        let targets: Vec<&str> = negated
            .iter()
            .filter(|n| n.header == stanza.header)
            .flat_map(|n| n.children.iter().filter_map(|c| c.trim().strip_prefix("no ")))
            .collect();
        let had_children = !stanza.children.is_empty();
        let children: Vec<&str> = stanza
            .children
            .into_iter()
            .filter(|child| {
                let statement = child.trim();
                !targets.iter().any(|target| {
                    statement == *target
                        || statement
                            .strip_prefix(target)
                            .is_some_and(|rest| rest.starts_with(' '))
                })
            })
            .collect();

        if had_children && children.is_empty() && !out.is_empty() {
            continue;
        }
        out.push(stanza.header.to_string());
        out.extend(children.into_iter().map(String::from));
    }
    out
}

/// Writes `upsert` over `existing`, keeping statements it does not repeat.
fn merge(existing: &[String], upsert: &[String]) -> Vec<String> {
    let current = stanzas(existing);
    let incoming = stanzas(upsert);
    let mut out = Vec::new();

    for stanza in &incoming {
        out.push(stanza.header.to_string());
        out.extend(stanza.children.iter().map(|c| (*c).to_string()));
        if let Some(prior) = current.iter().find(|c| c.header == stanza.header) {
            out.extend(
                prior
                    .children
                    .iter()
                    .filter(|c| !stanza.children.contains(c))
                    .map(|c| (*c).to_string()),
            );
        }
    }
    for prior in current
        .iter()
        .filter(|c| !incoming.iter().any(|s| s.header == c.header))
    {
        out.push(prior.header.to_string());
        out.extend(prior.children.iter().map(|c| (*c).to_string()));
    }
    out
}

/// An open session to one device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSession: Send {
    /// Sends a payload to the device.
    async fn push(&mut self, payload: &PushPayload) -> Result<(), SessionError>;

    /// Reads the current device configuration.
    async fn read_state(&mut self) -> Result<DeviceSnapshot, SessionError>;

    /// Closes the session.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens sessions to devices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Connects to a device.
    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceSession>, SessionError>;

    /// Returns the provider name.
    fn provider_type(&self) -> &'static str;
}

/// Blocks that must be absent after a push, as `(section, key)` pairs.
#[must_use]
pub fn removed_keys(payload: &PushPayload) -> Vec<(Section, String)> {
    match payload {
        PushPayload::Full { .. } => Vec::new(),
        PushPayload::Delta { removals, .. } => removals
            .iter()
            .map(|r| (r.section, r.key.clone()))
            .collect(),
    }
}

/// Compares device state to the intended config.
///
/// Every intended block must be present with identical lines and every
/// removed block must be absent. Returns one description per mismatch.
#[must_use]
pub fn verify_snapshot(
    intended: &RenderedConfig,
    removed: &[(Section, String)],
    snapshot: &DeviceSnapshot,
) -> Vec<String> {
    let mut mismatches = Vec::new();

    for block in intended.blocks() {
        match snapshot.block(block.section, &block.key) {
            None => mismatches.push(format!("{}: missing", block.id())),
            Some(actual) if actual.lines != block.lines => {
                mismatches.push(format!("{}: content differs", block.id()));
            }
            Some(_) => {}
        }
    }

    for (section, key) in removed {
        if snapshot.block(*section, key).is_some() {
            mismatches.push(format!("{section}/{key}: still present"));
        }
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Dialect;
    use crate::planner::{DevicePlan, DiffEngine, RemovedBlock, RetractedLines};

    fn block(section: Section, key: &str, lines: &[&str]) -> ConfigBlock {
        ConfigBlock::new(section, key, lines.iter().map(|l| (*l).to_string()).collect())
    }

    #[test]
    fn test_apply_delta() {
        let mut snapshot = DeviceSnapshot::new(vec![
            block(Section::Features, "lacp", &["feature lacp"]),
            block(Section::Features, "ospf", &["feature ospf"]),
            block(Section::Lines, "console", &["line console", "  exec-timeout 5"]),
        ]);

        snapshot.apply(&PushPayload::Delta {
            upserts: vec![
                block(Section::Lines, "console", &["line console", "  exec-timeout 15"]),
                block(Section::Features, "bgp", &["feature bgp"]),
            ],
            retractions: vec![RetractedLines {
                section: Section::Lines,
                key: String::from("console"),
                lines: vec![String::from("line console"), String::from("  no exec-timeout")],
            }],
            removals: vec![RemovedBlock {
                section: Section::Features,
                key: String::from("ospf"),
                negation: vec![String::from("no feature ospf")],
            }],
        });

        assert!(snapshot.block(Section::Features, "ospf").is_none());
        assert!(snapshot.block(Section::Features, "bgp").is_some());
        assert_eq!(
            snapshot.block(Section::Lines, "console").map(|b| b.lines.clone()),
            Some(vec![String::from("line console"), String::from("  exec-timeout 15")])
        );
    }

    fn pc10(members: &[&str]) -> ConfigBlock {
        let mut lines = vec![String::from("interface port-channel10")];
        for member in members {
            lines.push(format!("interface {member}"));
            lines.push(String::from("  channel-group 10 mode active"));
        }
        ConfigBlock::new(Section::PortChannels, "port-channel10", lines)
    }

    #[test]
    fn test_planned_delta_leaves_no_stale_member() {
        let prior = RenderedConfig::new(
            "dub-st1-lf1",
            Dialect::Nxos,
            vec![pc10(&["Ethernet1/1", "Ethernet1/2", "Ethernet1/3"])],
        );
        let intended = RenderedConfig::new("dub-st1-lf1", Dialect::Nxos, vec![pc10(&["Ethernet1/1", "Ethernet1/2"])]);
        let payload = DevicePlan::new(&DiffEngine::new(), &intended, Some(&prior))
            .payload
            .expect("payload");

        let mut snapshot = DeviceSnapshot::new(prior.blocks().to_vec());
        snapshot.apply(&payload);
        assert!(verify_snapshot(&intended, &removed_keys(&payload), &snapshot).is_empty());
    }

    #[test]
    fn test_upsert_alone_keeps_stale_member() {
        let mut snapshot = DeviceSnapshot::new(vec![pc10(&["Ethernet1/1", "Ethernet1/3"])]);
        let intended = RenderedConfig::new("dub-st1-lf1", Dialect::Nxos, vec![pc10(&["Ethernet1/1"])]);
        snapshot.apply(&PushPayload::Delta {
            upserts: intended.blocks().to_vec(),
            retractions: Vec::new(),
            removals: Vec::new(),
        });

        assert_eq!(
            verify_snapshot(&intended, &[], &snapshot),
            vec![String::from("port-channels/port-channel10: content differs")]
        );
    }

    #[test]
    fn test_verify_reports_every_mismatch() {
        let intended = RenderedConfig::new(
            "dub-ssp1",
            Dialect::Eos,
            vec![
                block(Section::Features, "lldp", &["lldp run"]),
                block(Section::Lines, "console", &["management console", "  idle-timeout 15"]),
            ],
        );
        let snapshot = DeviceSnapshot::new(vec![
            block(Section::Lines, "console", &["management console", "  idle-timeout 5"]),
            block(Section::Features, "ip-routing", &["ip routing"]),
        ]);
        let removed = vec![(Section::Features, String::from("ip-routing"))];

        let mismatches = verify_snapshot(&intended, &removed, &snapshot);
        assert_eq!(
            mismatches,
            vec![
                String::from("features/lldp: missing"),
                String::from("lines/console: content differs"),
                String::from("features/ip-routing: still present"),
            ]
        );
    }

    #[test]
    fn test_verify_clean_after_full_apply() {
        let intended = RenderedConfig::new(
            "dub-ssp1",
            Dialect::Eos,
            vec![block(Section::Features, "lldp", &["lldp run"])],
        );
        let mut snapshot = DeviceSnapshot::default();
        snapshot.apply(&PushPayload::full(&intended));

        assert!(verify_snapshot(&intended, &[], &snapshot).is_empty());
    }
}

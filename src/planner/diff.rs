//! Structural diff between two rendered configs.
//!
//! Blocks are matched by `(section, key)`, never by position, so a reorder
//! with identical content is not a change while a single modified
//! port-channel member is localized to its block.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ConfigHasher;
use crate::render::{ConfigBlock, RenderedConfig, Section};

/// Engine for computing block-level diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Type of difference detected for one block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Block is new.
    Added,
    /// Block is no longer rendered.
    Removed,
    /// Block exists in both with different lines.
    Changed,
}

/// Difference for a single block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDiff {
    /// Section of the block.
    pub section: Section,
    /// Block key.
    pub key: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Lines in the prior config.
    pub old_lines: Option<Vec<String>>,
    /// Lines in the intended config.
    pub new_lines: Option<Vec<String>>,
}

/// Complete diff for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Device name.
    pub device: String,
    /// Hash of the prior config, if any.
    pub old_hash: Option<String>,
    /// Hash of the intended config.
    pub new_hash: String,
    /// Block differences in section order.
    pub blocks: Vec<BlockDiff>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff from `old` (or nothing, on a first run) to `new`.
    #[must_use]
    pub fn diff(&self, old: Option<&RenderedConfig>, new: &RenderedConfig) -> ConfigDiff {
        let mut diff = ConfigDiff {
            device: new.device().to_string(),
            old_hash: old.map(|o| o.content_hash().to_string()),
            new_hash: new.content_hash().to_string(),
            blocks: Vec::new(),
        };

        let Some(old) = old else {
            diff.blocks = new.blocks().iter().map(added).collect();
            debug!("{} has no baseline, {} blocks added", diff.device, diff.blocks.len());
            return diff;
        };

        if old.dialect() == new.dialect()
            && ConfigHasher::hashes_match(old.content_hash(), new.content_hash())
        {
            debug!("{} unchanged (hash {})", diff.device, self.hasher.short_hash(new.content_hash()));
            return diff;
        }

        let old_blocks = index(old.blocks());
        let new_blocks = index(new.blocks());

        let mut changes: BTreeMap<(Section, &str), BlockDiff> = BTreeMap::new();
        for (id, block) in &new_blocks {
            match old_blocks.get(id) {
                None => {
                    changes.insert(*id, added(block));
                }
                Some(prior) if prior.lines != block.lines => {
                    changes.insert(
                        *id,
                        BlockDiff {
                            section: block.section,
                            key: block.key.clone(),
                            diff_type: DiffType::Changed,
                            old_lines: Some(prior.lines.clone()),
                            new_lines: Some(block.lines.clone()),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        for (id, block) in &old_blocks {
            if !new_blocks.contains_key(id) {
                changes.insert(
                    *id,
                    BlockDiff {
                        section: block.section,
                        key: block.key.clone(),
                        diff_type: DiffType::Removed,
                        old_lines: Some(block.lines.clone()),
                        new_lines: None,
                    },
                );
            }
        }

        diff.blocks = changes.into_values().collect();
        debug!("{} has {} changed block(s)", diff.device, diff.blocks.len());
        diff
    }
}

fn index(blocks: &[ConfigBlock]) -> BTreeMap<(Section, &str), &ConfigBlock> {
    blocks
        .iter()
        .map(|b| ((b.section, b.key.as_str()), b))
        .collect()
}

fn added(block: &ConfigBlock) -> BlockDiff {
    BlockDiff {
        section: block.section,
        key: block.key.clone(),
        diff_type: DiffType::Added,
        old_lines: None,
        new_lines: Some(block.lines.clone()),
    }
}

impl ConfigDiff {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns true if the device has no baseline.
    #[must_use]
    pub const fn is_first_push(&self) -> bool {
        self.old_hash.is_none()
    }

    /// Number of blocks with the given difference type.
    #[must_use]
    pub fn count(&self, diff_type: DiffType) -> usize {
        self.blocks.iter().filter(|b| b.diff_type == diff_type).count()
    }

    /// Sections containing at least one difference.
    #[must_use]
    pub fn changed_sections(&self) -> BTreeSet<Section> {
        self.blocks.iter().map(|b| b.section).collect()
    }

    /// Blocks no longer rendered.
    pub fn removed(&self) -> impl Iterator<Item = &BlockDiff> {
        self.blocks
            .iter()
            .filter(|b| b.diff_type == DiffType::Removed)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for BlockDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.section, self.key, self.diff_type)
    }
}

impl std::fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.blocks.is_empty() {
            return write!(f, "{}: no change", self.device);
        }
        write!(
            f,
            "{}: +{} ~{} -{}",
            self.device,
            self.count(DiffType::Added),
            self.count(DiffType::Changed),
            self.count(DiffType::Removed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Dialect;

    fn block(section: Section, key: &str, lines: &[&str]) -> ConfigBlock {
        ConfigBlock::new(section, key, lines.iter().map(|l| (*l).to_string()).collect())
    }

    fn pc10(members: &[&str]) -> ConfigBlock {
        let mut lines = vec!["interface port-channel10"];
        for m in members {
            lines.push(m);
        }
        block(Section::PortChannels, "port-channel10", &lines)
    }

    fn config(blocks: Vec<ConfigBlock>) -> RenderedConfig {
        RenderedConfig::new("dub-st1-lf1", Dialect::Nxos, blocks)
    }

    #[test]
    fn test_first_push_all_added() {
        let new = config(vec![block(Section::Features, "lacp", &["feature lacp"])]);
        let diff = DiffEngine::new().diff(None, &new);

        assert!(diff.is_first_push());
        assert_eq!(diff.count(DiffType::Added), 1);
    }

    #[test]
    fn test_reorder_is_not_a_change() {
        let a = block(Section::Features, "lacp", &["feature lacp"]);
        let b = block(Section::Lines, "console", &["line console"]);
        let old = config(vec![a.clone(), b.clone()]);
        let new = config(vec![b, a]);

        assert!(DiffEngine::new().diff(Some(&old), &new).is_empty());
    }

    #[test]
    fn test_member_change_localized() {
        let features = block(Section::Features, "lacp", &["feature lacp"]);
        let old = config(vec![features.clone(), pc10(&["interface Ethernet1/1", "interface Ethernet1/2"])]);
        let new = config(vec![
            features,
            pc10(&["interface Ethernet1/1", "interface Ethernet1/2", "interface Ethernet1/3"]),
        ]);

        let diff = DiffEngine::new().diff(Some(&old), &new);
        assert_eq!(diff.blocks.len(), 1);
        assert_eq!(diff.blocks[0].key, "port-channel10");
        assert_eq!(diff.blocks[0].diff_type, DiffType::Changed);
        assert_eq!(diff.changed_sections(), BTreeSet::from([Section::PortChannels]));
    }

    #[test]
    fn test_removed_block() {
        let old = config(vec![
            block(Section::Features, "lacp", &["feature lacp"]),
            block(Section::Features, "ospf", &["feature ospf"]),
        ]);
        let new = config(vec![block(Section::Features, "lacp", &["feature lacp"])]);

        let diff = DiffEngine::new().diff(Some(&old), &new);
        let removed: Vec<&str> = diff.removed().map(|b| b.key.as_str()).collect();
        assert_eq!(removed, vec!["ospf"]);
        assert_eq!(diff.to_string(), "dub-st1-lf1: +0 ~0 -1");
    }
}

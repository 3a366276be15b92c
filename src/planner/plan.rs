//! Push plan types and construction.
//!
//! This module turns per-device diffs into payloads: a full config when no
//! baseline exists, otherwise a delta of whole blocks, withdrawals of the
//! statements changed blocks dropped, and negations for blocks that are no
//! longer rendered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::render::{ConfigBlock, RenderedConfig, Section, syntax_for};

use super::diff::{ConfigDiff, DiffEngine, DiffType};

/// A block the device must drop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedBlock {
    /// Section of the dropped block.
    pub section: Section,
    /// Key of the dropped block.
    pub key: String,
    /// Dialect statements undoing it.
    pub negation: Vec<String>,
}

/// Statements a changed block no longer carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetractedLines {
    /// Section of the changed block.
    pub section: Section,
    /// Key of the changed block.
    pub key: String,
    /// Context headers with the negated statements under them.
    pub lines: Vec<String>,
}

/// What is sent to a device session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PushPayload {
    /// The complete intended config.
    Full {
        /// Every block, in emission order.
        blocks: Vec<ConfigBlock>,
    },
    /// Only what changed.
    Delta {
        /// Added and changed blocks, whole.
        upserts: Vec<ConfigBlock>,
        /// Withdrawals inside changed blocks.
        #[serde(default)]
        retractions: Vec<RetractedLines>,
        /// Blocks to drop.
        removals: Vec<RemovedBlock>,
    },
}

/// Planned action for one device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Nothing to push.
    NoChange,
    /// No baseline, full push.
    FirstPush,
    /// Delta push against the baseline.
    Update,
}

/// Plan for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePlan {
    /// Device name.
    pub device: String,
    /// Planned action.
    pub action_type: ActionType,
    /// Structural diff.
    pub diff: ConfigDiff,
    /// Payload, absent for no-change.
    pub payload: Option<PushPayload>,
}

/// A device excluded from the push because it did not resolve or render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedDevice {
    /// Device name.
    pub device: String,
    /// Every error found for the device.
    pub errors: Vec<String>,
}

/// A complete fleet push plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Per-device plans in inventory order.
    pub devices: Vec<DevicePlan>,
    /// Devices that will not be pushed.
    pub blocked: Vec<BlockedDevice>,
    /// Operator warnings (link adjacency).
    pub warnings: Vec<String>,
}

impl PushPayload {
    /// Full payload for a config.
    #[must_use]
    pub fn full(config: &RenderedConfig) -> Self {
        Self::Full {
            blocks: config.blocks().to_vec(),
        }
    }

    /// Delta payload from a diff, negating removed blocks and the dropped
    /// statements of changed blocks in the prior config's dialect.
    #[must_use]
    pub fn delta(diff: &ConfigDiff, intended: &RenderedConfig, prior: &RenderedConfig) -> Self {
        let syntax = syntax_for(prior.dialect());

        let upserts = diff
            .blocks
            .iter()
            .filter(|b| matches!(b.diff_type, DiffType::Added | DiffType::Changed))
            .filter_map(|b| intended.block(b.section, &b.key).cloned())
            .collect();

        let retractions = diff
            .blocks
            .iter()
            .filter(|b| b.diff_type == DiffType::Changed)
            .filter_map(|b| Some((prior.block(b.section, &b.key)?, intended.block(b.section, &b.key)?)))
            .map(|(old, new)| RetractedLines {
                section: old.section,
                key: old.key.clone(),
                lines: syntax.retract(old, new),
            })
            .filter(|r| !r.lines.is_empty())
            .collect();

        let removals = diff
            .removed()
            .filter_map(|b| prior.block(b.section, &b.key))
            .map(|block| RemovedBlock {
                section: block.section,
                key: block.key.clone(),
                negation: syntax.negate(block),
            })
            .collect();

        Self::Delta {
            upserts,
            retractions,
            removals,
        }
    }

    /// Returns true for a full payload.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }

    /// Number of blocks written or removed.
    #[must_use]
    pub fn block_count(&self) -> usize {
        match self {
            Self::Full { blocks } => blocks.len(),
            Self::Delta { upserts, removals, .. } => upserts.len() + removals.len(),
        }
    }

    /// Command lines in send order; removals and withdrawals go first so a
    /// member moving between bundles is released before it joins the new
    /// one.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Full { blocks } => blocks.iter().flat_map(|b| b.lines.iter().cloned()).collect(),
            Self::Delta {
                upserts,
                retractions,
                removals,
            } => removals
                .iter()
                .flat_map(|r| r.negation.iter().cloned())
                .chain(retractions.iter().flat_map(|r| r.lines.iter().cloned()))
                .chain(upserts.iter().flat_map(|b| b.lines.iter().cloned()))
                .collect(),
        }
    }
}

impl DevicePlan {
    /// Plans one device.
    #[must_use]
    pub fn new(engine: &DiffEngine, intended: &RenderedConfig, prior: Option<&RenderedConfig>) -> Self {
        let diff = engine.diff(prior, intended);
        let (action_type, payload) = match prior {
            None => (ActionType::FirstPush, Some(PushPayload::full(intended))),
            Some(_) if diff.is_empty() => (ActionType::NoChange, None),
            Some(prior) if prior.dialect() != intended.dialect() => {
                (ActionType::Update, Some(PushPayload::full(intended)))
            }
            Some(prior) => (
                ActionType::Update,
                Some(PushPayload::delta(&diff, intended, prior)),
            ),
        };
        Self {
            device: intended.device().to_string(),
            action_type,
            diff,
            payload,
        }
    }
}

impl PushPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            devices: Vec::new(),
            blocked: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Returns true if no device needs a push.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices
            .iter()
            .all(|d| d.action_type == ActionType::NoChange)
    }

    /// Number of devices with the given action.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.devices
            .iter()
            .filter(|d| d.action_type == action_type)
            .count()
    }

    /// Names of devices that will be pushed.
    #[must_use]
    pub fn pushed_devices(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|d| d.action_type != ActionType::NoChange)
            .map(|d| d.device.clone())
            .collect()
    }
}

impl Default for PushPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoChange => "no change",
            Self::FirstPush => "first push",
            Self::Update => "update",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PushPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() && self.blocked.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Push Plan ({} devices):", self.devices.len())?;
        for plan in &self.devices {
            writeln!(f, "  {} [{}]", plan.diff, plan.action_type)?;
        }

        if !self.blocked.is_empty() {
            writeln!(f, "\nBlocked:")?;
            for blocked in &self.blocked {
                writeln!(f, "  - {} ({} error(s))", blocked.device, blocked.errors.len())?;
            }
        }

        Ok(())
    }
}

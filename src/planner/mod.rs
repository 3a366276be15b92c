//! Planning module for push operations.
//!
//! This module compares intended configs against their baselines and
//! produces per-device push payloads.

mod diff;
mod plan;

pub use diff::{BlockDiff, ConfigDiff, DiffEngine, DiffType};
pub use plan::{ActionType, BlockedDevice, DevicePlan, PushPayload, PushPlan, RemovedBlock, RetractedLines};

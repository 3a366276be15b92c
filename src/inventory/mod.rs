//! Inventory module.
//!
//! This module handles device identity and the providers feeding the core:
//! - Device, tier, dialect and connection types
//! - Inventory and scope provider traits with a YAML implementation
//! - Link adjacency reporting

mod adjacency;
mod device;
mod provider;

pub use adjacency::{AdjacencyKind, AdjacencyReport, LinkAdjacency};
pub use device::{ConnectionDescriptor, Device, Dialect, Tier, infer_site};
pub use provider::{
    DeviceEntry, GroupEntry, InventoryFile, InventoryProvider, ScopeProvider, YamlInventory,
};

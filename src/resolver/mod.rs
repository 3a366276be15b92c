//! Hierarchical variable resolution.
//!
//! This module provides:
//! - Variable scopes and the run-start scope snapshot
//! - The resolver folding scopes into one mapping per device
//! - The resolved variable set consumed by the renderer

mod resolved;
#[allow(clippy::module_inception)]
mod resolver;
mod scope;

pub use resolved::ResolvedVariableSet;
pub use resolver::{MergePolicy, Resolution, VariableResolver};
pub use scope::{
    ALL_GROUP, SPECIFICITY_ALL, SPECIFICITY_GROUP, SPECIFICITY_TIER, ScopeKind, ScopeSet,
    VariableScope, Vars, vars_from_yaml,
};

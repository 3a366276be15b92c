// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Fabric Deploy
//!
//! Config synthesis and verified deployment for NX-OS and EOS campus
//! fabrics.
//!
//! ## Overview
//!
//! Fabric Deploy turns layered YAML variable definitions into per-device
//! configuration and pushes it to a fleet of switches:
//!
//! - Resolve every device's variables from ordered group and device scopes
//! - Render a structured config per device in its dialect
//! - Diff against the last verified baseline and push only what changed
//! - Verify every push against the device's reported state
//!
//! ## Architecture
//!
//! A run is a pipeline over a snapshot of the inventory:
//!
//! 1. **Resolve**: [`resolver`] merges scopes by specificity
//! 2. **Render**: [`render`] produces a [`render::RenderedConfig`]
//! 3. **Plan**: [`planner`] diffs it against the stored baseline
//! 4. **Deploy**: [`deploy`] pushes, verifies, retries and rolls back
//! 5. **Record**: [`materializer`] persists verified configs and the run report
//!
//! ## Modules
//!
//! - [`config`]: Settings parsing and validation
//! - [`inventory`]: Devices, scope providers and link adjacency
//! - [`resolver`]: Layered variable resolution
//! - [`render`]: Section rendering per dialect
//! - [`planner`]: Structural diff and push plans
//! - [`materializer`]: Content store, baselines and run lock
//! - [`deploy`]: Device sessions and the deployment engine
//! - [`reconciler`]: End-to-end fleet runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: campus
//!   environment: lab
//!
//! inventory:
//!   path: inventory/inventory.yml
//!
//! deploy:
//!   max_retries: 2
//!   concurrency: 8
//!   merge_policy: replace
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod inventory;
pub mod materializer;
pub mod planner;
pub mod reconciler;
pub mod render;
pub mod resolver;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use deploy::{DeploymentEngine, PushRecord, PushResult, SessionProvider, SpoolSessionProvider};
pub use error::{FabricError, Result};
pub use inventory::{Device, Dialect, InventoryProvider, ScopeProvider, Tier, YamlInventory};
pub use materializer::{ConfigMaterializer, ContentStore, LocalContentStore};
pub use planner::{DiffEngine, PushPlan};
pub use reconciler::{FleetReconciler, RunReport};
pub use render::{RenderedConfig, TemplateRenderer};
pub use resolver::{ResolvedVariableSet, VariableResolver};

//! Config materialization module.
//!
//! This module provides persistent storage for device baselines (the last
//! verified rendered config of each device), the run lock and run reports.

mod local;
mod lock;
#[allow(clippy::module_inception)]
mod materializer;
mod store;

pub use local::{LocalContentStore, STORE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LOCK_KEY, LockInfo, generate_holder_id};
pub use materializer::{ConfigMaterializer, config_key};
pub use store::ContentStore;
#[cfg(test)]
pub use store::MockContentStore;

//! Deployment module.
//!
//! This module pushes planned configs to devices through a session
//! capability, verifies them, and records a [`PushRecord`] per device.

mod engine;
mod record;
mod retry;
mod run_log;
mod session;
mod spool;

pub use engine::{DeploymentEngine, DeviceJob, EngineSettings};
pub use record::{DeviceRunState, PushRecord, PushResult, RollbackOutcome, StateTrail, VerifyResult};
pub use retry::RetryPolicy;
pub use run_log::RunLog;
pub use session::{DeviceSession, DeviceSnapshot, SessionProvider, removed_keys, verify_snapshot};
pub use spool::{SpoolFault, SpoolSessionProvider};

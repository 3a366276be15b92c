//! File-backed device emulation.
//!
//! A spool directory stands in for live devices: each device's running
//! configuration is kept in `<spool>/<device>.running.json`. Writing a
//! `<device>.fault` file makes the next session misbehave, which is how
//! failure drills are run in the lab. The fault file holds one of `push`,
//! `verify`, `timeout` or `unreachable`, optionally followed by `once` to
//! clear the fault after it fires.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::inventory::Device;
use crate::planner::PushPayload;

use super::session::{DeviceSession, DeviceSnapshot, SessionProvider};

/// How long a `timeout` fault stalls a push.
const STALL: Duration = Duration::from_secs(3600);

/// Injected misbehaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolFault {
    /// The device rejects the push.
    Push,
    /// The push is accepted but the last block is not applied.
    Verify,
    /// The push never completes.
    Timeout,
    /// The device cannot be connected to.
    Unreachable,
}

impl SpoolFault {
    /// Parses fault file content into a fault and its one-shot flag.
    #[must_use]
    pub fn parse(content: &str) -> Option<(Self, bool)> {
        let mut words = content.split_whitespace();
        let fault = match words.next()? {
            "push" => Self::Push,
            "verify" => Self::Verify,
            "timeout" => Self::Timeout,
            "unreachable" => Self::Unreachable,
            _ => return None,
        };
        let once = words.next() == Some("once");
        Some((fault, once))
    }
}

/// Session provider over a spool directory.
#[derive(Debug, Clone)]
pub struct SpoolSessionProvider {
    dir: PathBuf,
}

impl SpoolSessionProvider {
    /// Creates a provider over a spool directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Spool directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a device's running config.
    #[must_use]
    pub fn running_path(&self, device: &str) -> PathBuf {
        self.dir.join(format!("{device}.running.json"))
    }

    /// Path of a device's fault file.
    #[must_use]
    pub fn fault_path(&self, device: &str) -> PathBuf {
        self.dir.join(format!("{device}.fault"))
    }

    /// Reads a device's running config; a missing file is an empty device.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the file exists but cannot be
    /// read or decoded.
    pub async fn running(&self, device: &str) -> Result<DeviceSnapshot, SessionError> {
        read_snapshot(&self.running_path(device)).await
    }

    /// Reads and, for one-shot faults, consumes a device's fault file.
    async fn take_fault(&self, device: &str) -> Option<SpoolFault> {
        let path = self.fault_path(device);
        let content = fs::read_to_string(&path).await.ok()?;
        let Some((fault, once)) = SpoolFault::parse(&content) else {
            warn!("Ignoring unrecognized fault file {}", path.display());
            return None;
        };
        if once && let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to clear one-shot fault {}: {e}", path.display());
        }
        debug!("Injecting {fault:?} fault for {device}");
        Some(fault)
    }
}

#[async_trait]
impl SessionProvider for SpoolSessionProvider {
    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceSession>, SessionError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::Unreachable {
                message: format!("spool {} unavailable: {e}", self.dir.display()),
            })?;

        let fault = self.take_fault(&device.name).await;
        if fault == Some(SpoolFault::Unreachable) {
            return Err(SessionError::Unreachable {
                message: format!("{} did not answer", device.name),
            });
        }

        Ok(Box::new(SpoolSession {
            path: self.running_path(&device.name),
            fault,
        }))
    }

    fn provider_type(&self) -> &'static str {
        "spool"
    }
}

/// One session against a spool file.
#[derive(Debug)]
struct SpoolSession {
    path: PathBuf,
    fault: Option<SpoolFault>,
}

#[async_trait]
impl DeviceSession for SpoolSession {
    async fn push(&mut self, payload: &PushPayload) -> Result<(), SessionError> {
        match self.fault {
            Some(SpoolFault::Push) => {
                return Err(SessionError::Rejected {
                    message: String::from("% Invalid command at '^' marker"),
                });
            }
            Some(SpoolFault::Timeout) => tokio::time::sleep(STALL).await,
            _ => {}
        }

        let mut snapshot = read_snapshot(&self.path).await?;
        snapshot.apply(payload);
        if self.fault == Some(SpoolFault::Verify) {
            snapshot.blocks.pop();
        }

        let content = serde_json::to_vec_pretty(&snapshot).map_err(|e| SessionError::Transport {
            message: e.to_string(),
        })?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, content)
            .await
            .map_err(|e| SessionError::Transport {
                message: format!("write failed: {e}"),
            })?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| SessionError::Transport {
                message: format!("commit failed: {e}"),
            })
    }

    async fn read_state(&mut self) -> Result<DeviceSnapshot, SessionError> {
        read_snapshot(&self.path).await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

async fn read_snapshot(path: &Path) -> Result<DeviceSnapshot, SessionError> {
    match fs::read(path).await {
        Ok(content) => serde_json::from_slice(&content).map_err(|e| SessionError::Transport {
            message: format!("unreadable running config {}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceSnapshot::default()),
        Err(e) => Err(SessionError::Transport {
            message: format!("read failed: {e}"),
        }),
    }
}

//! Per-device run state and push records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// State of one device within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceRunState {
    /// Not yet examined.
    Pending,
    /// Diff computed.
    Diffed,
    /// Nothing to push.
    NoChange,
    /// A payload is being sent.
    Pushing,
    /// Device state matches the intended config.
    Verified,
    /// The push did not go through.
    PushFailed,
    /// The push went through but the device state differs.
    VerifyFailed,
    /// Terminal.
    Done,
}

impl DeviceRunState {
    /// Returns true if the machine allows moving to `next`.
    ///
    /// Failure states may re-enter `Pushing` for a retry. `Pending` and
    /// `Diffed` may go straight to `Done` for blocked and cancelled devices.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Diffed | Self::Done)
                | (Self::Diffed, Self::NoChange | Self::Pushing | Self::Done)
                | (Self::Pushing, Self::Verified | Self::PushFailed | Self::VerifyFailed)
                | (Self::PushFailed | Self::VerifyFailed, Self::Pushing | Self::Done)
                | (Self::NoChange | Self::Verified, Self::Done)
        )
    }

    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Diffed => "DIFFED",
            Self::NoChange => "NO_CHANGE",
            Self::Pushing => "PUSHING",
            Self::Verified => "VERIFIED",
            Self::PushFailed => "PUSH_FAILED",
            Self::VerifyFailed => "VERIFY_FAILED",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for DeviceRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every state a device passed through, in order.
#[derive(Debug, Clone)]
pub struct StateTrail {
    device: String,
    states: Vec<DeviceRunState>,
}

impl StateTrail {
    /// Starts a trail in `Pending`.
    #[must_use]
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            states: vec![DeviceRunState::Pending],
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> DeviceRunState {
        self.states
            .last()
            .copied()
            .unwrap_or(DeviceRunState::Pending)
    }

    /// Moves to the next state.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::IllegalTransition`] if the machine forbids it.
    pub fn advance(&mut self, next: DeviceRunState) -> Result<(), DeployError> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(DeployError::IllegalTransition {
                device: self.device.clone(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.states.push(next);
        Ok(())
    }

    /// States visited so far.
    #[must_use]
    pub fn states(&self) -> &[DeviceRunState] {
        &self.states
    }

    /// Consumes the trail.
    #[must_use]
    pub fn into_states(self) -> Vec<DeviceRunState> {
        self.states
    }
}

/// Outcome of a push for one device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PushResult {
    /// Pushed, verified and persisted.
    Success,
    /// Terminal failure.
    Failure,
    /// Nothing to push.
    NoChange,
    /// Excluded by resolution or render errors.
    Blocked,
    /// The run was cancelled before the device was pushed.
    Cancelled,
}

impl std::fmt::Display for PushResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::NoChange => "no_change",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Outcome of post-push verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyResult {
    /// No verification happened.
    #[default]
    NotRun,
    /// Device state matched.
    Passed,
    /// Device state differed.
    Failed {
        /// One description per mismatched block.
        mismatches: Vec<String>,
    },
}

impl std::fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRun => write!(f, "not_run"),
            Self::Passed => write!(f, "passed"),
            Self::Failed { mismatches } => write!(f, "failed ({})", mismatches.len()),
        }
    }
}

/// Outcome of restoring the prior config after a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// The prior config is back on the device.
    Restored {
        /// Hash of the restored config.
        hash: String,
    },
    /// The rollback itself failed.
    Failed {
        /// Why.
        message: String,
    },
    /// Rollback was due but the run was cancelled.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// What happened to one device in one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushRecord {
    /// Device name.
    pub device: String,
    /// Whether a session was ever opened.
    pub attempted: bool,
    /// Push attempts made.
    pub attempts: u32,
    /// Baseline hash before the run.
    pub prior_hash: Option<String>,
    /// Intended hash.
    pub new_hash: Option<String>,
    /// Push outcome.
    pub result: PushResult,
    /// Verification outcome of the last attempt.
    pub verification: VerifyResult,
    /// Error detail for anything but success.
    pub error: Option<String>,
    /// States visited.
    pub states: Vec<DeviceRunState>,
    /// Rollback outcome, if one was due.
    pub rollback: Option<RollbackOutcome>,
    /// Whether the new config became the baseline.
    pub persisted: bool,
    /// When the device finished.
    pub completed_at: DateTime<Utc>,
}

impl PushRecord {
    /// Record for a device excluded by resolution or render errors.
    #[must_use]
    pub fn blocked(device: &str, errors: &[String]) -> Self {
        Self {
            device: device.to_string(),
            attempted: false,
            attempts: 0,
            prior_hash: None,
            new_hash: None,
            result: PushResult::Blocked,
            verification: VerifyResult::NotRun,
            error: Some(errors.join("; ")),
            states: vec![DeviceRunState::Pending, DeviceRunState::Done],
            rollback: None,
            persisted: false,
            completed_at: Utc::now(),
        }
    }

    /// Returns true if the device ended in a state the operator must act on.
    #[must_use]
    pub const fn needs_attention(&self) -> bool {
        matches!(
            self.result,
            PushResult::Failure | PushResult::Blocked | PushResult::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_trail() {
        let mut trail = StateTrail::new("dub-ssp1");
        for state in [
            DeviceRunState::Diffed,
            DeviceRunState::Pushing,
            DeviceRunState::Verified,
            DeviceRunState::Done,
        ] {
            trail.advance(state).expect("legal");
        }
        assert_eq!(trail.current(), DeviceRunState::Done);
        assert_eq!(trail.states().len(), 5);
    }

    #[test]
    fn test_retry_reenters_pushing() {
        let mut trail = StateTrail::new("dub-ssp1");
        trail.advance(DeviceRunState::Diffed).expect("legal");
        trail.advance(DeviceRunState::Pushing).expect("legal");
        trail.advance(DeviceRunState::VerifyFailed).expect("legal");
        trail.advance(DeviceRunState::Pushing).expect("retry");
        trail.advance(DeviceRunState::Verified).expect("legal");
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut trail = StateTrail::new("dub-ssp1");
        trail.advance(DeviceRunState::Diffed).expect("legal");
        trail.advance(DeviceRunState::NoChange).expect("legal");

        let err = trail.advance(DeviceRunState::Pushing).expect_err("illegal");
        assert_eq!(
            err,
            DeployError::IllegalTransition {
                device: String::from("dub-ssp1"),
                from: String::from("NO_CHANGE"),
                to: String::from("PUSHING"),
            }
        );
        assert_eq!(trail.current(), DeviceRunState::NoChange);
    }

    #[test]
    fn test_verified_cannot_fail_later() {
        assert!(!DeviceRunState::Verified.can_transition_to(DeviceRunState::PushFailed));
        assert!(!DeviceRunState::Done.can_transition_to(DeviceRunState::Pending));
    }

    #[test]
    fn test_verify_result_serialization() {
        let failed = VerifyResult::Failed {
            mismatches: vec![String::from("lines/vty: missing")],
        };
        let json = serde_json::to_value(&failed).expect("serialize");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["mismatches"][0], "lines/vty: missing");
    }
}

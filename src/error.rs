//! Error types for the fabric deployment system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! settings, inventory, variable resolution, rendering, the content store,
//! and the deployment engine.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the fabric deployment system.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Settings file errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Inventory and scope loading errors.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Variable resolution errors.
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Rendering errors.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Content store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Deployment errors.
    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Settings file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The settings file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override holds a value of the wrong type.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Inventory and variable-scope loading errors.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The inventory or a vars file was not found.
    #[error("Inventory file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// An inventory or vars file could not be parsed.
    #[error("Failed to parse {location}: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// File that failed to parse.
        location: String,
    },

    /// The tier was omitted and cannot be inferred from the hostname.
    #[error("Cannot determine tier for device '{device}'")]
    UnknownTier {
        /// Device name.
        device: String,
    },

    /// The same device name appears twice.
    #[error("Duplicate device in inventory: {name}")]
    DuplicateDevice {
        /// The duplicated name.
        name: String,
    },

    /// A device name was requested that the inventory does not contain.
    #[error("Device not found in inventory: {name}")]
    UnknownDevice {
        /// The requested name.
        name: String,
    },
}

/// Variable resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// A section asked for a key the resolved set does not contain.
    #[error("Missing required variable '{key}' for device '{device}'")]
    MissingRequiredVariable {
        /// Device being resolved.
        device: String,
        /// The missing key.
        key: String,
    },

    /// Two scopes at the same specificity disagree on a key.
    #[error(
        "Scope conflict on '{key}' for device '{device}': scopes {scopes:?} share specificity {specificity} and disagree"
    )]
    ScopeConflict {
        /// Device being resolved.
        device: String,
        /// The conflicting key.
        key: String,
        /// Specificity level shared by the scopes.
        specificity: u16,
        /// Names of the conflicting scopes.
        scopes: Vec<String>,
    },
}

/// Rendering errors, always attributed to one section by the renderer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// A required variable is missing.
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// A value is outside the dialect-legal range or set.
    #[error("Invalid value for '{key}': {value} ({reason})")]
    InvalidValue {
        /// Variable key (with index path).
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A variable has the wrong shape.
    #[error("Malformed variable '{key}': {message}")]
    Malformed {
        /// Variable key.
        key: String,
        /// Decoder message.
        message: String,
    },
}

/// Content store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing or replacing a stored object failed.
    #[error("Persistence failure for '{key}': {message}")]
    PersistenceFailure {
        /// Store key.
        key: String,
        /// Description of the failure.
        message: String,
    },

    /// A stored object exists but cannot be trusted.
    #[error("Stored object '{key}' is corrupted: {message}")]
    Corrupted {
        /// Store key.
        key: String,
        /// Description of the corruption.
        message: String,
    },

    /// Run lock acquisition failed.
    #[error("Failed to acquire run lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Run lock is held by another process.
    #[error("Store is locked by another run (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Errors raised by a device session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The device could not be reached.
    #[error("device unreachable: {message}")]
    Unreachable {
        /// Transport message.
        message: String,
    },

    /// The device rejected the configuration.
    #[error("configuration rejected: {message}")]
    Rejected {
        /// Device message.
        message: String,
    },

    /// Reading or writing on an open session failed.
    #[error("session transport error: {message}")]
    Transport {
        /// Transport message.
        message: String,
    },
}

/// Deployment engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    /// Transport failure or command rejection while pushing.
    #[error("Push to '{device}' failed: {message}")]
    PushFailed {
        /// Device name.
        device: String,
        /// Description of the failure.
        message: String,
    },

    /// Post-push device state does not match the intended config.
    #[error("Verification of '{device}' failed: {} mismatched block(s)", mismatches.len())]
    VerifyFailed {
        /// Device name.
        device: String,
        /// Mismatched block descriptions.
        mismatches: Vec<String>,
    },

    /// A session operation did not complete in time.
    #[error("Timeout after {secs}s during {operation} on '{device}'")]
    Timeout {
        /// Device name.
        device: String,
        /// Operation that timed out.
        operation: String,
        /// Timeout in seconds.
        secs: u64,
    },

    /// The run was cancelled before this device started.
    #[error("Run cancelled before '{device}' was pushed")]
    Cancelled {
        /// Device name.
        device: String,
    },

    /// The engine attempted a state transition the machine forbids.
    #[error("Illegal transition for '{device}': {from} -> {to}")]
    IllegalTransition {
        /// Device name.
        device: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
}

/// Result type alias for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

impl FabricError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Deploy(e) => e.is_retryable(),
            Self::Store(StoreError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StoreError {
    /// Creates a persistence failure for a store key.
    #[must_use]
    pub fn persistence(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PersistenceFailure {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl RenderError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a malformed-variable error.
    #[must_use]
    pub fn malformed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used in reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Resolve(ResolveError::MissingRequiredVariable { .. }) => "missing_required_variable",
            Self::Resolve(ResolveError::ScopeConflict { .. }) => "scope_conflict",
            Self::InvalidValue { .. } => "invalid_value",
            Self::Malformed { .. } => "malformed",
        }
    }
}

impl DeployError {
    /// Returns true if the engine may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PushFailed { .. } | Self::VerifyFailed { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_errors_retryable() {
        let push = DeployError::PushFailed {
            device: String::from("dub-ssp1"),
            message: String::from("rejected"),
        };
        let cancelled = DeployError::Cancelled {
            device: String::from("dub-ssp1"),
        };

        assert!(push.is_retryable());
        assert!(!cancelled.is_retryable());
        assert!(FabricError::from(push).is_retryable());
    }

    #[test]
    fn test_render_error_kind() {
        let missing = RenderError::from(ResolveError::MissingRequiredVariable {
            device: String::from("dub-st1-lf1"),
            key: String::from("interfaces"),
        });
        assert_eq!(missing.kind(), "missing_required_variable");
        assert_eq!(RenderError::invalid("mtu", 9999, "out of range").kind(), "invalid_value");
    }
}

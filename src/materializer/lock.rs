//! Run locking for concurrent deploy protection.
//!
//! One lock object per store keeps two deploy runs from writing baselines
//! at the same time. A crashed run leaves its lock behind; it stops
//! blocking once it expires.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Store key of the lock object.
pub const LOCK_KEY: &str = "lock.json";

/// The lock object written to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock stops blocking other runs.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// A lock for `holder` with the default expiry.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_ttl(holder, Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// A lock for `holder` that expires after `ttl`.
    #[must_use]
    pub fn with_ttl(holder: &str, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at,
            expires_at: acquired_at + ttl,
        }
    }

    /// Returns true once the lock no longer blocks other runs.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds until expiry, zero once expired.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Returns true if `lock_id` names this lock.
    #[must_use]
    pub fn is_held_by(&self, lock_id: &str) -> bool {
        self.lock_id == lock_id
    }
}

/// Holder identifier for this run: `<host>-<pid>-<uuid8>`.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().into_owned());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &nonce[..8])
}

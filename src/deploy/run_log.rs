//! Append-only log of push records for one run.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::record::PushRecord;

/// Push records in completion order. Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    records: Arc<Mutex<Vec<PushRecord>>>,
}

impl RunLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finished record.
    pub async fn append(&self, record: PushRecord) {
        self.records.lock().await.push(record);
    }

    /// Copy of every record appended so far.
    pub async fn snapshot(&self) -> Vec<PushRecord> {
        self.records.lock().await.clone()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns true if nothing was appended.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

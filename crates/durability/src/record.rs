//! Commit records
//!
//! A commit record is the unit persisted to the write-ahead log: the
//! committed transaction, the LSN the log assigned to it, and the resources
//! in its write set. Records are immutable once appended.

use meridian_core::{Lsn, ResourceId, TransactionId};
use serde::{Deserialize, Serialize};

/// Durable record of one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Committed transaction
    pub transaction_id: TransactionId,
    /// Log sequence number, assigned by the storage at append time
    pub lsn: Lsn,
    /// Resources written by the transaction
    pub resources: Vec<ResourceId>,
}

impl CommitRecord {
    /// Create a record that has not been appended yet (`lsn == 0`)
    pub fn new(
        transaction_id: TransactionId,
        resources: impl IntoIterator<Item = ResourceId>,
    ) -> Self {
        Self {
            transaction_id,
            lsn: 0,
            resources: resources.into_iter().collect(),
        }
    }

    /// True once the storage has assigned an LSN
    pub fn is_appended(&self) -> bool {
        self.lsn != 0
    }
}

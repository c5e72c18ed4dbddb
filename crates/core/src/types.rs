//! Core types for the coordinator
//!
//! This module defines the identifiers shared by every layer:
//! - TransactionId: Globally unique, strictly increasing transaction identifier
//! - Lsn: Log sequence number assigned when a commit record becomes durable
//! - ResourceId: Identity of a transactional resource named in a write set
//! - TransactionStatus: Caller-visible outcome of a transaction

use crate::abort::AbortReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier
///
/// Assigned once by the identifier allocator and never reused, not even
/// across a crash and log replay.
pub type TransactionId = u64;

/// Log sequence number
///
/// Position of a commit record in the write-ahead log. `0` means the
/// transaction has not been appended yet.
pub type Lsn = u64;

/// Identity of a transactional resource
///
/// Write sets are keyed by resource identity. The identity is what gets
/// persisted in commit records, so it must be stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource identity from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Caller-visible status of a transaction
///
/// `Unknown` means the id was never observed or has already been forgotten.
/// Callers must treat it the same as `Aborted` (presumed abort).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Started, waiting on dependencies, or accepted but not yet durable
    InProgress,
    /// Durably committed (checkpointed or not)
    Committed,
    /// Aborted, with the recorded cause
    Aborted {
        /// Why the transaction was aborted
        reason: AbortReason,
    },
    /// Never observed, or garbage-collected
    Unknown,
}

impl TransactionStatus {
    /// True once the outcome can no longer change
    pub fn is_resolved(&self) -> bool {
        !matches!(self, TransactionStatus::InProgress)
    }

    /// True if a caller must treat the transaction as aborted
    pub fn is_presumed_aborted(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Aborted { .. } | TransactionStatus::Unknown
        )
    }
}

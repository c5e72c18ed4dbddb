//! Transaction records held by the coordinator
//!
//! ## State machine
//!
//! ```text
//! Started ──┬──> PendingDependency ──┬──> Validated ──> Committed ──> Checkpointed
//!           │                        │
//!           ├──> Validated           └──> Aborted
//!           └──> Aborted
//! ```
//!
//! `Aborted` and `Checkpointed` are terminal. `Committed` is reached only
//! after the commit record is durable.

use meridian_core::{AbortReason, Lsn, ResourceId, TransactionId, TransactionStatus};
use meridian_durability::CommitRecord;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Version recorded for write-set entries rebuilt from the log
///
/// Commit records only carry resource ids; checkpointing never reads the
/// version.
pub const RECOVERED_WRITE_VERSION: u64 = 0;

/// Upper bound applied to caller-supplied transaction timeouts
pub const MAX_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Internal lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Issued an id, commit not requested yet
    Started,
    /// Commit requested, waiting on unresolved dependencies
    PendingDependency,
    /// All dependencies resolved, awaiting its commit record
    Validated,
    /// Commit record is durable
    Committed,
    /// Every resource in the write set acknowledged the commit
    Checkpointed,
    /// Aborted, terminal
    Aborted,
}

impl TransactionState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Started, PendingDependency)
                | (Started, Validated)
                | (Started, Aborted)
                | (PendingDependency, Validated)
                | (PendingDependency, Aborted)
                | (Validated, Committed)
                | (Committed, Checkpointed)
        )
    }

    /// Aborted or Checkpointed
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Aborted | TransactionState::Checkpointed)
    }

    /// Whether an abort request still applies
    pub fn is_abortable(self) -> bool {
        matches!(
            self,
            TransactionState::Started | TransactionState::PendingDependency
        )
    }
}

/// Caller-supplied description of a transaction to commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Id issued by `start_transaction`
    pub transaction_id: TransactionId,
    /// Resources written, with the version written to each
    pub write_set: BTreeMap<ResourceId, u64>,
    /// Transactions whose effects this one observed
    pub dependencies: BTreeSet<TransactionId>,
}

impl TransactionInfo {
    /// Empty info for `transaction_id`
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            ..Self::default()
        }
    }

    /// Add a write to `resource`
    pub fn with_write(mut self, resource: impl Into<ResourceId>, version: u64) -> Self {
        self.write_set.insert(resource.into(), version);
        self
    }

    /// Add a dependency on `transaction_id`
    pub fn with_dependency(mut self, transaction_id: TransactionId) -> Self {
        self.dependencies.insert(transaction_id);
        self
    }

    fn from_record(record: &CommitRecord) -> Self {
        Self {
            transaction_id: record.transaction_id,
            write_set: record
                .resources
                .iter()
                .map(|resource| (resource.clone(), RECOVERED_WRITE_VERSION))
                .collect(),
            dependencies: BTreeSet::new(),
        }
    }
}

/// Mutable part of a transaction, guarded by the entry lock
#[derive(Debug)]
pub(crate) struct TransactionRecord {
    pub(crate) id: TransactionId,
    pub(crate) state: TransactionState,
    pub(crate) info: TransactionInfo,
    /// Assigned once the commit record is durable
    pub(crate) lsn: Lsn,
    /// Transactions waiting on this one to resolve
    pub(crate) waiting: SmallVec<[TransactionId; 4]>,
    pub(crate) pending_count: usize,
    pub(crate) expiration: Instant,
    pub(crate) completion: Option<Instant>,
    pub(crate) abort_reason: Option<AbortReason>,
    pub(crate) highest_active_at_checkpoint: TransactionId,
}

impl TransactionRecord {
    pub(crate) fn transition(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?} for transaction {}",
            self.state,
            next,
            self.id
        );
        self.state = next;
    }

    /// Move to Aborted and hand back the transactions waiting on this one
    pub(crate) fn mark_aborted(
        &mut self,
        reason: AbortReason,
        now: Instant,
    ) -> SmallVec<[TransactionId; 4]> {
        self.transition(TransactionState::Aborted);
        self.abort_reason = Some(reason);
        self.completion = Some(now);
        self.pending_count = 0;
        std::mem::take(&mut self.waiting)
    }

    pub(crate) fn status(&self) -> TransactionStatus {
        match self.state {
            TransactionState::Aborted => TransactionStatus::Aborted {
                reason: self
                    .abort_reason
                    .clone()
                    .unwrap_or(AbortReason::PresumedAborted {
                        transaction_id: self.id,
                    }),
            },
            TransactionState::Committed | TransactionState::Checkpointed => {
                TransactionStatus::Committed
            }
            TransactionState::Started
            | TransactionState::PendingDependency
            | TransactionState::Validated => TransactionStatus::InProgress,
        }
    }

    pub(crate) fn commit_record(&self) -> CommitRecord {
        CommitRecord::new(self.id, self.info.write_set.keys().cloned())
    }

    /// Retention window has elapsed since the transaction finished
    pub(crate) fn retention_elapsed(&self, now: Instant, retention: Duration) -> bool {
        self.completion
            .map(|completed| now.saturating_duration_since(completed) >= retention)
            .unwrap_or(false)
    }
}

/// A transaction table entry: immutable id plus the locked record
#[derive(Debug)]
pub(crate) struct TransactionEntry {
    pub(crate) id: TransactionId,
    record: Mutex<TransactionRecord>,
}

impl TransactionEntry {
    pub(crate) fn started(id: TransactionId, timeout: Duration, now: Instant) -> Self {
        Self::with_record(TransactionRecord {
            id,
            state: TransactionState::Started,
            info: TransactionInfo::new(id),
            lsn: 0,
            waiting: SmallVec::new(),
            pending_count: 0,
            expiration: now + timeout.min(MAX_TRANSACTION_TIMEOUT),
            completion: None,
            abort_reason: None,
            highest_active_at_checkpoint: 0,
        })
    }

    /// Entry for a commit record replayed from the log
    pub(crate) fn recovered(record: &CommitRecord, now: Instant) -> Self {
        Self::with_record(TransactionRecord {
            id: record.transaction_id,
            state: TransactionState::Committed,
            info: TransactionInfo::from_record(record),
            lsn: record.lsn,
            waiting: SmallVec::new(),
            pending_count: 0,
            expiration: now,
            completion: Some(now),
            abort_reason: None,
            highest_active_at_checkpoint: 0,
        })
    }

    fn with_record(record: TransactionRecord) -> Self {
        Self {
            id: record.id,
            record: Mutex::new(record),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TransactionRecord> {
        self.record.lock()
    }
}

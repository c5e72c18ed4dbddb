//! Write-ahead transaction log
//!
//! Thin state machine over a [`LogStorage`] enforcing the mode protocol:
//!
//! ```text
//! Uninitialized --initialize()--> Recovery --end_recovery()--> Append
//! ```
//!
//! - Recovery: `first_commit_record()` / `next_commit_record()` replay
//! - Append: `start_record()`, `update_start_record()`, `append()`, `truncate_log()`
//!
//! Calling an operation outside its mode fails with `InvalidOperation`. This
//! is a programming-contract check, not a runtime condition to recover from.

use crate::record::CommitRecord;
use crate::storage::LogStorage;
use meridian_core::{Error, Lsn, Result, TransactionId};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Current mode of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// `initialize()` has not been called
    Uninitialized,
    /// Replaying commit records
    Recovery,
    /// Accepting appends
    Append,
}

struct LogState {
    storage: Box<dyn LogStorage>,
    mode: LogMode,
    /// Last known start record, valid in Append mode
    start_record: TransactionId,
}

impl LogState {
    fn require(&self, mode: LogMode, op: &str) -> Result<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(Error::invalid_operation(format!(
                "{} requires {:?} mode, log is in {:?} mode",
                op, mode, self.mode
            )))
        }
    }
}

/// The write-ahead log used by the coordinator
///
/// All storage access is serialised through one lock; callers on different
/// threads (group commit, allocator, maintenance) may share a `TransactionLog`.
pub struct TransactionLog {
    state: Mutex<LogState>,
}

impl TransactionLog {
    /// Wrap a storage implementation. The log starts uninitialized.
    pub fn new(storage: Box<dyn LogStorage>) -> Self {
        Self {
            state: Mutex::new(LogState {
                storage,
                mode: LogMode::Uninitialized,
                start_record: 0,
            }),
        }
    }

    /// Current mode
    pub fn mode(&self) -> LogMode {
        self.state.lock().mode
    }

    /// Open the storage and enter Recovery mode
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.require(LogMode::Uninitialized, "initialize")?;
        state.storage.initialize()?;
        state.mode = LogMode::Recovery;
        debug!(target: "meridian::log", "Transaction log initialized, entering recovery");
        Ok(())
    }

    /// First record of the replay, `None` for an empty log
    pub fn first_commit_record(&self) -> Result<Option<CommitRecord>> {
        let mut state = self.state.lock();
        state.require(LogMode::Recovery, "first_commit_record")?;
        state.storage.first_commit_record()
    }

    /// Next record of the replay, `None` at the end
    pub fn next_commit_record(&self) -> Result<Option<CommitRecord>> {
        let mut state = self.state.lock();
        state.require(LogMode::Recovery, "next_commit_record")?;
        state.storage.next_commit_record()
    }

    /// Leave Recovery mode; one-way
    pub fn end_recovery(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.require(LogMode::Recovery, "end_recovery")?;
        state.start_record = state.storage.start_record()?;
        state.mode = LogMode::Append;
        info!(
            target: "meridian::log",
            start_record = state.start_record,
            "Transaction log recovery complete"
        );
        Ok(())
    }

    /// Highest transaction id ever reserved
    pub fn start_record(&self) -> Result<TransactionId> {
        let state = self.state.lock();
        state.require(LogMode::Append, "start_record")?;
        Ok(state.start_record)
    }

    /// Persist a new start record
    ///
    /// # Errors
    ///
    /// `InvalidOperation` unless `transaction_id` is strictly greater than the
    /// last known value.
    pub fn update_start_record(&self, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        state.require(LogMode::Append, "update_start_record")?;
        if transaction_id <= state.start_record {
            return Err(Error::invalid_operation(format!(
                "start record must increase: current {}, requested {}",
                state.start_record, transaction_id
            )));
        }
        state.storage.update_start_record(transaction_id)?;
        state.start_record = transaction_id;
        Ok(())
    }

    /// Append a batch of commit records as one durable write
    ///
    /// On success every record carries its assigned LSN. On failure the
    /// outcome is unknown and the caller must crash and recover.
    pub fn append(&self, records: &mut [CommitRecord]) -> Result<()> {
        let mut state = self.state.lock();
        state.require(LogMode::Append, "append")?;
        state.storage.append(records)
    }

    /// Discard records with an LSN at or below `lsn`
    pub fn truncate_log(&self, lsn: Lsn) -> Result<()> {
        let mut state = self.state.lock();
        state.require(LogMode::Append, "truncate_log")?;
        state.storage.truncate_log(lsn)
    }
}

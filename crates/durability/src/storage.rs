//! Log storage contract
//!
//! Durable append-only record store behind the write-ahead log. An
//! implementation provides sequential replay of commit records, batched
//! append with LSN assignment, a single mutable start record, and truncation
//! by sequence number.
//!
//! Mode rules (recovery before append) are enforced by
//! [`TransactionLog`](crate::TransactionLog), not by implementations.

use crate::record::CommitRecord;
use meridian_core::{Lsn, Result, TransactionId};

/// Storage backing the write-ahead log
pub trait LogStorage: Send {
    /// Open or create the durable state
    fn initialize(&mut self) -> Result<()>;

    /// Restart replay and return the oldest retained record
    fn first_commit_record(&mut self) -> Result<Option<CommitRecord>>;

    /// Return the next record in replay order, `None` at the end
    fn next_commit_record(&mut self) -> Result<Option<CommitRecord>>;

    /// Highest transaction id ever reserved by the allocator
    fn start_record(&self) -> Result<TransactionId>;

    /// Persist a new start record value
    fn update_start_record(&mut self, transaction_id: TransactionId) -> Result<()>;

    /// Persist a batch of records, assigning increasing LSNs in order
    ///
    /// On error the batch outcome is unknown to the caller.
    fn append(&mut self, records: &mut [CommitRecord]) -> Result<()>;

    /// Discard records with an LSN at or below `lsn`
    fn truncate_log(&mut self, lsn: Lsn) -> Result<()>;
}

//! In-memory log storage
//!
//! `MemoryLogStorage` keeps its durable state behind a shared handle, so a
//! second instance obtained with [`MemoryLogStorage::reopen`] sees exactly
//! what a restarted process would see on disk. Appends are all-or-nothing.
//!
//! Fault injection knobs make it usable as the storage mock in tests:
//! failing appends, failing start-record updates and failing truncations.

use crate::record::CommitRecord;
use crate::storage::LogStorage;
use meridian_core::{Error, Lsn, Result, TransactionId};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

#[derive(Debug)]
struct MemoryState {
    records: Vec<CommitRecord>,
    start_record: TransactionId,
    next_lsn: Lsn,
    failing_appends: usize,
    failing_start_record_updates: usize,
    fail_truncations: bool,
    append_calls: usize,
    truncated_through: Lsn,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            start_record: 0,
            next_lsn: 1,
            failing_appends: 0,
            failing_start_record_updates: 0,
            fail_truncations: false,
            append_calls: 0,
            truncated_through: 0,
        }
    }
}

fn injected(op: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("injected {} failure", op),
    ))
}

/// Shared in-memory implementation of [`LogStorage`]
#[derive(Debug)]
pub struct MemoryLogStorage {
    shared: Arc<Mutex<MemoryState>>,
    cursor: usize,
}

impl MemoryLogStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(MemoryState::default())),
            cursor: 0,
        }
    }

    /// A fresh instance over the same durable state (simulated restart)
    pub fn reopen(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cursor: 0,
        }
    }

    /// Make the next `count` appends fail without persisting anything
    pub fn fail_next_appends(&self, count: usize) {
        self.shared.lock().failing_appends = count;
    }

    /// Make the next `count` start-record updates fail
    pub fn fail_next_start_record_updates(&self, count: usize) {
        self.shared.lock().failing_start_record_updates = count;
    }

    /// Make truncation fail until switched off
    pub fn set_fail_truncations(&self, fail: bool) {
        self.shared.lock().fail_truncations = fail;
    }

    /// Snapshot of the retained records
    pub fn records(&self) -> Vec<CommitRecord> {
        self.shared.lock().records.clone()
    }

    /// Current durable start record
    pub fn start_record_value(&self) -> TransactionId {
        self.shared.lock().start_record
    }

    /// Number of append calls, successful or not
    pub fn append_calls(&self) -> usize {
        self.shared.lock().append_calls
    }

    /// Highest LSN passed to a successful truncation
    pub fn truncated_through(&self) -> Lsn {
        self.shared.lock().truncated_through
    }
}

impl Default for MemoryLogStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStorage for MemoryLogStorage {
    fn initialize(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn first_commit_record(&mut self) -> Result<Option<CommitRecord>> {
        self.cursor = 0;
        self.next_commit_record()
    }

    fn next_commit_record(&mut self) -> Result<Option<CommitRecord>> {
        let state = self.shared.lock();
        let record = state.records.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        Ok(record)
    }

    fn start_record(&self) -> Result<TransactionId> {
        Ok(self.shared.lock().start_record)
    }

    fn update_start_record(&mut self, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.shared.lock();
        if state.failing_start_record_updates > 0 {
            state.failing_start_record_updates -= 1;
            return Err(injected("start record update"));
        }
        state.start_record = transaction_id;
        Ok(())
    }

    fn append(&mut self, records: &mut [CommitRecord]) -> Result<()> {
        let mut state = self.shared.lock();
        state.append_calls += 1;
        if state.failing_appends > 0 {
            state.failing_appends -= 1;
            return Err(injected("append"));
        }
        for record in records.iter_mut() {
            record.lsn = state.next_lsn;
            state.next_lsn += 1;
        }
        state.records.extend(records.iter().cloned());
        Ok(())
    }

    fn truncate_log(&mut self, lsn: Lsn) -> Result<()> {
        let mut state = self.shared.lock();
        if state.fail_truncations {
            return Err(injected("truncation"));
        }
        state.records.retain(|record| record.lsn > lsn);
        state.truncated_through = state.truncated_through.max(lsn);
        Ok(())
    }
}

//! Dependency completion and group commit stages
//!
//! A validated transaction passes through two queues before it is durable:
//!
//! ```text
//! commit_transaction ──> dependency queue ──> group-commit queue ──> log.append
//!                            │
//!                            └── releases dependents whose last
//!                                dependency just validated
//! ```
//!
//! Both stages are FIFO and single-threaded, so a transaction always reaches
//! the log in the same batch as, or a later batch than, every transaction it
//! depends on.

use crate::coordinator::{pop_front, CoordinatorInner};
use crate::metrics::CoordinatorMetrics;
use crate::transaction::TransactionState;
use meridian_core::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

impl CoordinatorInner {
    /// Drain the dependency queue. Returns whether anything was processed.
    pub(crate) fn complete_dependencies(&self) -> bool {
        let mut processed = false;
        while let Some(entry) = pop_front(&self.dependency_queue) {
            processed = true;
            let (record, waiters) = {
                let mut validated = entry.lock();
                (
                    validated.commit_record(),
                    std::mem::take(&mut validated.waiting),
                )
            };
            self.group_commit_queue
                .lock()
                .push_back((record, Arc::clone(&entry)));
            self.group_commit_signal.notify();

            for waiting_id in waiters {
                let Some(waiting) = self.lookup(waiting_id) else {
                    continue;
                };
                let mut dependent = waiting.lock();
                if dependent.state != TransactionState::PendingDependency {
                    continue;
                }
                dependent.pending_count = dependent.pending_count.saturating_sub(1);
                if dependent.pending_count == 0 {
                    dependent.transition(TransactionState::Validated);
                    self.dependency_queue.lock().push_back(Arc::clone(&waiting));
                    debug!(
                        target: "meridian::txn",
                        transaction_id = waiting_id,
                        "Dependencies resolved, transaction validated"
                    );
                }
            }
        }
        processed
    }

    /// Append everything queued as one batch
    ///
    /// Returns `Ok(false)` when the queue was empty. An append failure is
    /// fatal: the batch may or may not be durable, so only a restart can tell.
    pub(crate) fn group_commit(&self) -> Result<bool> {
        let batch: Vec<_> = self.group_commit_queue.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(false);
        }
        let (mut records, entries): (Vec<_>, Vec<_>) = batch.into_iter().unzip();

        if let Err(e) = self.log.append(&mut records) {
            error!(
                target: "meridian::commit",
                batch_size = records.len(),
                error = %e,
                "Group commit failed, batch outcome unknown until restart"
            );
            return Err(Error::LogAppend(e.to_string()));
        }

        let now = Instant::now();
        for (entry, record) in entries.iter().zip(&records) {
            let mut committed = entry.lock();
            committed.lsn = record.lsn;
            committed.completion = Some(now);
            committed.transition(TransactionState::Committed);
        }
        CoordinatorMetrics::incr(&self.metrics.group_commit_batches);
        CoordinatorMetrics::add(&self.metrics.committed, entries.len());
        debug!(
            target: "meridian::commit",
            batch_size = entries.len(),
            last_lsn = records.last().map(|r| r.lsn).unwrap_or_default(),
            "Group commit appended"
        );

        self.checkpoint_queue.lock().extend(entries);
        self.checkpoint_signal.notify();
        Ok(true)
    }
}

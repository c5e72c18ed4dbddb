//! Periodic maintenance pass
//!
//! Each pass, in order:
//!
//! 1. truncate the log below the checkpointed LSN
//! 2. abort Started transactions past their expiration
//! 3. advance the smallest active id past resolved transactions
//! 4. evict terminal entries whose retention elapsed
//! 5. prune old abort tombstones
//!
//! Steps are independent; a failing step is logged and the rest still run.

use crate::coordinator::CoordinatorInner;
use crate::transaction::TransactionState;
use meridian_core::{AbortReason, TransactionId};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

impl CoordinatorInner {
    pub(crate) fn maintain(&self, now: Instant) {
        let _pass = self.maintenance_lock.lock();
        self.truncate_checkpointed_log();
        let timed_out = self.abort_expired(now);
        let advanced = self.advance_active_window();
        let evicted = self.evict_resolved(now);
        let pruned = self.tombstones.prune(now);

        if timed_out + advanced + evicted + pruned > 0 {
            debug!(
                target: "meridian::maintenance",
                timed_out,
                advanced,
                evicted,
                pruned,
                smallest_active = self.allocator.smallest_active_transaction_id(),
                table_size = self.table.len(),
                tombstones = self.tombstones.len(),
                "Maintenance pass"
            );
        }
    }

    fn truncate_checkpointed_log(&self) {
        let checkpointed = self.checkpointed_lsn.load(Ordering::Acquire);
        // The record at the checkpointed LSN is kept so LSN numbering
        // survives a restart.
        let through = checkpointed.saturating_sub(1);
        if through == 0 || through <= self.truncated_through.load(Ordering::Acquire) {
            return;
        }
        match self.log.truncate_log(through) {
            Ok(()) => {
                self.truncated_through.store(through, Ordering::Release);
                debug!(target: "meridian::maintenance", through, "Log truncated");
            }
            Err(e) => {
                warn!(
                    target: "meridian::maintenance",
                    through,
                    error = %e,
                    "Log truncation failed, retrying next pass"
                );
            }
        }
    }

    fn abort_expired(&self, now: Instant) -> usize {
        // Collected first: aborting looks entries up again, which must not
        // happen while a shard of the table is read-locked.
        let expired: Vec<TransactionId> = self
            .table
            .iter()
            .filter(|item| {
                let record = item.value().lock();
                record.state == TransactionState::Started && record.expiration < now
            })
            .map(|item| *item.key())
            .collect();

        expired
            .into_iter()
            .filter(|&transaction_id| {
                self.abort(transaction_id, AbortReason::Timeout { transaction_id })
            })
            .count()
    }

    fn advance_active_window(&self) -> usize {
        let _gate = self.start_gate.write();
        let highest = self.allocator.highest_active_transaction_id();
        let mut smallest = self.allocator.smallest_active_transaction_id();
        let mut advanced = 0;
        while smallest <= highest {
            if let Some(entry) = self.lookup(smallest) {
                if !entry.lock().state.is_terminal() {
                    break;
                }
            }
            self.allocator.pop_smallest_active_transaction_id();
            smallest += 1;
            advanced += 1;
        }
        advanced
    }

    fn evict_resolved(&self, now: Instant) -> usize {
        let retention = self.config.transaction_record_preservation();
        let smallest = self.allocator.smallest_active_transaction_id();
        let evictable: Vec<(TransactionId, Option<AbortReason>)> = self
            .table
            .iter()
            .filter_map(|item| {
                let record = item.value().lock();
                if !record.retention_elapsed(now, retention) {
                    return None;
                }
                let state = record.state;
                match state {
                    TransactionState::Aborted => Some((*item.key(), record.abort_reason.clone())),
                    // No active transaction can still depend on it
                    TransactionState::Checkpointed
                        if record.highest_active_at_checkpoint < smallest =>
                    {
                        Some((*item.key(), None))
                    }
                    _ => None,
                }
            })
            .collect();

        let evicted = evictable.len();
        for (transaction_id, abort_reason) in evictable {
            // Tombstone first so the abort stays visible across the removal
            if let Some(reason) = abort_reason {
                self.tombstones.insert(transaction_id, reason, now);
            }
            self.table.remove(&transaction_id);
        }
        evicted
    }
}

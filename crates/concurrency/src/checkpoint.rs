//! Checkpoint stage
//!
//! Committed transactions are checkpointed in batches of at most
//! [`MAX_CHECKPOINT_BATCH_SIZE`]. Per batch, each distinct resource is told
//! once, with the highest transaction id in the batch that wrote it. The
//! batch is marked Checkpointed only after every resource acknowledged, and
//! only then does the checkpointed LSN move forward (which is what allows
//! log truncation).
//!
//! A failed batch goes to the retry queue, which is drained ahead of new
//! work after an exponential backoff. Batches are never dropped.

use crate::coordinator::{pop_front, CoordinatorInner};
use crate::metrics::CoordinatorMetrics;
use crate::transaction::{TransactionEntry, TransactionState};
use meridian_core::{Error, ResourceId, Result, TransactionId, MAX_CHECKPOINT_BATCH_SIZE};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Resources notified concurrently per round
const MAX_PARALLEL_RESOURCE_COMMITS: usize = 32;

/// Retry bookkeeping, owned by the checkpoint stage
#[derive(Default)]
pub(crate) struct CheckpointState {
    retry: VecDeque<Arc<TransactionEntry>>,
    attempts: u32,
    next_retry_at: Option<Instant>,
}

impl CheckpointState {
    fn retry_due(&self, now: Instant) -> bool {
        self.next_retry_at.map_or(true, |at| now >= at)
    }
}

impl CoordinatorInner {
    /// Run checkpoint passes until one makes no progress
    pub(crate) fn run_checkpoints(&self) {
        loop {
            match self.checkpoint_pass(Instant::now()) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    debug!(target: "meridian::checkpoint", error = %e, "Checkpoint pass ended with failure");
                    break;
                }
            }
        }
    }

    /// How long until a pending retry becomes due, `None` without retries
    pub(crate) fn checkpoint_retry_delay(&self, now: Instant) -> Option<Duration> {
        let state = self.checkpoint.lock();
        if state.retry.is_empty() {
            return None;
        }
        let delay = state
            .next_retry_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default();
        Some(delay.max(Duration::from_millis(1)))
    }

    /// Process the work queued at the start of the pass
    ///
    /// Returns whether anything was checkpointed.
    pub(crate) fn checkpoint_pass(&self, now: Instant) -> Result<bool> {
        let mut state = self.checkpoint.lock();
        if !state.retry.is_empty() && !state.retry_due(now) {
            return Ok(false);
        }

        let total = state.retry.len() + self.checkpoint_queue.lock().len();
        let mut processed = 0;
        while processed < total {
            if self.is_shutting_down() {
                break;
            }
            let batch = self.next_batch(&mut state, (total - processed).min(MAX_CHECKPOINT_BATCH_SIZE));
            if batch.is_empty() {
                break;
            }
            processed += batch.len();

            match self.checkpoint_batch(&batch) {
                Ok(()) => {
                    if state.attempts >= self.config.checkpoint_stall_threshold {
                        info!(target: "meridian::checkpoint", attempts = state.attempts, "Stalled checkpoint batch recovered");
                    }
                    state.attempts = 0;
                    state.next_retry_at = None;
                    self.metrics.checkpoint_stalled.store(false, Ordering::Relaxed);
                }
                Err(e) => {
                    self.schedule_retry(&mut state, batch, &e);
                    return Err(e);
                }
            }
        }
        Ok(processed > 0)
    }

    fn next_batch(
        &self,
        state: &mut CheckpointState,
        limit: usize,
    ) -> Vec<Arc<TransactionEntry>> {
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            if let Some(entry) = state.retry.pop_front() {
                batch.push(entry);
            } else if let Some(entry) = pop_front(&self.checkpoint_queue) {
                batch.push(entry);
            } else {
                break;
            }
        }
        batch
    }

    fn schedule_retry(
        &self,
        state: &mut CheckpointState,
        batch: Vec<Arc<TransactionEntry>>,
        cause: &Error,
    ) {
        let batch_size = batch.len();
        for entry in batch.into_iter().rev() {
            state.retry.push_front(entry);
        }
        state.attempts = state.attempts.saturating_add(1);
        let backoff = self.config.checkpoint_retry_backoff(state.attempts);
        state.next_retry_at = Some(Instant::now() + backoff);
        CoordinatorMetrics::incr(&self.metrics.checkpoint_failures);

        if state.attempts >= self.config.checkpoint_stall_threshold {
            self.metrics.checkpoint_stalled.store(true, Ordering::Relaxed);
            error!(
                target: "meridian::checkpoint",
                attempts = state.attempts,
                batch_size,
                error = %cause,
                ?backoff,
                "Checkpoint batch stalled, log truncation is blocked"
            );
        } else {
            warn!(
                target: "meridian::checkpoint",
                attempts = state.attempts,
                batch_size,
                error = %cause,
                ?backoff,
                "Checkpoint batch failed, will retry"
            );
        }
    }

    fn checkpoint_batch(&self, batch: &[Arc<TransactionEntry>]) -> Result<()> {
        let mut targets: BTreeMap<ResourceId, TransactionId> = BTreeMap::new();
        let mut batch_lsn = 0;
        for entry in batch {
            let record = entry.lock();
            for resource in record.info.write_set.keys() {
                let highest = targets.entry(resource.clone()).or_insert(entry.id);
                *highest = (*highest).max(entry.id);
            }
            batch_lsn = batch_lsn.max(record.lsn);
        }

        if !targets.is_empty() {
            self.notify_resources(&targets)?;
        }

        let highest_active = self.allocator.highest_active_transaction_id();
        for entry in batch {
            let mut record = entry.lock();
            if record.state == TransactionState::Committed {
                record.transition(TransactionState::Checkpointed);
                record.highest_active_at_checkpoint = highest_active;
            }
        }
        self.checkpointed_lsn.fetch_max(batch_lsn, Ordering::AcqRel);
        CoordinatorMetrics::add(&self.metrics.checkpointed, batch.len());
        debug!(
            target: "meridian::checkpoint",
            batch_size = batch.len(),
            resources = targets.len(),
            checkpointed_lsn = batch_lsn,
            "Checkpoint batch complete"
        );
        Ok(())
    }

    /// Tell every resource to commit, in parallel; fails if any one fails
    fn notify_resources(&self, targets: &BTreeMap<ResourceId, TransactionId>) -> Result<()> {
        let targets: Vec<(&ResourceId, TransactionId)> =
            targets.iter().map(|(resource, id)| (resource, *id)).collect();

        if let [(resource, transaction_id)] = targets.as_slice() {
            return self.commit_resource(resource, *transaction_id);
        }

        let mut first_error = None;
        for chunk in targets.chunks(MAX_PARALLEL_RESOURCE_COMMITS) {
            let results: Vec<Result<()>> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|&(resource, transaction_id)| {
                        let handle =
                            scope.spawn(move || self.commit_resource(resource, transaction_id));
                        (resource, handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(resource, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            Err(Error::resource(resource.clone(), "commit panicked"))
                        })
                    })
                    .collect()
            });
            for result in results {
                if let Err(e) = result {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn commit_resource(&self, resource: &ResourceId, transaction_id: TransactionId) -> Result<()> {
        let handle = self
            .resources
            .resolve(resource)
            .ok_or_else(|| Error::resource(resource.clone(), "resource is not registered"))?;
        handle.commit(transaction_id)
    }
}

//! Transaction id allocation
//!
//! Ids are handed out from a window reserved in the log's start record. The
//! start record always holds an upper bound on every id ever issued, so a
//! restarted coordinator that begins at the start record can never reuse an
//! id. Reservation happens on a background thread ahead of demand; callers
//! only block when they outrun it.
//!
//! Three counters describe the window:
//!
//! - `smallest_active`: lowest id that may still be unresolved
//! - `highest_active`: last id handed out
//! - `max_allocated`: highest id covered by the durable start record

use crate::signal::StageSignal;
use meridian_core::{CoordinatorConfig, Error, Result, TransactionId};
use meridian_durability::TransactionLog;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause before retrying a failed start-record update
const ALLOCATION_RETRY_DELAY: Duration = Duration::from_millis(10);

struct AllocatorShared {
    smallest_active: AtomicU64,
    highest_active: AtomicU64,
    max_allocated: AtomicU64,
    batch_size: u64,
    threshold: u64,
    log: Arc<TransactionLog>,
    signal: StageSignal,
    running: AtomicBool,
    shutdown: AtomicBool,
}

impl AllocatorShared {
    fn needs_allocation(&self) -> bool {
        let max = self.max_allocated.load(Ordering::Acquire);
        let highest = self.highest_active.load(Ordering::Acquire);
        max.saturating_sub(highest) <= self.threshold
    }

    fn allocation_loop(&self) {
        while self.signal.wait(&self.shutdown, None) {
            while self.needs_allocation() && !self.shutdown.load(Ordering::Acquire) {
                let current = self.max_allocated.load(Ordering::Acquire);
                let next = current.saturating_add(self.batch_size);
                match self.log.update_start_record(next) {
                    Ok(()) => {
                        self.max_allocated.store(next, Ordering::Release);
                        debug!(
                            target: "meridian::alloc",
                            max_allocated = next,
                            "Reserved transaction id window"
                        );
                    }
                    Err(e) => {
                        warn!(
                            target: "meridian::alloc",
                            error = %e,
                            requested = next,
                            "Failed to persist start record, retrying"
                        );
                        thread::sleep(ALLOCATION_RETRY_DELAY);
                    }
                }
            }
        }
    }
}

/// Issues strictly increasing transaction ids backed by the start record
pub struct TransactionIdAllocator {
    shared: Arc<AllocatorShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionIdAllocator {
    /// Allocator over `log`; call [`start`](Self::start) before issuing ids
    pub fn new(log: Arc<TransactionLog>, config: &CoordinatorConfig) -> Self {
        Self {
            shared: Arc::new(AllocatorShared {
                smallest_active: AtomicU64::new(0),
                highest_active: AtomicU64::new(0),
                max_allocated: AtomicU64::new(0),
                batch_size: config.transaction_id_allocation_batch_size,
                threshold: config.available_transaction_id_threshold,
                log,
                signal: StageSignal::new(),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Begin issuing ids above `initial_transaction_id`
    ///
    /// `initial_transaction_id` is the start record read after recovery.
    /// The first id issued is `initial_transaction_id + 1`.
    pub fn start(&self, initial_transaction_id: TransactionId) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::invalid_operation(
                "transaction id allocator already started",
            ));
        }

        let shared = &self.shared;
        shared
            .smallest_active
            .store(initial_transaction_id + 1, Ordering::Release);
        shared
            .highest_active
            .store(initial_transaction_id, Ordering::Release);
        shared
            .max_allocated
            .store(initial_transaction_id, Ordering::Release);

        let loop_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("meridian-alloc".to_string())
            .spawn(move || loop_shared.allocation_loop())?;
        *worker = Some(handle);

        shared.running.store(true, Ordering::Release);
        shared.signal.notify();
        info!(
            target: "meridian::alloc",
            start_record = initial_transaction_id,
            "Transaction id allocator started"
        );
        Ok(())
    }

    /// Issue the next id
    ///
    /// Blocks (spinning with `yield_now`) while the reserved window is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` if the allocator is not running.
    pub fn new_transaction_id(&self) -> Result<TransactionId> {
        loop {
            if let Some(id) = self.try_new_transaction_id()? {
                return Ok(id);
            }
            self.wait_for_headroom()?;
        }
    }

    /// Issue the next id if the reserved window has room, without blocking
    ///
    /// Never issues an id above the durable start record, so an id that is
    /// returned is immediately usable.
    pub fn try_new_transaction_id(&self) -> Result<Option<TransactionId>> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let mut highest = shared.highest_active.load(Ordering::Acquire);
        loop {
            let max = shared.max_allocated.load(Ordering::Acquire);
            if highest >= max {
                shared.signal.notify();
                return Ok(None);
            }
            let id = highest + 1;
            match shared.highest_active.compare_exchange_weak(
                highest,
                id,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if max - id <= shared.threshold {
                        shared.signal.notify();
                    }
                    return Ok(Some(id));
                }
                Err(current) => highest = current,
            }
        }
    }

    /// Spin until the reserved window has room for another id
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once the allocator stops running.
    pub fn wait_for_headroom(&self) -> Result<()> {
        let shared = &self.shared;
        while shared.max_allocated.load(Ordering::Acquire)
            <= shared.highest_active.load(Ordering::Acquire)
        {
            if !shared.running.load(Ordering::Acquire) {
                return Err(Error::ShuttingDown);
            }
            shared.signal.notify();
            thread::yield_now();
        }
        Ok(())
    }

    /// Lowest id that may still be unresolved
    pub fn smallest_active_transaction_id(&self) -> TransactionId {
        self.shared.smallest_active.load(Ordering::Acquire)
    }

    /// Last id handed out
    pub fn highest_active_transaction_id(&self) -> TransactionId {
        self.shared.highest_active.load(Ordering::Acquire)
    }

    /// Highest id covered by the durable start record
    pub fn max_allocated_transaction_id(&self) -> TransactionId {
        self.shared.max_allocated.load(Ordering::Acquire)
    }

    /// Advance the smallest active id by one, returning the id passed over
    pub fn pop_smallest_active_transaction_id(&self) -> TransactionId {
        self.shared.smallest_active.fetch_add(1, Ordering::AcqRel)
    }

    /// Stop issuing ids and join the reservation thread. Idempotent.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        shared.running.store(false, Ordering::Release);
        if shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.signal.notify();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(target: "meridian::alloc", "Transaction id allocator thread panicked");
            }
        }
        debug!(target: "meridian::alloc", "Transaction id allocator stopped");
    }
}

impl Drop for TransactionIdAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

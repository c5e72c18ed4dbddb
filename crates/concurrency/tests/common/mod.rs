//! Shared helpers for coordinator integration tests

#![allow(dead_code)]

use meridian_concurrency::{
    ResourceRegistry, TransactionCoordinator, TransactionState, TransactionalResource,
};
use meridian_core::{CoordinatorConfig, Error, ResourceId, Result, TransactionId};
use meridian_durability::MemoryLogStorage;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(10);
pub const LONG: Duration = Duration::from_secs(600);

/// Small id windows, no background maintenance during the test
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        transaction_id_allocation_batch_size: 100,
        available_transaction_id_threshold: 20,
        transaction_record_preservation_ms: 0,
        log_maintenance_interval_ms: 3_600_000,
        checkpoint_retry_base_backoff_ms: 1,
        checkpoint_retry_max_backoff_ms: 5,
        checkpoint_stall_threshold: 3,
        ..CoordinatorConfig::default()
    }
}

pub fn start(storage: &MemoryLogStorage, registry: &Arc<ResourceRegistry>) -> TransactionCoordinator {
    start_with(storage, registry, test_config())
}

pub fn start_with(
    storage: &MemoryLogStorage,
    registry: &Arc<ResourceRegistry>,
    config: CoordinatorConfig,
) -> TransactionCoordinator {
    TransactionCoordinator::start(Box::new(storage.reopen()), registry.clone(), config).unwrap()
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn wait_for_state(
    coordinator: &TransactionCoordinator,
    transaction_id: TransactionId,
    state: TransactionState,
) -> bool {
    wait_until(|| coordinator.transaction_state(transaction_id) == Some(state))
}

/// Records every commit notification; can be told to fail
#[derive(Default)]
pub struct RecordingResource {
    commits: Mutex<Vec<TransactionId>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl RecordingResource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<TransactionId> {
        self.commits.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransactionalResource for RecordingResource {
    fn commit(&self, transaction_id: TransactionId) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::resource(ResourceId::new("recording"), "unavailable"));
        }
        self.commits.lock().push(transaction_id);
        Ok(())
    }
}

/// Blocks every commit notification until opened
#[derive(Default)]
pub struct GatedResource {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedResource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl TransactionalResource for GatedResource {
    fn commit(&self, _transaction_id: TransactionId) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        Ok(())
    }
}

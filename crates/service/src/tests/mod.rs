//! Test modules for the service crate.


use crate::TransactionService;
use meridian_concurrency::{ResourceRegistry, TransactionCoordinator};
use meridian_core::CoordinatorConfig;
use meridian_durability::MemoryLogStorage;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const LONG: Duration = Duration::from_secs(600);

pub(crate) fn service_over(storage: &MemoryLogStorage) -> TransactionService {
    let config = CoordinatorConfig {
        transaction_id_allocation_batch_size: 100,
        available_transaction_id_threshold: 10,
        transaction_record_preservation_ms: 0,
        log_maintenance_interval_ms: 3_600_000,
        ..CoordinatorConfig::default()
    };
    let coordinator = TransactionCoordinator::start(
        Box::new(storage.reopen()),
        Arc::new(ResourceRegistry::new()),
        config,
    )
    .unwrap();
    TransactionService::new(Arc::new(coordinator))
}

pub(crate) fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

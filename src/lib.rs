//! Meridian - in-process transaction coordinator
//!
//! Meridian issues transaction ids, tracks read dependencies between
//! transactions, makes commits durable through a group-committed
//! write-ahead log, and notifies the participating resources once a commit
//! is durable.
//!
//! # Quick Start
//!
//! ```ignore
//! use meridian::{
//!     CoordinatorConfig, FileLogStorage, ResourceRegistry, TransactionCoordinator,
//!     TransactionInfo,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let registry = Arc::new(ResourceRegistry::new());
//! registry.register("accounts", accounts_resource);
//!
//! let coordinator = TransactionCoordinator::start(
//!     Box::new(FileLogStorage::new("/var/lib/meridian")),
//!     registry,
//!     CoordinatorConfig::default(),
//! )?;
//!
//! let id = coordinator.start_transaction(Duration::from_secs(30))?;
//! coordinator.commit_transaction(TransactionInfo::new(id).with_write("accounts", 1))?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `meridian-core` | ids, statuses, abort reasons, errors, configuration |
//! | `meridian-durability` | commit records, log storage, write-ahead log |
//! | `meridian-concurrency` | id allocation, coordinator pipeline, resources |
//! | `meridian-service` | batched request façade for remote callers |
//!
//! Service-level types live under [`service`] because the service has its
//! own serializable `Error`.

pub use meridian_concurrency::{
    CoordinatorMetrics, MetricsReporter, MetricsSnapshot, RecoveryStats, ResourceDirectory,
    ResourceRegistry, TransactionCoordinator, TransactionIdAllocator, TransactionInfo,
    TransactionState, TransactionalResource,
};
pub use meridian_core::{
    AbortReason, CoordinatorConfig, Error, Lsn, ResourceId, Result, TransactionId,
    TransactionStatus, MAX_CHECKPOINT_BATCH_SIZE,
};
pub use meridian_durability::{
    CommitRecord, FileLogStorage, LogMode, LogStorage, MemoryLogStorage, TransactionLog,
};

/// Batched request façade
pub mod service {
    pub use meridian_service::*;
}

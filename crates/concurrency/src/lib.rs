//! Concurrency layer for Meridian
//!
//! This crate implements the transaction coordinator:
//! - TransactionIdAllocator: start-record backed id windows
//! - TransactionCoordinator: transaction table, dependency tracking,
//!   group commit, checkpointing and maintenance
//! - TransactionalResource / ResourceDirectory: commit notification targets
//! - CoordinatorMetrics / MetricsReporter: counters and periodic reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
mod checkpoint;
pub mod coordinator;
mod maintenance;
pub mod metrics;
mod pipeline;
pub mod resource;
mod signal;
mod tombstone;
pub mod transaction;

pub use allocator::TransactionIdAllocator;
pub use coordinator::{RecoveryStats, TransactionCoordinator};
pub use metrics::{CoordinatorMetrics, MetricsReporter, MetricsSnapshot};
pub use resource::{ResourceDirectory, ResourceRegistry, TransactionalResource};
pub use transaction::{TransactionInfo, TransactionState, MAX_TRANSACTION_TIMEOUT};

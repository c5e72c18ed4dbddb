//! Durability layer for Meridian
//!
//! This crate handles everything that must survive a crash:
//!
//! - CommitRecord: The unit persisted per committed transaction
//! - LogStorage: Contract for the durable record store
//! - TransactionLog: Recovery→Append mode state machine over a storage
//! - MemoryLogStorage: Shared in-memory storage with fault injection
//! - FileLogStorage: Directory-backed storage with checksummed batch frames

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file_storage;
pub mod memory;
pub mod record;
pub mod storage;
pub mod transaction_log;

pub use file_storage::FileLogStorage;
pub use memory::MemoryLogStorage;
pub use record::CommitRecord;
pub use storage::LogStorage;
pub use transaction_log::{LogMode, TransactionLog};

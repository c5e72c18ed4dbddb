//! Core types and traits for Meridian
//!
//! This crate defines the foundational types used throughout the system:
//! - TransactionId / Lsn: Identifier and log position aliases
//! - ResourceId: Identity of a transactional resource
//! - TransactionStatus: Caller-visible transaction outcome
//! - AbortReason: Abort cause taxonomy
//! - Error: Error type hierarchy
//! - CoordinatorConfig: Recognized configuration options

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abort;
pub mod config;
pub mod error;
pub mod types;

pub use abort::AbortReason;
pub use config::{CoordinatorConfig, MAX_CHECKPOINT_BATCH_SIZE};
pub use error::{Error, Result};
pub use types::{Lsn, ResourceId, TransactionId, TransactionStatus};

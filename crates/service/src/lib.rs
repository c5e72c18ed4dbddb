//! # Meridian Service
//!
//! Batched request surface for remote callers of the transaction
//! coordinator. Transport is out of scope: requests and responses are plain
//! serializable values.
//!
//! | Operation | Coordinator calls |
//! |-----------|-------------------|
//! | `start_transactions` | one `start_transaction` per timeout |
//! | `commit_transactions` | one `commit_transaction` per info, one status lookup per query |
//! | `abort_transaction` | `abort_transaction` |
//!
//! The same operations are available as [`Command`] values through
//! [`TransactionService::execute`].

#![warn(missing_docs)]

mod command;
mod error;
mod metrics;
mod output;
mod service;
mod types;

#[cfg(test)]
mod tests;

pub use command::Command;
pub use error::{Error, Result};
pub use metrics::{ServiceMetrics, ServiceMetricsSnapshot};
pub use output::Output;
pub use service::TransactionService;
pub use types::{CommitResult, CommitTransactionsResponse, StartTransactionsResponse};

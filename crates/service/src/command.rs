//! Serializable service commands
//!
//! Every operation a remote caller can perform is one variant here, so a
//! transport only has to move `Command`/`Output` values.

use meridian_concurrency::TransactionInfo;
use meridian_core::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A self-contained service request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start one transaction per timeout
    StartTransactions {
        /// Per-transaction timeouts in milliseconds
        timeouts_ms: Vec<u64>,
    },
    /// Submit commits and ask for the outcome of earlier ones
    CommitTransactions {
        /// Transactions to commit
        transactions: Vec<TransactionInfo>,
        /// Ids whose outcome the caller is waiting for
        #[serde(default)]
        status_queries: BTreeSet<TransactionId>,
    },
    /// Abort a transaction
    AbortTransaction {
        /// Transaction to abort
        transaction_id: TransactionId,
        /// Caller-supplied cause
        cause: String,
    },
}

impl Command {
    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartTransactions { .. } => "start_transactions",
            Command::CommitTransactions { .. } => "commit_transactions",
            Command::AbortTransaction { .. } => "abort_transaction",
        }
    }
}

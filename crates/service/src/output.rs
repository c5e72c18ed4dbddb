//! Serializable command results

use crate::types::{CommitTransactionsResponse, StartTransactionsResponse};
use serde::{Deserialize, Serialize};

/// Successful result of a [`Command`](crate::Command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Output {
    /// Result of `StartTransactions`
    Started(StartTransactionsResponse),
    /// Result of `CommitTransactions`
    Committed(CommitTransactionsResponse),
    /// Command with no result
    Unit,
}

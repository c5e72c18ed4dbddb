//! Request and response types of the service surface
//!
//! All types are plain serializable data so a transport layer can ship them
//! without knowing anything about the coordinator.

use meridian_core::{AbortReason, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a batched start request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTransactionsResponse {
    /// One id per requested timeout, in request order
    pub transaction_ids: Vec<TransactionId>,
    /// Highest id at which every transaction is resolved
    pub read_only_transaction_id: TransactionId,
    /// Ids at or below this are committed or must be treated as aborted
    pub abort_lower_bound: TransactionId,
}

/// Outcome of one transaction in a commit response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    /// Durably committed
    pub success: bool,
    /// Known abort cause; `None` on success and for unknown transactions
    pub abort_reason: Option<AbortReason>,
}

impl CommitResult {
    /// A committed transaction
    pub fn committed() -> Self {
        Self {
            success: true,
            abort_reason: None,
        }
    }

    /// A transaction aborted for `reason`
    pub fn aborted(reason: AbortReason) -> Self {
        Self {
            success: false,
            abort_reason: Some(reason),
        }
    }

    /// A transaction the coordinator knows nothing about
    pub fn unknown() -> Self {
        Self {
            success: false,
            abort_reason: None,
        }
    }
}

/// Result of a batched commit request
///
/// Transactions still in progress are absent from `results`; callers ask
/// again later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTransactionsResponse {
    /// Resolved outcomes keyed by transaction id
    pub results: BTreeMap<TransactionId, CommitResult>,
    /// Highest id at which every transaction is resolved
    pub read_only_transaction_id: TransactionId,
    /// Ids at or below this are committed or must be treated as aborted
    pub abort_lower_bound: TransactionId,
}

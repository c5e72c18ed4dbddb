//! Abort causes
//!
//! Every aborted transaction carries exactly one `AbortReason`. Reasons are
//! recorded on the transaction and surfaced through status queries; they are
//! never thrown across the commit pipeline.

use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a transaction was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum AbortReason {
    /// Explicit abort requested by the caller
    #[error("transaction {transaction_id} aborted: {cause}")]
    Requested {
        /// Aborted transaction
        transaction_id: TransactionId,
        /// Caller-supplied cause
        cause: String,
    },

    /// A transaction this one depends on aborted
    #[error("transaction {transaction_id} aborted because dependency {dependency_id} aborted")]
    Cascading {
        /// Aborted transaction
        transaction_id: TransactionId,
        /// The upstream transaction whose abort triggered this one
        dependency_id: TransactionId,
    },

    /// A dependency is not in the transaction table (presumed aborted)
    #[error("transaction {transaction_id} aborted because dependency {dependency_id} is unknown")]
    MissingDependency {
        /// Aborted transaction
        transaction_id: TransactionId,
        /// The dependency that could not be found
        dependency_id: TransactionId,
    },

    /// The transaction was neither committed nor aborted before it expired
    #[error("transaction {transaction_id} timed out")]
    Timeout {
        /// Expired transaction
        transaction_id: TransactionId,
    },

    /// The coordinator has no record of the transaction
    #[error("transaction {transaction_id} presumed aborted")]
    PresumedAborted {
        /// Unknown transaction
        transaction_id: TransactionId,
    },
}

impl AbortReason {
    /// The transaction this reason applies to
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            AbortReason::Requested { transaction_id, .. }
            | AbortReason::Cascading { transaction_id, .. }
            | AbortReason::MissingDependency { transaction_id, .. }
            | AbortReason::Timeout { transaction_id }
            | AbortReason::PresumedAborted { transaction_id } => *transaction_id,
        }
    }

    /// The upstream transaction that caused this abort, if any
    pub fn upstream(&self) -> Option<TransactionId> {
        match self {
            AbortReason::Cascading { dependency_id, .. }
            | AbortReason::MissingDependency { dependency_id, .. } => Some(*dependency_id),
            _ => None,
        }
    }

    /// Convenience constructor for caller-requested aborts
    pub fn requested(transaction_id: TransactionId, cause: impl Into<String>) -> Self {
        AbortReason::Requested {
            transaction_id,
            cause: cause.into(),
        }
    }
}

//! Service errors
//!
//! Unlike the coordinator's error type these are plain data: they cross the
//! service boundary and must serialize. Per-transaction aborts are not
//! errors at this level; they are reported inside commit results.

use serde::{Deserialize, Serialize};

/// Errors returned by [`TransactionService`](crate::TransactionService)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    /// The coordinator stopped accepting commits after a fatal log failure
    #[error("coordinator failed: {reason}")]
    CoordinatorFailed {
        /// Description of the failure
        reason: String,
    },

    /// The coordinator is shutting down
    #[error("coordinator is shutting down")]
    ShuttingDown,

    /// The request itself is malformed
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with it
        reason: String,
    },

    /// Any other coordinator failure
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the failure
        reason: String,
    },
}

impl From<meridian_core::Error> for Error {
    fn from(e: meridian_core::Error) -> Self {
        match e {
            meridian_core::Error::CoordinatorFailed(reason) => Error::CoordinatorFailed { reason },
            meridian_core::Error::ShuttingDown => Error::ShuttingDown,
            meridian_core::Error::InvalidOperation(reason) => Error::InvalidRequest { reason },
            other => Error::Internal {
                reason: other.to_string(),
            },
        }
    }
}

/// Service result alias
pub type Result<T> = std::result::Result<T, Error>;

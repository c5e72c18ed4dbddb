//! Error types for the coordinator
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::abort::AbortReason;
use crate::types::{ResourceId, TransactionId};
use std::io;
use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the coordinator
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a storage implementation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected in durable state
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Operation invoked in the wrong mode or violating a contract
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transaction was (or is presumed) aborted
    #[error("Transaction {transaction_id} aborted: {reason}")]
    TransactionAborted {
        /// The aborted transaction
        transaction_id: TransactionId,
        /// Recorded cause
        reason: AbortReason,
    },

    /// Appending a commit batch to the log failed; outcome is unknown
    #[error("Log append failed: {0}")]
    LogAppend(String),

    /// A transactional resource failed to acknowledge a commit
    #[error("Resource {resource} failed: {message}")]
    Resource {
        /// Failing resource
        resource: ResourceId,
        /// Failure description
        message: String,
    },

    /// The coordinator hit an unrecoverable failure and needs a restart
    #[error("Coordinator failed: {0}")]
    CoordinatorFailed(String),

    /// The component is shutting down
    #[error("Shutting down")]
    ShuttingDown,
}

impl Error {
    /// Build an `InvalidOperation` error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Build a `Resource` error
    pub fn resource(resource: ResourceId, msg: impl Into<String>) -> Self {
        Error::Resource {
            resource,
            message: msg.into(),
        }
    }

    /// The abort reason, if this error reports an aborted transaction
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Error::TransactionAborted { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<AbortReason> for Error {
    fn from(reason: AbortReason) -> Self {
        Error::TransactionAborted {
            transaction_id: reason.transaction_id(),
            reason,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

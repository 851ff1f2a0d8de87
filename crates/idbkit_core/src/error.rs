//! Error types for idbkit core.

use idbkit_host::HostError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in idbkit core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The host refused or failed to open the database.
    #[error("cannot open database {name}: {reason}")]
    OpenFailed {
        /// Database name.
        name: String,
        /// Host-reported reason.
        reason: String,
    },

    /// A lookup matched nothing.
    #[error("item {key} not exist")]
    NotFound {
        /// The key or index value looked up, as rendered in the log.
        key: String,
    },

    /// A mutating transaction failed, after the update fallback where one
    /// applies.
    #[error("failed transaction in {name}: {reason}")]
    TransactionFailed {
        /// Database name.
        name: String,
        /// Host-reported reason.
        reason: String,
    },

    /// A flush found no send authorization. The records were discarded.
    #[error("forbidden send data ({discarded} records discarded)")]
    Forbidden {
        /// Number of records dropped by the flush.
        discarded: usize,
    },

    /// The transport rejected the flushed payload.
    #[error("transport failed: {reason}")]
    TransportFailed {
        /// Transport-reported reason.
        reason: String,
    },

    /// Error reported by a host collaborator.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// The database descriptor is unusable.
    #[error("invalid descriptor: {message}")]
    InvalidDescriptor {
        /// What is wrong with it.
        message: String,
    },

    /// Invalid operation or configuration.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the problem.
        message: String,
    },

    /// A completion was dropped without delivering a result.
    #[error("completion dropped before a result was delivered")]
    CompletionDropped,
}

impl CoreError {
    /// Creates an open failure error.
    pub fn open_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::OpenFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(key: impl ToString) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    /// Creates a transaction failure error.
    pub fn transaction_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransactionFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a transport failure error.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Self::TransportFailed {
            reason: reason.into(),
        }
    }

    /// Creates an invalid descriptor error.
    pub fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns false for outcomes callers are expected to absorb: a lookup
    /// that matched nothing and an unauthorized flush.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::NotFound { .. } | CoreError::Forbidden { .. })
    }
}

//! Error types for host operations.

use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors reported by a host collaborator.
///
/// Hosts report failures through callbacks, so errors are cloned into
/// every party waiting on the same outcome (a request and its transaction).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A write violated a key or unique-index constraint.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A database, collection, index or stored item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested schema version is older than the stored one.
    #[error("version error: requested {requested}, stored {stored}")]
    Version {
        /// Version passed to open.
        requested: u32,
        /// Version currently stored by the host.
        stored: u32,
    },

    /// The host refused to open the database.
    #[error("access denied: {0}")]
    Denied(String),

    /// The transaction or request was aborted.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// A value could not be converted to or from a record.
    #[error("data error: {0}")]
    Data(String),

    /// The host capability is not available in this environment.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An exception thrown by the JavaScript host.
    #[error("JS error: {0}")]
    Js(String),
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::Data(err.to_string())
    }
}

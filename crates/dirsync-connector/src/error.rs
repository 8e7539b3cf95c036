//! Directory error types.
//!
//! Transport failures are kept distinguishable from "no matching entry" so
//! callers can treat the former as fatal and the latter as ordinary data.

use thiserror::Error;

/// Error that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Failed to establish or use the connection to the directory.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The directory rejected the bind credentials.
    #[error("authentication failed: invalid bind credentials")]
    AuthenticationFailed,

    /// Operation timed out.
    #[error("operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The named entry does not exist. Not a transport failure.
    #[error("no such entry: {dn}")]
    NoSuchEntry { dn: String },

    /// An add targeted a DN that already exists.
    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    /// The directory refused or failed the operation.
    #[error("operation failed on {dn}: {message}")]
    OperationFailed { dn: String, message: String },

    /// Failure writing to the manifest or monitoring sink.
    #[error("sink write failed: {message}")]
    SinkWrite {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DirectoryError {
    /// Check whether this is the "no matching entry" outcome rather than a
    /// transport or server failure.
    #[must_use]
    pub fn is_no_such_entry(&self) -> bool {
        matches!(self, DirectoryError::NoSuchEntry { .. })
    }

    /// Check if this error indicates the directory itself is unusable
    /// (connection, authentication, timeout) as opposed to a per-entry
    /// failure.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DirectoryError::ConnectionFailed { .. }
                | DirectoryError::AuthenticationFailed
                | DirectoryError::Timeout { .. }
        )
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(dn: impl Into<String>, message: impl Into<String>) -> Self {
        DirectoryError::OperationFailed {
            dn: dn.into(),
            message: message.into(),
        }
    }

    /// Create a no-such-entry error.
    pub fn no_such_entry(dn: impl Into<String>) -> Self {
        DirectoryError::NoSuchEntry { dn: dn.into() }
    }

    /// Create a sink write error.
    pub fn sink_write(message: impl Into<String>) -> Self {
        DirectoryError::SinkWrite {
            message: message.into(),
            source: None,
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

//! Engine error types.
//!
//! Errors split into two severities: fatal errors abort the run before any
//! mutation (unreachable directory, bad configuration, unusable audit sink),
//! while entry-level errors skip the affected entry, are logged, and count
//! against run success. Policy gates (thresholds, exceptions, country
//! control) are decision outcomes, not errors.

use thiserror::Error;

use dirsync_connector::entry::SourceSystem;
use dirsync_connector::error::DirectoryError;

use crate::allocator::IdClass;

/// Error that can occur during a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A directory snapshot could not be fetched. Fatal: no partial
    /// reconciliation against stale data.
    #[error("fetching from the {source} directory failed: {error}")]
    Fetch {
        source: SourceSystem,
        #[source]
        error: DirectoryError,
    },

    /// The configuration is malformed or self-contradictory.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The audit manifest could not be written. Fatal before apply: no
    /// mutation may proceed without its audit record.
    #[error("manifest write failed: {0}")]
    Manifest(#[source] DirectoryError),

    /// An attribute expected to be single-valued carried multiple values.
    #[error("multi-valued attribute '{attribute}' on entry '{identifier}'")]
    MultiValuedAttribute {
        identifier: String,
        attribute: String,
    },

    /// No identifier is available at or above the configured floor.
    #[error("identifier space exhausted for {class}")]
    IdentifierSpaceExhausted { class: IdClass },

    /// A credential could not be produced under the configured policy.
    #[error("credential generation failed: {message}")]
    Credential { message: String },

    /// Group nesting exceeded the configured depth cap.
    #[error("nesting depth {depth} exceeded while expanding group '{group}'")]
    NestingDepthExceeded { group: String, depth: u32 },
}

impl SyncError {
    /// Check whether this error aborts the whole run rather than a single
    /// entry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch { .. } | SyncError::InvalidConfiguration { .. } | SyncError::Manifest(_)
        )
    }

    /// Create an invalid-configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        SyncError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a credential error.
    pub fn credential(message: impl Into<String>) -> Self {
        SyncError::Credential {
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

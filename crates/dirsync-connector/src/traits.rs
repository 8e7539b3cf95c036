//! Directory client capability trait.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::entry::{AttrValue, DirectoryEntry, SourceSystem};
use crate::error::DirectoryResult;
use crate::filter::{SearchFilter, SearchScope};
use crate::operation::Modification;

/// Capability interface to one directory.
///
/// Implementations wrap a wire protocol (or, for tests, an in-memory store).
/// Transport errors must be distinguishable from "no matching entry":
/// `search` returns an empty vector for the latter, and mutation operations
/// return [`DirectoryError::NoSuchEntry`] rather than a transport error when
/// the target does not exist.
///
/// [`DirectoryError::NoSuchEntry`]: crate::error::DirectoryError::NoSuchEntry
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Which directory this client talks to.
    fn source(&self) -> SourceSystem;

    /// Search for entries under `base`.
    ///
    /// `attributes` selects which attributes to return; an empty slice means
    /// all attributes.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &SearchFilter,
        attributes: &[&str],
    ) -> DirectoryResult<Vec<DirectoryEntry>>;

    /// Create a new entry.
    async fn add(
        &self,
        dn: &str,
        object_classes: &[String],
        attributes: &BTreeMap<String, AttrValue>,
    ) -> DirectoryResult<()>;

    /// Apply attribute modifications to an existing entry.
    async fn modify(&self, dn: &str, changes: &[Modification]) -> DirectoryResult<()>;

    /// Remove an entry.
    async fn delete(&self, dn: &str) -> DirectoryResult<()>;

    /// Compare an attribute of an entry against a value.
    async fn compare(&self, dn: &str, attribute: &str, value: &str) -> DirectoryResult<bool>;
}

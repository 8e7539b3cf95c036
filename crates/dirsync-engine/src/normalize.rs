//! Attribute normalization and comparison.
//!
//! Values are canonicalized once at ingestion (see
//! [`AttrValue::canonicalize`]), so comparison works on scalars. Name and
//! text attributes compare through a transliterated (diacritic-folded) view
//! of both sides: a primary value of "Bøs" equals a dependent value of
//! "Bos" when folding is the only difference. The propagated value is
//! always the primary's original, unless the destination attribute is
//! designated ASCII-only, in which case the folded form is written.

use deunicode::deunicode;
use tracing::instrument;

use dirsync_connector::entry::{AttrValue, DirectoryEntry};

use crate::changeset::ChangeSet;
use crate::config::AttributeMapping;
use crate::error::{SyncError, SyncResult};

/// Outcome of comparing one attribute across directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    /// The sides agree; nothing to do.
    Equal,
    /// The sides differ; propagate this value to the dependent directory.
    Propagate(String),
}

/// Transliterate a value to its ASCII folding.
#[must_use]
pub fn fold(value: &str) -> String {
    deunicode(value)
}

/// View a canonical attribute value as an optional scalar.
///
/// Multi-valued attributes cannot be diffed scalar-wise; encountering one is
/// an entry-level error so the entry is skipped rather than mis-synced.
fn scalar_view<'a>(
    identifier: &str,
    attribute: &str,
    value: &'a AttrValue,
) -> SyncResult<Option<&'a str>> {
    match value {
        AttrValue::Absent => Ok(None),
        AttrValue::Scalar(s) if s.is_empty() => Ok(None),
        AttrValue::Scalar(s) => Ok(Some(s)),
        AttrValue::List(values) => match values.len() {
            0 => Ok(None),
            1 => Ok(Some(&values[0])),
            _ => Err(SyncError::MultiValuedAttribute {
                identifier: identifier.to_string(),
                attribute: attribute.to_string(),
            }),
        },
    }
}

/// Compare a source attribute value against its destination counterpart.
///
/// Both sides absent is equality. An absent source never propagates; the
/// authoritative side not carrying a value is not a reason to clear the
/// dependent one.
pub fn compare_attr(
    identifier: &str,
    attribute: &str,
    source: &AttrValue,
    destination: &AttrValue,
    ascii_only: bool,
) -> SyncResult<Comparison> {
    let src = scalar_view(identifier, attribute, source)?;
    let dst = scalar_view(identifier, attribute, destination)?;
    let Some(src) = src else {
        return Ok(Comparison::Equal);
    };
    let equal = match dst {
        Some(dst) => fold(src) == fold(dst),
        None => false,
    };
    if equal {
        return Ok(Comparison::Equal);
    }
    let value = if ascii_only {
        fold(src)
    } else {
        src.to_string()
    };
    Ok(Comparison::Propagate(value))
}

/// Attribute-by-attribute differ for one paired identity.
#[derive(Debug, Clone, Copy)]
pub struct EntryDiffer<'a> {
    mapping: &'a AttributeMapping,
}

impl<'a> EntryDiffer<'a> {
    /// Create a differ over the run's attribute mapping.
    #[must_use]
    pub fn new(mapping: &'a AttributeMapping) -> Self {
        Self { mapping }
    }

    /// Compute the minimal changeset aligning the dependent entry with the
    /// primary one.
    ///
    /// Remote-synced attributes resolve first; local copies within the
    /// dependent directory run afterwards and read any value the remote
    /// pass already decided to write, so a freshly synced source field is
    /// mirrored in the same run.
    #[instrument(skip_all, fields(identifier = %primary.identifier))]
    pub fn diff_pair(
        &self,
        primary: &DirectoryEntry,
        dependent: &DirectoryEntry,
    ) -> SyncResult<ChangeSet> {
        let mut changes = ChangeSet::new();
        for (src_attr, dst_attr) in &self.mapping.remote_synced_attrs {
            if self.mapping.not_synced_attrs.contains(src_attr) {
                continue;
            }
            let ascii_only = self.mapping.ascii_only_attrs.contains(dst_attr);
            match compare_attr(
                &primary.identifier,
                src_attr,
                primary.attr(src_attr),
                dependent.attr(dst_attr),
                ascii_only,
            )? {
                Comparison::Equal => {}
                Comparison::Propagate(value) => changes.set(dst_attr.clone(), value),
            }
        }
        for (src_attr, dst_attr) in &self.mapping.local_copy_attrs {
            let pending = changes.get(src_attr).map(AttrValue::from);
            let source_value = pending.unwrap_or_else(|| dependent.attr(src_attr).clone());
            let ascii_only = self.mapping.ascii_only_attrs.contains(dst_attr);
            match compare_attr(
                &dependent.identifier,
                src_attr,
                &source_value,
                dependent.attr(dst_attr),
                ascii_only,
            )? {
                Comparison::Equal => {}
                Comparison::Propagate(value) => changes.set(dst_attr.clone(), value),
            }
        }
        Ok(changes)
    }
}

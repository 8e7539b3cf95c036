//! Minimal per-entry attribute changesets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use dirsync_connector::entry::DirectoryEntry;
use dirsync_connector::operation::Modification;

/// The minimal set of dependent-directory attribute mutations needed to
/// align one entry. An empty changeset means no operation is needed.
///
/// Only attributes named by the run's attribute mapping or the account
/// state masks appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: BTreeMap<String, String>,
}

impl ChangeSet {
    /// Create an empty changeset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the new value for an attribute.
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<String>) {
        self.changes.insert(attribute.into(), value.into());
    }

    /// Get the pending value for an attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.changes.get(attribute).map(String::as_str)
    }

    /// Check whether an attribute has a pending change.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.changes.contains_key(attribute)
    }

    /// Check whether there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterate over pending changes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.changes.iter()
    }

    /// Convert into replace modifications for a modify operation.
    #[must_use]
    pub fn to_modifications(&self) -> Vec<Modification> {
        self.changes
            .iter()
            .map(|(attr, value)| Modification::replace(attr.clone(), value.clone()))
            .collect()
    }

    /// Apply the pending changes to an entry.
    ///
    /// Re-diffing the updated entry yields an empty changeset; the
    /// idempotence tests lean on this.
    pub fn apply_to(&self, entry: &mut DirectoryEntry) {
        for (attr, value) in &self.changes {
            entry.set_attr(attr.clone(), value.clone());
        }
    }
}

impl IntoIterator for ChangeSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_connector::entry::{ObjectKind, SourceSystem};
    use dirsync_connector::operation::ModifyOp;

    #[test]
    fn test_empty_means_no_operation() {
        let cs = ChangeSet::new();
        assert!(cs.is_empty());
        assert!(cs.to_modifications().is_empty());
    }

    #[test]
    fn test_to_modifications_are_replaces() {
        let mut cs = ChangeSet::new();
        cs.set("gecos", "John Doe");
        cs.set("loginShell", "/bin/bash");

        let mods = cs.to_modifications();
        assert_eq!(mods.len(), 2);
        assert!(mods.iter().all(|m| m.op == ModifyOp::Replace));
    }

    #[test]
    fn test_apply_to_updates_entry() {
        let mut entry = DirectoryEntry::new(
            "uid=johnd,ou=People,dc=example,dc=com",
            "johnd",
            ObjectKind::User,
            SourceSystem::Dependent,
        );
        let mut cs = ChangeSet::new();
        cs.set("gecos", "John Doe");
        cs.apply_to(&mut entry);
        assert_eq!(entry.attr_str("gecos"), Some("John Doe"));
    }
}

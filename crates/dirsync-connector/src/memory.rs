//! In-memory directory.
//!
//! Backs the engine test suites. Behaves like a small LDAP server: searches
//! evaluate structured filters against stored entries, mutations distinguish
//! "no such entry" from other failures, and a failure switch simulates an
//! unreachable directory for fatal-path tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::entry::{AttrValue, DirectoryEntry, ObjectKind, SourceSystem};
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::{SearchFilter, SearchScope};
use crate::operation::{Modification, ModifyOp};
use crate::traits::DirectoryClient;

/// In-memory implementation of [`DirectoryClient`].
pub struct MemoryDirectory {
    source: SourceSystem,
    entries: Mutex<BTreeMap<String, DirectoryEntry>>,
    fail_searches: AtomicBool,
}

impl MemoryDirectory {
    /// Create an empty directory for the given source system.
    #[must_use]
    pub fn new(source: SourceSystem) -> Self {
        Self {
            source,
            entries: Mutex::new(BTreeMap::new()),
            fail_searches: AtomicBool::new(false),
        }
    }

    /// Insert an entry directly, bypassing the client interface.
    pub fn seed(&self, entry: DirectoryEntry) {
        self.lock().insert(entry.dn.to_lowercase(), entry);
    }

    /// Fetch a stored entry by DN.
    #[must_use]
    pub fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.lock().get(&dn.to_lowercase()).cloned()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the directory holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Make every subsequent search fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_searches.store(unreachable, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DirectoryEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
        let dn = dn.to_lowercase();
        let base = base.to_lowercase();
        match scope {
            SearchScope::Base => dn == base,
            SearchScope::OneLevel => dn
                .split_once(',')
                .is_some_and(|(_, parent)| parent.trim_start() == base),
            SearchScope::Subtree => dn == base || dn.ends_with(&format!(",{base}")),
        }
    }

    fn project(entry: &DirectoryEntry, attributes: &[&str]) -> DirectoryEntry {
        if attributes.is_empty() || attributes.contains(&"*") {
            return entry.clone();
        }
        let mut projected = entry.clone();
        projected
            .attributes
            .retain(|name, _| attributes.iter().any(|a| a.eq_ignore_ascii_case(name)));
        projected
    }

    fn kind_from_classes(object_classes: &[String]) -> ObjectKind {
        let group_classes = ["group", "posixgroup", "groupofnames"];
        if object_classes
            .iter()
            .any(|c| group_classes.contains(&c.to_lowercase().as_str()))
        {
            ObjectKind::Group
        } else {
            ObjectKind::User
        }
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    fn source(&self) -> SourceSystem {
        self.source
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &SearchFilter,
        attributes: &[&str],
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(DirectoryError::connection_failed("directory unreachable"));
        }
        let entries = self.lock();
        let hits: Vec<DirectoryEntry> = entries
            .values()
            .filter(|e| Self::in_scope(&e.dn, base, scope) && filter.matches(e))
            .map(|e| Self::project(e, attributes))
            .collect();
        debug!(base, source = %self.source, found = hits.len(), "Memory directory search");
        Ok(hits)
    }

    async fn add(
        &self,
        dn: &str,
        object_classes: &[String],
        attributes: &BTreeMap<String, AttrValue>,
    ) -> DirectoryResult<()> {
        let mut entries = self.lock();
        let key = dn.to_lowercase();
        if entries.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists { dn: dn.to_string() });
        }
        let identifier = attributes
            .get("uid")
            .or_else(|| attributes.get("cn"))
            .and_then(AttrValue::as_scalar)
            .unwrap_or(dn)
            .to_string();
        let mut entry = DirectoryEntry::new(
            dn,
            identifier,
            Self::kind_from_classes(object_classes),
            self.source,
        );
        entry.set_attr("objectClass", object_classes.to_vec());
        for (name, value) in attributes {
            entry.set_attr(name.clone(), value.clone());
        }
        entries.insert(key, entry);
        Ok(())
    }

    async fn modify(&self, dn: &str, changes: &[Modification]) -> DirectoryResult<()> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(&dn.to_lowercase())
            .ok_or_else(|| DirectoryError::no_such_entry(dn))?;
        for change in changes {
            let current: Vec<String> = entry.attr(&change.attribute).values().to_vec();
            let next = match change.op {
                ModifyOp::Replace => change.values.clone(),
                ModifyOp::AddValues => {
                    let mut merged = current;
                    for v in &change.values {
                        if !merged.contains(v) {
                            merged.push(v.clone());
                        }
                    }
                    merged
                }
                ModifyOp::DeleteValues => current
                    .into_iter()
                    .filter(|v| !change.values.contains(v))
                    .collect(),
            };
            if next.is_empty() {
                entry.attributes.remove(&change.attribute);
            } else {
                entry.set_attr(change.attribute.clone(), AttrValue::from_values(next));
            }
        }
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        let mut entries = self.lock();
        entries
            .remove(&dn.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| DirectoryError::no_such_entry(dn))
    }

    async fn compare(&self, dn: &str, attribute: &str, value: &str) -> DirectoryResult<bool> {
        let entries = self.lock();
        let entry = entries
            .get(&dn.to_lowercase())
            .ok_or_else(|| DirectoryError::no_such_entry(dn))?;
        Ok(entry
            .attr(attribute)
            .values()
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(dn: &str, uid: &str) -> DirectoryEntry {
        DirectoryEntry::new(dn, uid, ObjectKind::User, SourceSystem::Dependent)
            .with_attr("objectClass", vec!["top", "posixAccount"])
            .with_attr("uid", uid)
    }

    #[tokio::test]
    async fn test_search_by_object_class() {
        let dir = MemoryDirectory::new(SourceSystem::Dependent);
        dir.seed(user("uid=johnd,ou=People,dc=example,dc=com", "johnd"));
        dir.seed(user("uid=janed,ou=People,dc=example,dc=com", "janed"));

        let hits = dir
            .search(
                "ou=People,dc=example,dc=com",
                SearchScope::Subtree,
                &SearchFilter::eq("objectClass", "posixAccount"),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_search_scopes_bases() {
        let dir = MemoryDirectory::new(SourceSystem::Dependent);
        dir.seed(user("uid=johnd,ou=People,dc=example,dc=com", "johnd"));

        let other_base = dir
            .search(
                "ou=Group,dc=example,dc=com",
                SearchScope::Subtree,
                &SearchFilter::present("uid"),
                &[],
            )
            .await
            .unwrap();
        assert!(other_base.is_empty());
    }

    #[tokio::test]
    async fn test_attribute_projection() {
        let dir = MemoryDirectory::new(SourceSystem::Dependent);
        dir.seed(
            user("uid=johnd,ou=People,dc=example,dc=com", "johnd").with_attr("gecos", "John Doe"),
        );

        let hits = dir
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                &SearchFilter::eq("uid", "johnd"),
                &["uid"],
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].attr("gecos").is_absent());
        assert_eq!(hits[0].attr_str("uid"), Some("johnd"));
    }

    #[tokio::test]
    async fn test_add_then_modify_then_delete() {
        let dir = MemoryDirectory::new(SourceSystem::Dependent);
        let dn = "uid=new,ou=People,dc=example,dc=com";
        let mut attrs = BTreeMap::new();
        attrs.insert("uid".to_string(), AttrValue::from("new"));

        dir.add(dn, &["top".to_string(), "posixAccount".to_string()], &attrs)
            .await
            .unwrap();
        assert!(matches!(
            dir.add(dn, &[], &attrs).await,
            Err(DirectoryError::AlreadyExists { .. })
        ));

        dir.modify(dn, &[Modification::replace("gecos", "New User")])
            .await
            .unwrap();
        assert!(dir.compare(dn, "gecos", "New User").await.unwrap());

        dir.delete(dn).await.unwrap();
        assert!(dir.delete(dn).await.unwrap_err().is_no_such_entry());
    }

    #[tokio::test]
    async fn test_modify_add_and_delete_values() {
        let dir = MemoryDirectory::new(SourceSystem::Dependent);
        dir.seed(
            DirectoryEntry::new(
                "cn=hr,ou=Group,dc=example,dc=com",
                "hr",
                ObjectKind::Group,
                SourceSystem::Dependent,
            )
            .with_attr("memberUid", vec!["johnd", "janed"]),
        );

        dir.modify(
            "cn=hr,ou=Group,dc=example,dc=com",
            &[
                Modification::delete_values("memberUid", vec!["johnd".to_string()]),
                Modification::add_values("memberUid", vec!["newbie".to_string()]),
            ],
        )
        .await
        .unwrap();

        let entry = dir.entry("cn=hr,ou=Group,dc=example,dc=com").unwrap();
        assert_eq!(
            entry.attr("memberUid").values(),
            ["janed".to_string(), "newbie".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let dir = MemoryDirectory::new(SourceSystem::Primary);
        dir.set_unreachable(true);
        let err = dir
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                &SearchFilter::present("uid"),
                &[],
            )
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}

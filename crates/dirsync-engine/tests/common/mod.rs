//! Shared fixtures for the orchestrator test suites.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use dirsync_connector::entry::{DirectoryEntry, ObjectKind, SourceSystem};
use dirsync_connector::memory::MemoryDirectory;
use dirsync_connector::traits::DirectoryClient;
use dirsync_engine::manifest::{ManifestSink, MemoryManifestSink};
use dirsync_engine::prelude::*;

pub const AD_BASE: &str = "DC=example,DC=com";
pub const LDAP_BASE: &str = "dc=example,dc=com";
pub const SID_PREFIX: &str = "S-1-5-21-1111111111-2222222222-3333333333-";

/// A configuration mirroring the conventional AD / OpenLDAP deployment the
/// engine targets.
pub fn config() -> SyncConfig {
    let primary = DirectorySchema::active_directory(AD_BASE);
    let mut dependent = DirectorySchema::open_ldap(LDAP_BASE);
    dependent.sid_prefix = Some(SID_PREFIX.to_string());

    let mut mapping = AttributeMapping::default();
    mapping
        .remote_synced_attrs
        .insert("displayName".to_string(), "gecos".to_string());
    mapping
        .remote_synced_attrs
        .insert("cn".to_string(), "cn".to_string());
    mapping.ascii_only_attrs.insert("gecos".to_string());
    mapping.not_synced_attrs.insert("objectClass".to_string());

    let mut masks = AccountStateMasks::default();
    masks
        .enable_user_mask
        .insert("loginShell".to_string(), "/bin/bash".to_string());
    masks
        .disable_user_mask
        .insert("loginShell".to_string(), "/sbin/nologin".to_string());

    let mut new_user_attrs = BTreeMap::new();
    new_user_attrs.insert("loginShell".to_string(), "/bin/bash".to_string());
    let new_user = NewObjectMask {
        object_classes: vec![
            "top".to_string(),
            "posixAccount".to_string(),
            "shadowAccount".to_string(),
            "sambaSamAccount".to_string(),
        ],
        attributes: new_user_attrs,
        min_member_number: 1000,
    };
    let new_group = NewObjectMask {
        object_classes: vec!["top".to_string(), "posixGroup".to_string()],
        attributes: BTreeMap::new(),
        min_member_number: 2000,
    };

    SyncConfig {
        primary,
        dependent,
        settings: Settings::default(),
        mapping,
        masks,
        new_user,
        new_group,
        exceptions: BTreeMap::new(),
        country_control: BTreeMap::new(),
    }
}

pub fn ad_user_dn(name: &str) -> String {
    format!("CN={name},OU=User Accounts,{AD_BASE}")
}

/// A primary-directory user. `uac` 512 is an active account, 514 disabled.
pub fn ad_user(name: &str, sam: &str, uac: i64) -> DirectoryEntry {
    DirectoryEntry::new(ad_user_dn(name), sam, ObjectKind::User, SourceSystem::Primary)
        .with_attr("objectClass", vec!["top", "user"])
        .with_attr("sAMAccountName", sam)
        .with_attr("displayName", name)
        .with_attr("cn", name)
        .with_attr("userAccountControl", uac)
}

/// A dependent-directory user with the full conventional class set.
pub fn ldap_user(uid: &str, gecos: &str, shell: &str, uid_number: i64) -> DirectoryEntry {
    DirectoryEntry::new(
        format!("uid={uid},ou=People,{LDAP_BASE}"),
        uid,
        ObjectKind::User,
        SourceSystem::Dependent,
    )
    .with_attr(
        "objectClass",
        vec!["top", "posixAccount", "shadowAccount", "sambaSamAccount"],
    )
    .with_attr("uid", uid)
    .with_attr("cn", gecos)
    .with_attr("gecos", gecos)
    .with_attr("loginShell", shell)
    .with_attr("uidNumber", uid_number)
    .with_attr("sambaSID", format!("{SID_PREFIX}{}", uid_number + 2000))
}

pub fn ad_group_dn(name: &str) -> String {
    format!("CN={name},OU=Groups,{AD_BASE}")
}

/// A primary-directory group with DN-valued members.
pub fn ad_group(name: &str, gid: Option<i64>, members: Vec<String>) -> DirectoryEntry {
    let mut entry = DirectoryEntry::new(
        ad_group_dn(name),
        name,
        ObjectKind::Group,
        SourceSystem::Primary,
    )
    .with_attr("objectClass", vec!["top", "group"])
    .with_attr("cn", name)
    .with_attr("member", members);
    if let Some(gid) = gid {
        entry.set_attr("gidNumber", gid);
    }
    entry
}

/// A dependent-directory group with login-valued members.
pub fn ldap_group(name: &str, gid: i64, members: Vec<&str>) -> DirectoryEntry {
    DirectoryEntry::new(
        format!("cn={name},ou=Group,{LDAP_BASE}"),
        name,
        ObjectKind::Group,
        SourceSystem::Dependent,
    )
    .with_attr("objectClass", vec!["top", "posixGroup"])
    .with_attr("cn", name)
    .with_attr("gidNumber", gid)
    .with_attr("memberUid", members)
}

pub struct Fixture {
    pub primary: Arc<MemoryDirectory>,
    pub dependent: Arc<MemoryDirectory>,
    pub sink: Arc<MemoryManifestSink>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            primary: Arc::new(MemoryDirectory::new(SourceSystem::Primary)),
            dependent: Arc::new(MemoryDirectory::new(SourceSystem::Dependent)),
            sink: Arc::new(MemoryManifestSink::new()),
        }
    }

    pub fn user_orchestrator(&self, config: SyncConfig, options: SyncOptions) -> UserSyncOrchestrator {
        UserSyncOrchestrator::new(
            config,
            options,
            Arc::clone(&self.primary) as Arc<dyn DirectoryClient>,
            Arc::clone(&self.dependent) as Arc<dyn DirectoryClient>,
            Arc::clone(&self.sink) as Arc<dyn ManifestSink>,
        )
    }

    pub fn group_orchestrator(
        &self,
        config: SyncConfig,
        options: SyncOptions,
    ) -> GroupSyncOrchestrator {
        GroupSyncOrchestrator::new(
            config,
            options,
            Arc::clone(&self.primary) as Arc<dyn DirectoryClient>,
            Arc::clone(&self.dependent) as Arc<dyn DirectoryClient>,
            Arc::clone(&self.sink) as Arc<dyn ManifestSink>,
        )
    }
}

//! Engine configuration surface.
//!
//! Consumed, not owned: an external loader deserializes these types from the
//! operator's configuration files and hands them to the orchestrators for
//! the duration of one run. Validation failures are fatal configuration
//! errors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::credentials;
use crate::error::{SyncError, SyncResult};

/// Exception-table sentinel: the account must never be synchronized.
pub const EXCEPTION_NONE: &str = "NONE";

/// Schema knobs for one directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySchema {
    /// Base DN (e.g. "dc=example,dc=com").
    pub base: String,
    /// User container, relative to `base` (e.g. "ou=People").
    pub user_ou: String,
    /// Group container, relative to `base`.
    pub group_ou: String,
    /// Additional user OUs to search, relative to `base`. Empty means
    /// `user_ou` only.
    #[serde(default)]
    pub user_sync_ous: Vec<String>,
    /// Object class identifying user entries.
    pub user_object_class: String,
    /// Object class identifying group entries.
    pub group_object_class: String,
    /// Attribute holding the user's login name.
    pub user_name_attr: String,
    /// Attribute holding the group's name.
    pub group_name_attr: String,
    /// Attribute listing group members.
    pub member_attr: String,
    /// Attribute holding the numeric group identifier.
    pub gid_number_attr: String,
    /// Attribute holding the numeric user identifier.
    pub uid_number_attr: String,
    /// Attribute holding the account-state bitmask (primary directory).
    #[serde(default = "default_account_control_attr")]
    pub account_control_attr: String,
    /// Attribute holding the ISO country code (primary directory).
    #[serde(default = "default_country_attr")]
    pub country_attr: String,
    /// Attribute holding the security identifier (dependent directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid_attr: Option<String>,
    /// Prefix composed with allocated SID suffixes
    /// (e.g. "S-1-5-21-1234567890-1234567890-123456789-").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid_prefix: Option<String>,
}

fn default_account_control_attr() -> String {
    "userAccountControl".to_string()
}

fn default_country_attr() -> String {
    "c".to_string()
}

impl DirectorySchema {
    /// Conventional Active Directory schema under the given base DN.
    #[must_use]
    pub fn active_directory(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            user_ou: "OU=User Accounts".to_string(),
            group_ou: "OU=Groups".to_string(),
            user_sync_ous: Vec::new(),
            user_object_class: "user".to_string(),
            group_object_class: "group".to_string(),
            user_name_attr: "sAMAccountName".to_string(),
            group_name_attr: "cn".to_string(),
            member_attr: "member".to_string(),
            gid_number_attr: "gidNumber".to_string(),
            uid_number_attr: "uidNumber".to_string(),
            account_control_attr: default_account_control_attr(),
            country_attr: default_country_attr(),
            sid_attr: None,
            sid_prefix: None,
        }
    }

    /// Conventional OpenLDAP schema under the given base DN.
    #[must_use]
    pub fn open_ldap(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            user_ou: "ou=People".to_string(),
            group_ou: "ou=Group".to_string(),
            user_sync_ous: Vec::new(),
            user_object_class: "posixAccount".to_string(),
            group_object_class: "posixGroup".to_string(),
            user_name_attr: "uid".to_string(),
            group_name_attr: "cn".to_string(),
            member_attr: "memberUid".to_string(),
            gid_number_attr: "gidNumber".to_string(),
            uid_number_attr: "uidNumber".to_string(),
            account_control_attr: default_account_control_attr(),
            country_attr: default_country_attr(),
            sid_attr: Some("sambaSID".to_string()),
            sid_prefix: None,
        }
    }

    /// Full DN of the user container.
    #[must_use]
    pub fn user_base(&self) -> String {
        format!("{},{}", self.user_ou, self.base)
    }

    /// Full DN of the group container.
    #[must_use]
    pub fn group_base(&self) -> String {
        format!("{},{}", self.group_ou, self.base)
    }

    /// Full DNs of every user OU searched during a sync.
    #[must_use]
    pub fn user_sync_bases(&self) -> Vec<String> {
        if self.user_sync_ous.is_empty() {
            vec![self.user_base()]
        } else {
            self.user_sync_ous
                .iter()
                .map(|ou| format!("{},{}", ou, self.base))
                .collect()
        }
    }

    /// DN of a user entry in this directory's user container.
    #[must_use]
    pub fn user_dn(&self, login: &str) -> String {
        format!("{}={},{}", self.user_name_attr, login, self.user_base())
    }

    /// DN of a group entry in this directory's group container.
    #[must_use]
    pub fn group_dn(&self, name: &str) -> String {
        format!("{}={},{}", self.group_name_attr, name, self.group_base())
    }
}

/// Policy knobs shared by both orchestrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Generated password length.
    pub password_length: usize,
    /// Characters counted as the "special" class; at least one is required
    /// in every generated password.
    pub special_password_characters: String,
    /// Visually ambiguous characters excluded from generated passwords.
    pub banned_password_chars: String,
    /// Batches at or below this size are applied without threshold checks.
    pub small_group_blind_update: usize,
    /// Maximum additions + deletions before an override is required.
    pub total_change_threshold: usize,
    /// Maximum additions before an override is required.
    pub additions_change_threshold: usize,
    /// Maximum deletions before an override is required.
    pub deletions_change_threshold: usize,
    /// Account-control values that mark a primary account as active.
    pub active_account_control_values: Vec<i64>,
    /// Hard cap on nested-group expansion depth.
    pub max_nesting_depth: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            password_length: 12,
            special_password_characters: "!#$%&*+-=?@_".to_string(),
            banned_password_chars: "lI01O".to_string(),
            small_group_blind_update: 10,
            total_change_threshold: 50,
            additions_change_threshold: 30,
            deletions_change_threshold: 30,
            active_account_control_values: vec![512, 66048],
            max_nesting_depth: 20,
        }
    }
}

/// Attribute correspondence tables, immutable for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeMapping {
    /// Primary-directory attribute name to the dependent-directory attribute
    /// it is mirrored into.
    pub remote_synced_attrs: BTreeMap<String, String>,
    /// Attributes fetched for bookkeeping but never synchronized.
    pub not_synced_attrs: BTreeSet<String>,
    /// Same-directory copies within the dependent directory, applied after
    /// remote sync resolution (source attribute to target attribute).
    pub local_copy_attrs: BTreeMap<String, String>,
    /// Dependent attributes whose schema only admits ASCII; these receive
    /// the transliterated form instead of the primary's original value.
    pub ascii_only_attrs: BTreeSet<String>,
}

impl AttributeMapping {
    /// Attributes to request when fetching primary-directory users.
    #[must_use]
    pub fn primary_fetch_attrs(&self) -> Vec<String> {
        let mut attrs: BTreeSet<String> = self.remote_synced_attrs.keys().cloned().collect();
        attrs.extend(self.not_synced_attrs.iter().cloned());
        attrs.into_iter().collect()
    }

    /// Attributes to request when fetching dependent-directory users.
    #[must_use]
    pub fn dependent_fetch_attrs(&self) -> Vec<String> {
        let mut attrs: BTreeSet<String> = self.remote_synced_attrs.values().cloned().collect();
        attrs.extend(self.not_synced_attrs.iter().cloned());
        attrs.extend(self.local_copy_attrs.keys().cloned());
        attrs.extend(self.local_copy_attrs.values().cloned());
        attrs.into_iter().collect()
    }

    /// Check whether a dependent-directory attribute may legitimately appear
    /// in a changeset produced from this mapping.
    #[must_use]
    pub fn is_sync_target(&self, attribute: &str) -> bool {
        self.remote_synced_attrs.values().any(|a| a == attribute)
            || self.local_copy_attrs.values().any(|a| a == attribute)
    }
}

/// The enable/disable attribute-value masks applied wholesale on account
/// state flips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountStateMasks {
    /// Values an active account must carry.
    pub enable_user_mask: BTreeMap<String, String>,
    /// Values a disabled account must carry.
    pub disable_user_mask: BTreeMap<String, String>,
}

impl AccountStateMasks {
    /// Validate that the masks cover the same attributes and disagree on
    /// every one of them, so no toggle is ambiguous.
    pub fn validate(&self) -> SyncResult<()> {
        for attr in self.enable_user_mask.keys() {
            if !self.disable_user_mask.contains_key(attr) {
                return Err(SyncError::invalid_configuration(format!(
                    "enable mask attribute '{attr}' missing from disable mask"
                )));
            }
        }
        for (attr, disable_value) in &self.disable_user_mask {
            match self.enable_user_mask.get(attr) {
                None => {
                    return Err(SyncError::invalid_configuration(format!(
                        "disable mask attribute '{attr}' missing from enable mask"
                    )));
                }
                Some(enable_value) if enable_value == disable_value => {
                    return Err(SyncError::invalid_configuration(format!(
                        "mask attribute '{attr}' has the same value in both masks"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Defaults applied to newly created entries of one object kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewObjectMask {
    /// Object classes the new entry carries.
    pub object_classes: Vec<String>,
    /// Fixed attribute values for the new entry.
    pub attributes: BTreeMap<String, String>,
    /// Floor for numeric identifier allocation for this object kind.
    pub min_member_number: i64,
}

/// Run options supplied by the operator per invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Execute every step but hand no mutation to the directory client.
    pub dry_run: bool,
    /// Apply every batch regardless of thresholds.
    pub universal_override: bool,
    /// Batch names (group names) individually cleared for application.
    pub group_overrides: Vec<String>,
}

impl SyncOptions {
    /// Check whether an override has been granted for the named batch.
    #[must_use]
    pub fn override_granted(&self, name: &str) -> bool {
        self.universal_override || self.group_overrides.iter().any(|g| g == name)
    }
}

/// Complete engine configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Authoritative directory schema.
    pub primary: DirectorySchema,
    /// Dependent directory schema.
    pub dependent: DirectorySchema,
    /// Policy knobs.
    #[serde(default)]
    pub settings: Settings,
    /// Attribute correspondence tables.
    #[serde(default)]
    pub mapping: AttributeMapping,
    /// Enable/disable masks.
    #[serde(default)]
    pub masks: AccountStateMasks,
    /// Defaults for newly created user entries.
    #[serde(default)]
    pub new_user: NewObjectMask,
    /// Defaults for newly created group entries.
    #[serde(default)]
    pub new_group: NewObjectMask,
    /// Exception table: primary login name to dependent login name, or
    /// [`EXCEPTION_NONE`] to exclude the account entirely.
    #[serde(default)]
    pub exceptions: BTreeMap<String, String>,
    /// Country-control table: group name to the country codes allowed in it.
    /// Groups not listed are uncontrolled.
    #[serde(default)]
    pub country_control: BTreeMap<String, Vec<String>>,
}

impl SyncConfig {
    /// Validate the configuration. Called by every orchestrator before
    /// fetching anything; failures are fatal.
    pub fn validate(&self) -> SyncResult<()> {
        self.masks.validate()?;
        credentials::validate_policy(&self.settings)?;
        if self.dependent.sid_attr.is_some() && self.dependent.sid_prefix.is_none() {
            return Err(SyncError::invalid_configuration(
                "sid_attr configured without sid_prefix",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masks() -> AccountStateMasks {
        let mut enable = BTreeMap::new();
        enable.insert("loginShell".to_string(), "/bin/bash".to_string());
        let mut disable = BTreeMap::new();
        disable.insert("loginShell".to_string(), "/sbin/nologin".to_string());
        AccountStateMasks {
            enable_user_mask: enable,
            disable_user_mask: disable,
        }
    }

    #[test]
    fn test_masks_validate_ok() {
        assert!(masks().validate().is_ok());
    }

    #[test]
    fn test_masks_reject_missing_counterpart() {
        let mut m = masks();
        m.enable_user_mask
            .insert("sambaAcctFlags".to_string(), "[U          ]".to_string());
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("missing from disable mask"));
    }

    #[test]
    fn test_masks_reject_identical_values() {
        let mut m = masks();
        m.disable_user_mask
            .insert("loginShell".to_string(), "/bin/bash".to_string());
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("same value in both masks"));
    }

    #[test]
    fn test_schema_dn_helpers() {
        let schema = DirectorySchema::open_ldap("dc=example,dc=com");
        assert_eq!(schema.user_base(), "ou=People,dc=example,dc=com");
        assert_eq!(
            schema.user_dn("johnd"),
            "uid=johnd,ou=People,dc=example,dc=com"
        );
        assert_eq!(
            schema.group_dn("hr"),
            "cn=hr,ou=Group,dc=example,dc=com"
        );
    }

    #[test]
    fn test_user_sync_bases_fallback() {
        let mut schema = DirectorySchema::active_directory("DC=example,DC=com");
        assert_eq!(
            schema.user_sync_bases(),
            vec!["OU=User Accounts,DC=example,DC=com".to_string()]
        );
        schema.user_sync_ous = vec!["OU=Staff".to_string(), "OU=Contractors".to_string()];
        assert_eq!(
            schema.user_sync_bases(),
            vec![
                "OU=Staff,DC=example,DC=com".to_string(),
                "OU=Contractors,DC=example,DC=com".to_string(),
            ]
        );
    }

    #[test]
    fn test_mapping_fetch_attrs() {
        let mut mapping = AttributeMapping::default();
        mapping
            .remote_synced_attrs
            .insert("displayName".to_string(), "gecos".to_string());
        mapping.not_synced_attrs.insert("objectClass".to_string());
        mapping
            .local_copy_attrs
            .insert("gecos".to_string(), "cn".to_string());

        let primary = mapping.primary_fetch_attrs();
        assert!(primary.contains(&"displayName".to_string()));
        assert!(primary.contains(&"objectClass".to_string()));

        let dependent = mapping.dependent_fetch_attrs();
        assert!(dependent.contains(&"gecos".to_string()));
        assert!(dependent.contains(&"cn".to_string()));
        assert!(mapping.is_sync_target("gecos"));
        assert!(mapping.is_sync_target("cn"));
        assert!(!mapping.is_sync_target("displayName"));
    }

    #[test]
    fn test_override_granted() {
        let options = SyncOptions {
            group_overrides: vec!["hr".to_string()],
            ..SyncOptions::default()
        };
        assert!(options.override_granted("hr"));
        assert!(!options.override_granted("finance"));

        let universal = SyncOptions {
            universal_override: true,
            ..SyncOptions::default()
        };
        assert!(universal.override_granted("anything"));
    }
}

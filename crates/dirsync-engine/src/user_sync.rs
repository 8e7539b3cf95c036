//! User reconciliation.
//!
//! Users from the configured OUs are reconciled between the directories:
//! new dependent accounts are created from the primary plus the new-user
//! mask, authoritative attributes are mirrored, account state flips apply
//! the enable/disable masks wholesale, and every account is checked against
//! the exception table before anything else happens.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use dirsync_connector::entry::{AttrValue, DirectoryEntry, ObjectKind, SourceSystem};
use dirsync_connector::filter::SearchFilter;
use dirsync_connector::operation::{DirectoryOp, Modification};
use dirsync_connector::traits::DirectoryClient;

use crate::allocator::{IdAllocator, IdClass, SidAllocator};
use crate::compiler::{self, PlannedChange, TargetedOp};
use crate::config::{DirectorySchema, SyncConfig, SyncOptions, EXCEPTION_NONE};
use crate::credentials;
use crate::decision::{ChangeMetrics, SyncAction, SyncDecision};
use crate::error::{SyncError, SyncResult};
use crate::governor::{ChangeBatch, Governor};
use crate::manifest::{ManifestRecorder, ManifestSink, RunSummary};
use crate::normalize::EntryDiffer;
use crate::orchestrator::{apply_ops, fetch_snapshot, EntityOrchestrator, RunReport};

const USER_PASSWORD_ATTR: &str = "userPassword";
const NT_PASSWORD_ATTR: &str = "sambaNTPassword";
const HOME_DIRECTORY_ATTR: &str = "homeDirectory";
const SAMBA_ACCOUNT_CLASS: &str = "sambaSamAccount";

/// Batch name used for governor accounting and overrides of the user run.
const USER_BATCH: &str = "users";

/// Drives one user reconciliation run.
pub struct UserSyncOrchestrator {
    config: SyncConfig,
    options: SyncOptions,
    primary: Arc<dyn DirectoryClient>,
    dependent: Arc<dyn DirectoryClient>,
    sink: Arc<dyn ManifestSink>,
}

#[derive(Default)]
struct PairedUser {
    primary: Option<DirectoryEntry>,
    dependent: Option<DirectoryEntry>,
    excluded: bool,
}

impl UserSyncOrchestrator {
    /// Create an orchestrator over the given clients and sink.
    pub fn new(
        config: SyncConfig,
        options: SyncOptions,
        primary: Arc<dyn DirectoryClient>,
        dependent: Arc<dyn DirectoryClient>,
        sink: Arc<dyn ManifestSink>,
    ) -> Self {
        Self {
            config,
            options,
            primary,
            dependent,
            sink,
        }
    }

    async fn fetch_users(
        &self,
        client: &dyn DirectoryClient,
        schema: &DirectorySchema,
        attributes: &[String],
    ) -> SyncResult<Vec<DirectoryEntry>> {
        let filter = SearchFilter::eq("objectClass", &schema.user_object_class);
        let attr_refs: Vec<&str> = attributes.iter().map(String::as_str).collect();
        let mut entries = Vec::new();
        for base in schema.user_sync_bases() {
            let mut batch = fetch_snapshot(client, &base, &filter, &attr_refs).await?;
            debug!(base = %base, source = %client.source(), found = batch.len(), "Fetched users");
            entries.append(&mut batch);
        }
        Ok(entries)
    }

    fn fetch_attr_list(&self, source: SourceSystem) -> Vec<String> {
        let (schema, mut attrs) = match source {
            SourceSystem::Primary => (
                &self.config.primary,
                self.config.mapping.primary_fetch_attrs(),
            ),
            SourceSystem::Dependent => (
                &self.config.dependent,
                self.config.mapping.dependent_fetch_attrs(),
            ),
        };
        let mut extras = vec![
            schema.user_name_attr.clone(),
            "objectClass".to_string(),
        ];
        match source {
            SourceSystem::Primary => {
                extras.push(schema.account_control_attr.clone());
                extras.push(schema.country_attr.clone());
            }
            SourceSystem::Dependent => {
                extras.push(schema.uid_number_attr.clone());
                extras.extend(self.config.masks.enable_user_mask.keys().cloned());
                if let Some(sid_attr) = &schema.sid_attr {
                    extras.push(sid_attr.clone());
                }
            }
        }
        for extra in extras {
            if !attrs.contains(&extra) {
                attrs.push(extra);
            }
        }
        attrs
    }

    /// Key fetched entries by lowercased login name. Entries without a
    /// usable login are counted as entry failures and skipped.
    fn pair_entries(
        &self,
        pairs: &mut BTreeMap<String, PairedUser>,
        entries: Vec<DirectoryEntry>,
        schema: &DirectorySchema,
        source: SourceSystem,
        failed: &mut usize,
    ) {
        for mut entry in entries {
            entry.canonicalize();
            let login = match entry.attr_str(&schema.user_name_attr) {
                Some(login) => login.to_lowercase(),
                None => {
                    warn!(dn = %entry.dn, source = %source, "Entry has no usable login attribute, skipping");
                    *failed += 1;
                    continue;
                }
            };
            entry.set_attr(schema.user_name_attr.clone(), login.clone());
            entry.identifier = login.clone();
            let slot = pairs.entry(login).or_default();
            match source {
                SourceSystem::Primary => slot.primary = Some(entry),
                SourceSystem::Dependent => slot.dependent = Some(entry),
            }
        }
    }

    /// Apply the exception table: `NONE` excludes the account outright,
    /// anything else re-homes the primary entry under the dependent login.
    fn apply_exceptions(&self, pairs: &mut BTreeMap<String, PairedUser>) {
        let logins: Vec<String> = pairs.keys().cloned().collect();
        for login in logins {
            let Some(target) = self.config.exceptions.get(&login) else {
                continue;
            };
            let has_primary = pairs
                .get(&login)
                .is_some_and(|pair| pair.primary.is_some());
            if !has_primary {
                continue;
            }
            if target == EXCEPTION_NONE {
                info!(
                    user = %login,
                    "Exception table maps user to NONE; not synchronized, investigation required"
                );
                if let Some(pair) = pairs.get_mut(&login) {
                    pair.excluded = true;
                }
                continue;
            }
            let target_login = target.to_lowercase();
            if target_login == login {
                continue;
            }
            let taken = pairs
                .get_mut(&login)
                .and_then(|pair| pair.primary.take());
            if let Some(mut entry) = taken {
                info!(from = %login, to = %target_login, "Applying exception account mapping");
                entry.identifier = target_login.clone();
                pairs.entry(target_login).or_default().primary = Some(entry);
                if pairs
                    .get(&login)
                    .is_some_and(|pair| pair.dependent.is_none())
                {
                    pairs.remove(&login);
                }
            }
        }
    }

    async fn seed_uid_allocator(&self) -> SyncResult<IdAllocator> {
        let schema = &self.config.dependent;
        let filter = SearchFilter::present(&schema.uid_number_attr);
        let entries = fetch_snapshot(
            self.dependent.as_ref(),
            &schema.base,
            &filter,
            &[schema.uid_number_attr.as_str()],
        )
        .await?;
        let mut allocator =
            IdAllocator::new(IdClass::Uid, self.config.new_user.min_member_number);
        for entry in &entries {
            allocator.reserve_raw(
                entry
                    .attr(&schema.uid_number_attr)
                    .values()
                    .iter()
                    .map(String::as_str),
            );
        }
        debug!(in_use = allocator.in_use(), "Seeded UID allocator");
        Ok(allocator)
    }

    async fn seed_sid_allocator(&self) -> SyncResult<Option<SidAllocator>> {
        let schema = &self.config.dependent;
        let (Some(sid_attr), Some(prefix)) = (&schema.sid_attr, &schema.sid_prefix) else {
            return Ok(None);
        };
        let filter = SearchFilter::present(sid_attr);
        let entries = fetch_snapshot(
            self.dependent.as_ref(),
            &schema.base,
            &filter,
            &[sid_attr.as_str()],
        )
        .await?;
        let mut allocator = SidAllocator::new(prefix, self.config.new_user.min_member_number);
        for entry in &entries {
            allocator.reserve_sids(entry.attr(sid_attr).values().iter().map(String::as_str));
        }
        Ok(Some(allocator))
    }

    /// Plan changes for a user present in both directories.
    fn plan_update(
        &self,
        login: &str,
        primary: &DirectoryEntry,
        dependent: &DirectoryEntry,
        sid_allocator: &mut Option<SidAllocator>,
    ) -> SyncResult<Option<PlannedChange>> {
        let differ = EntryDiffer::new(&self.config.mapping);
        let mut changes = differ.diff_pair(primary, dependent)?;
        let ordinary_changes = changes.len();

        // Missing object classes from the new-user mask are retrofitted;
        // gaining the Samba class also needs a SID and a fresh NT password.
        // Credential attributes are not part of the changeset (that carries
        // mapped and mask attributes only); they ride as extra
        // modifications.
        let mut extra_mods: Vec<Modification> = Vec::new();
        let mut added_classes: Vec<String> = Vec::new();
        for class in &self.config.new_user.object_classes {
            if dependent.has_object_class(class) {
                continue;
            }
            info!(user = %login, class = %class, "Adding missing object class");
            extra_mods.push(Modification::add_values(
                "objectClass",
                vec![class.clone()],
            ));
            added_classes.push(class.clone());
            if class == SAMBA_ACCOUNT_CLASS {
                if let (Some(sid_attr), Some(allocator)) =
                    (&self.config.dependent.sid_attr, sid_allocator.as_mut())
                {
                    extra_mods.push(Modification::add_values(
                        sid_attr.clone(),
                        vec![allocator.next_sid()?],
                    ));
                    let creds = credentials::issue(&self.config.settings)?;
                    extra_mods.push(Modification::replace(
                        NT_PASSWORD_ATTR,
                        creds.nt_password,
                    ));
                }
            }
        }

        // Account state, evaluated after ordinary diffing; a flip applies
        // the whole mask and resets credentials, and is not counted toward
        // attribute-change thresholds.
        let active = primary
            .attr(&self.config.primary.account_control_attr)
            .as_integer()
            .is_some_and(|v| {
                self.config
                    .settings
                    .active_account_control_values
                    .contains(&v)
            });
        let mut status_changed = false;
        for (attr, enable_value) in &self.config.masks.enable_user_mask {
            let Some(disable_value) = self.config.masks.disable_user_mask.get(attr) else {
                continue;
            };
            let current = dependent.attr_str(attr);
            if active {
                if current == Some(disable_value.as_str()) {
                    changes.set(attr.clone(), enable_value.clone());
                    status_changed = true;
                }
            } else if current != Some(disable_value.as_str()) {
                changes.set(attr.clone(), disable_value.clone());
                status_changed = true;
            }
        }
        if status_changed {
            info!(user = %login, active, "Account state flip, applying mask and resetting credentials");
            let creds = credentials::issue(&self.config.settings)?;
            extra_mods.push(Modification::replace(
                USER_PASSWORD_ATTR,
                creds.user_password,
            ));
            extra_mods.push(Modification::replace(NT_PASSWORD_ATTR, creds.nt_password));
        }

        if changes.is_empty() && extra_mods.is_empty() {
            return Ok(None);
        }

        let action = if status_changed {
            if active {
                SyncAction::Enable
            } else {
                SyncAction::Disable
            }
        } else {
            SyncAction::Update
        };
        let decision = SyncDecision::new(login, dependent.dn.clone(), ObjectKind::User, action)
            .with_changeset(changes.clone())
            .with_metrics(ChangeMetrics::new(0, 0, ordinary_changes));

        let mut change = PlannedChange::new(decision);
        for (attr, value) in changes.iter() {
            change
                .before
                .insert(attr.clone(), dependent.attr(attr).clone());
            change
                .after
                .insert(attr.clone(), AttrValue::from(value.clone()));
        }
        for modification in &extra_mods {
            change.before.insert(
                modification.attribute.clone(),
                dependent.attr(&modification.attribute).clone(),
            );
            change.after.insert(
                modification.attribute.clone(),
                AttrValue::from_values(modification.values.clone()),
            );
        }
        if !added_classes.is_empty() {
            let mut classes: Vec<String> =
                dependent.attr("objectClass").values().to_vec();
            change
                .before
                .insert("objectClass".to_string(), AttrValue::from_values(classes.clone()));
            classes.extend(added_classes);
            change
                .after
                .insert("objectClass".to_string(), AttrValue::from_values(classes));
        }
        let mut modifications = extra_mods;
        modifications.extend(changes.to_modifications());
        change.ops.push(TargetedOp::dependent(DirectoryOp::Modify {
            dn: dependent.dn.clone(),
            changes: modifications,
        }));
        Ok(Some(change))
    }

    /// Plan creation of a dependent account for a primary-only user.
    fn plan_creation(
        &self,
        login: &str,
        primary: &DirectoryEntry,
        uid_allocator: &mut Option<IdAllocator>,
        sid_allocator: &mut Option<SidAllocator>,
    ) -> SyncResult<Option<PlannedChange>> {
        let schema = &self.config.dependent;
        let dn = schema.user_dn(login);

        // Diffing against an empty dependent entry yields the initial
        // changeset for the new account.
        let empty = DirectoryEntry::new(
            dn.clone(),
            login,
            ObjectKind::User,
            SourceSystem::Dependent,
        );
        let differ = EntryDiffer::new(&self.config.mapping);
        let changes = differ.diff_pair(primary, &empty)?;

        let mut attributes: BTreeMap<String, AttrValue> = self
            .config
            .new_user
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), AttrValue::from(v.clone())))
            .collect();
        attributes.insert(schema.user_name_attr.clone(), AttrValue::from(login));
        attributes.insert("cn".to_string(), AttrValue::from(login));
        attributes.insert(
            HOME_DIRECTORY_ATTR.to_string(),
            AttrValue::from(format!("/home/{login}")),
        );
        if let Some(allocator) = uid_allocator.as_mut() {
            attributes.insert(
                schema.uid_number_attr.clone(),
                AttrValue::from(allocator.next_available()?.to_string()),
            );
        }
        if let (Some(sid_attr), Some(allocator)) = (&schema.sid_attr, sid_allocator.as_mut()) {
            attributes.insert(sid_attr.clone(), AttrValue::from(allocator.next_sid()?));
        }
        for (attr, value) in changes.iter() {
            attributes.insert(attr.clone(), AttrValue::from(value.clone()));
        }
        let creds = credentials::issue(&self.config.settings)?;
        attributes.insert(
            USER_PASSWORD_ATTR.to_string(),
            AttrValue::from(creds.user_password),
        );
        attributes.insert(
            NT_PASSWORD_ATTR.to_string(),
            AttrValue::from(creds.nt_password),
        );

        info!(user = %login, dn = %dn, "Will create user in the dependent directory");
        let decision = SyncDecision::new(login, dn.clone(), ObjectKind::User, SyncAction::Create)
            .with_changeset(changes.clone())
            .with_metrics(ChangeMetrics::new(1, 0, changes.len()));
        let mut change = PlannedChange::new(decision);
        change.after = attributes.clone();
        change.ops.push(TargetedOp::dependent(DirectoryOp::Add {
            dn,
            object_classes: self.config.new_user.object_classes.clone(),
            attributes,
        }));
        Ok(Some(change))
    }
}

#[async_trait]
impl EntityOrchestrator for UserSyncOrchestrator {
    fn entity_kind(&self) -> ObjectKind {
        ObjectKind::User
    }

    #[instrument(skip(self), name = "user_sync")]
    async fn run(&self) -> SyncResult<RunReport> {
        self.config.validate()?;
        let mut failed = 0usize;

        // Fetch: both snapshots concurrently; either failure is fatal.
        let primary_attrs = self.fetch_attr_list(SourceSystem::Primary);
        let dependent_attrs = self.fetch_attr_list(SourceSystem::Dependent);
        let (primary_entries, dependent_entries) = tokio::join!(
            self.fetch_users(self.primary.as_ref(), &self.config.primary, &primary_attrs),
            self.fetch_users(
                self.dependent.as_ref(),
                &self.config.dependent,
                &dependent_attrs
            ),
        );
        let (primary_entries, dependent_entries) = (primary_entries?, dependent_entries?);
        info!(
            primary = primary_entries.len(),
            dependent = dependent_entries.len(),
            "Fetched user snapshots"
        );

        // Normalize and pair.
        let mut pairs: BTreeMap<String, PairedUser> = BTreeMap::new();
        self.pair_entries(
            &mut pairs,
            primary_entries,
            &self.config.primary,
            SourceSystem::Primary,
            &mut failed,
        );
        self.pair_entries(
            &mut pairs,
            dependent_entries,
            &self.config.dependent,
            SourceSystem::Dependent,
            &mut failed,
        );
        self.apply_exceptions(&mut pairs);

        // Allocators are seeded only when something will need them.
        let needs_creation = pairs
            .values()
            .any(|p| !p.excluded && p.primary.is_some() && p.dependent.is_none());
        let needs_class_fix = pairs.values().any(|p| {
            p.dependent.as_ref().is_some_and(|d| {
                self.config
                    .new_user
                    .object_classes
                    .iter()
                    .any(|c| !d.has_object_class(c))
            })
        });
        let mut uid_allocator = if needs_creation {
            Some(self.seed_uid_allocator().await?)
        } else {
            None
        };
        let mut sid_allocator = if needs_creation || needs_class_fix {
            self.seed_sid_allocator().await?
        } else {
            None
        };

        // Diff and decide per user.
        let mut planned: Vec<PlannedChange> = Vec::new();
        for (login, pair) in &pairs {
            if pair.excluded {
                let dn = pair
                    .primary
                    .as_ref()
                    .map(|e| e.dn.clone())
                    .unwrap_or_default();
                planned.push(PlannedChange::new(SyncDecision::new(
                    login,
                    dn,
                    ObjectKind::User,
                    SyncAction::SkipExcepted,
                )));
                continue;
            }
            let outcome = match (&pair.primary, &pair.dependent) {
                (Some(p), Some(d)) => self.plan_update(login, p, d, &mut sid_allocator),
                (Some(p), None) => {
                    self.plan_creation(login, p, &mut uid_allocator, &mut sid_allocator)
                }
                (None, Some(_)) => {
                    debug!(user = %login, "Only a dependent account exists; primary account missing");
                    Ok(None)
                }
                (None, None) => Ok(None),
            };
            match outcome {
                Ok(Some(change)) => planned.push(change),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(user = %login, error = %e, "Skipping entry after processing failure");
                    failed += 1;
                }
            }
        }

        // Govern the run as one batch.
        let batch = ChangeBatch {
            name: USER_BATCH.to_string(),
            size: pairs.len(),
            additions: planned
                .iter()
                .filter(|c| c.decision.action == SyncAction::Create)
                .count(),
            deletions: planned
                .iter()
                .filter(|c| c.decision.action == SyncAction::Disable)
                .count(),
            total_changes: planned
                .iter()
                .map(|c| c.decision.metrics.total_changes)
                .sum(),
        };
        let verdict = Governor::new(&self.config.settings).evaluate(&batch);
        let mut pending_additions = 0;
        let mut pending_deletions = 0;
        if !verdict.is_auto() {
            if self.options.override_granted(USER_BATCH) {
                info!("Running in override, applying all user changes");
            } else {
                warn!(
                    additions = batch.additions,
                    deletions = batch.deletions,
                    total = batch.total_changes,
                    "User changes breach thresholds and no override is set; consult the owner and rerun in override"
                );
                pending_additions = batch.additions;
                pending_deletions = batch.deletions;
                for change in &mut planned {
                    if change.decision.action.is_mutation() {
                        change.decision.action = SyncAction::SkipOverrideRequired;
                        change.ops.clear();
                    }
                }
            }
        }

        // Record every decision before anything mutates, then apply.
        let recorder = ManifestRecorder::new(Arc::clone(&self.sink));
        for change in &planned {
            recorder.record(change).await.map_err(SyncError::Manifest)?;
        }
        let ops = compiler::compile(&planned);
        let outcome = apply_ops(
            self.primary.as_ref(),
            self.dependent.as_ref(),
            &ops,
            self.options.dry_run,
        )
        .await;

        let mut summary = RunSummary::new(recorder.run_id(), "user_sync");
        summary.applied = outcome.applied;
        summary.skipped_policy = planned
            .iter()
            .filter(|c| c.decision.action.is_skip())
            .count();
        summary.failed = failed + outcome.failed;
        summary.success = summary.failed == 0;
        summary.pending_additions = pending_additions;
        summary.pending_deletions = pending_deletions;
        recorder
            .finish(&summary)
            .await
            .map_err(SyncError::Manifest)?;
        info!(
            applied = summary.applied,
            skipped = summary.skipped_policy,
            failed = summary.failed,
            success = summary.success,
            "User sync run complete"
        );

        Ok(RunReport {
            summary,
            decisions: planned.into_iter().map(|c| c.decision).collect(),
        })
    }
}

//! Group reconciliation.
//!
//! Groups are paired by name and reconciled only when their numeric IDs
//! agree. Nested primary groups are flattened to a user set, membership is
//! diffed against the dependent group, country control and the exception
//! table gate individual members, and the threshold governor gates each
//! group's batch of changes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use dirsync_connector::entry::{AttrValue, DirectoryEntry, ObjectKind};
use dirsync_connector::filter::SearchFilter;
use dirsync_connector::operation::{DirectoryOp, Modification};
use dirsync_connector::traits::DirectoryClient;

use crate::allocator::{IdAllocator, IdClass};
use crate::compiler::{self, PlannedChange, TargetedOp};
use crate::config::{DirectorySchema, SyncConfig, SyncOptions, EXCEPTION_NONE};
use crate::decision::{ChangeMetrics, SyncAction, SyncDecision};
use crate::error::{SyncError, SyncResult};
use crate::governor::{country_allowed, ChangeBatch, Governor};
use crate::groups::{flatten, GroupMembershipGraph};
use crate::manifest::{ManifestRecorder, ManifestSink, RunSummary};
use crate::orchestrator::{apply_ops, fetch_snapshot, EntityOrchestrator, RunReport};

/// Drives one group reconciliation run.
pub struct GroupSyncOrchestrator {
    config: SyncConfig,
    options: SyncOptions,
    primary: Arc<dyn DirectoryClient>,
    dependent: Arc<dyn DirectoryClient>,
    sink: Arc<dyn ManifestSink>,
}

#[derive(Debug, Clone)]
struct GroupView {
    dn: String,
    gid: Option<i64>,
    members: Vec<String>,
}

#[derive(Debug, Clone)]
struct SourceAccount {
    login: String,
    active: bool,
    country: Option<String>,
}

impl GroupSyncOrchestrator {
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

    async fn fetch_side(
        &self,
        client: &dyn DirectoryClient,
        schema: &DirectorySchema,
    ) -> SyncResult<(Vec<DirectoryEntry>, Vec<DirectoryEntry>)> {
        let group_filter = SearchFilter::eq("objectClass", &schema.group_object_class);
        let group_attrs = [
            schema.group_name_attr.as_str(),
            schema.gid_number_attr.as_str(),
            schema.member_attr.as_str(),
        ];
        let groups =
            fetch_snapshot(client, &schema.group_base(), &group_filter, &group_attrs).await?;

        let user_filter = SearchFilter::eq("objectClass", &schema.user_object_class);
        let user_attrs = [
            schema.user_name_attr.as_str(),
            schema.account_control_attr.as_str(),
            schema.country_attr.as_str(),
        ];
        // Users may live outside the sync OUs (nested group members), so the
        // whole base is searched.
        let users = fetch_snapshot(client, &schema.base, &user_filter, &user_attrs).await?;
        Ok((groups, users))
    }

    fn group_views(
        entries: Vec<DirectoryEntry>,
        schema: &DirectorySchema,
        failed: &mut usize,
    ) -> BTreeMap<String, GroupView> {
        let mut views = BTreeMap::new();
        for mut entry in entries {
            entry.canonicalize();
            // Name formats differ between directories; the first value wins.
            let Some(name) = entry
                .attr(&schema.group_name_attr)
                .values()
                .first()
                .cloned()
            else {
                warn!(dn = %entry.dn, "Group has no name attribute, skipping");
                *failed += 1;
                continue;
            };
            let name = name.to_lowercase();
            let gid = entry.attr(&schema.gid_number_attr).as_integer();
            if gid.is_none() {
                debug!(group = %name, "No GID for group");
            }
            let members = entry.attr(&schema.member_attr).values().to_vec();
            views.insert(
                name,
                GroupView {
                    dn: entry.dn,
                    gid,
                    members,
                },
            );
        }
        views
    }

    fn account_index(&self, entries: Vec<DirectoryEntry>) -> BTreeMap<String, SourceAccount> {
        let schema = &self.config.primary;
        let mut index = BTreeMap::new();
        for mut entry in entries {
            entry.canonicalize();
            let Some(login) = entry.attr_str(&schema.user_name_attr) else {
                continue;
            };
            let active = entry
                .attr(&schema.account_control_attr)
                .as_integer()
                .is_some_and(|v| {
                    self.config
                        .settings
                        .active_account_control_values
                        .contains(&v)
                });
            let country = entry
                .attr_str(&schema.country_attr)
                .map(str::to_string);
            index.insert(
                entry.dn.to_lowercase(),
                SourceAccount {
                    login: login.to_lowercase(),
                    active,
                    country,
                },
            );
        }
        index
    }

    fn dependent_logins(&self, entries: Vec<DirectoryEntry>) -> BTreeSet<String> {
        let schema = &self.config.dependent;
        entries
            .into_iter()
            .filter_map(|mut e| {
                e.canonicalize();
                e.attr_str(&schema.user_name_attr).map(str::to_lowercase)
            })
            .collect()
    }

    async fn seed_gid_allocator(
        &self,
        primary_views: &BTreeMap<String, GroupView>,
    ) -> SyncResult<IdAllocator> {
        let schema = &self.config.dependent;
        let filter = SearchFilter::present(&schema.gid_number_attr);
        let entries = fetch_snapshot(
            self.dependent.as_ref(),
            &schema.base,
            &filter,
            &[schema.gid_number_attr.as_str()],
        )
        .await?;
        let mut allocator =
            IdAllocator::new(IdClass::Gid, self.config.new_group.min_member_number);
        for entry in &entries {
            allocator.reserve_raw(
                entry
                    .attr(&schema.gid_number_attr)
                    .values()
                    .iter()
                    .map(String::as_str),
            );
        }
        // Primary-side GIDs are taken over verbatim during creation, so the
        // allocator must never hand them out either.
        allocator.reserve_all(primary_views.values().filter_map(|v| v.gid));
        debug!(in_use = allocator.in_use(), "Seeded GID allocator");
        Ok(allocator)
    }

    /// Create dependent groups for primary groups that are missing, taking
    /// over the primary GID when it has one and otherwise allocating one
    /// and writing it back to the primary so both sides agree.
    async fn plan_group_creations(
        &self,
        primary_views: &mut BTreeMap<String, GroupView>,
        dependent_views: &mut BTreeMap<String, GroupView>,
        planned: &mut Vec<PlannedChange>,
        failed: &mut usize,
    ) -> SyncResult<()> {
        let missing: Vec<String> = primary_views
            .keys()
            .filter(|name| !dependent_views.contains_key(*name))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let mut allocator = self.seed_gid_allocator(primary_views).await?;
        let schema = &self.config.dependent;
        for name in missing {
            let Some(p_view) = primary_views.get_mut(&name) else {
                continue;
            };
            let mut ops = Vec::new();
            let gid = match p_view.gid {
                Some(gid) => gid,
                None => {
                    let gid = match allocator.next_available() {
                        Ok(gid) => gid,
                        Err(e) => {
                            warn!(group = %name, error = %e, "Skipping group creation");
                            *failed += 1;
                            continue;
                        }
                    };
                    info!(
                        group = %name,
                        gid,
                        "Allocated GID, writing it back to the primary directory"
                    );
                    ops.push(TargetedOp::primary(DirectoryOp::Modify {
                        dn: p_view.dn.clone(),
                        changes: vec![Modification::replace(
                            self.config.primary.gid_number_attr.clone(),
                            gid.to_string(),
                        )],
                    }));
                    p_view.gid = Some(gid);
                    gid
                }
            };

            let dn = schema.group_dn(&name);
            let mut attributes: BTreeMap<String, AttrValue> = self
                .config
                .new_group
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), AttrValue::from(v.clone())))
                .collect();
            attributes.insert(
                schema.group_name_attr.clone(),
                AttrValue::from(name.as_str()),
            );
            attributes.insert(
                schema.gid_number_attr.clone(),
                AttrValue::from(gid.to_string()),
            );
            info!(group = %name, gid, "Will create group in the dependent directory");
            ops.push(TargetedOp::dependent(DirectoryOp::Add {
                dn: dn.clone(),
                object_classes: self.config.new_group.object_classes.clone(),
                attributes: attributes.clone(),
            }));

            let decision =
                SyncDecision::new(&name, dn.clone(), ObjectKind::Group, SyncAction::Create);
            let mut change = PlannedChange::new(decision);
            change.after = attributes;
            change.ops = ops;
            planned.push(change);

            dependent_views.insert(
                name,
                GroupView {
                    dn,
                    gid: Some(gid),
                    members: Vec::new(),
                },
            );
        }
        Ok(())
    }

    /// Groups present on both sides with matching numeric IDs.
    fn valid_sync_groups(
        primary_views: &BTreeMap<String, GroupView>,
        dependent_views: &BTreeMap<String, GroupView>,
    ) -> Vec<String> {
        let mut valid = Vec::new();
        for (name, p_view) in primary_views {
            match dependent_views.get(name) {
                Some(d_view) if p_view.gid.is_some() && p_view.gid == d_view.gid => {
                    info!(group = %name, "Group exists and IDs match: valid for sync");
                    valid.push(name.clone());
                }
                Some(_) => {
                    debug!(group = %name, "Group exists but GID mismatch");
                }
                None => {
                    debug!(group = %name, "Group only exists in one directory");
                }
            }
        }
        valid
    }

    /// Diff and govern one group's membership.
    #[allow(clippy::too_many_arguments)]
    fn plan_membership(
        &self,
        name: &str,
        p_view: &GroupView,
        d_view: &GroupView,
        accounts: &BTreeMap<String, SourceAccount>,
        dependent_logins: &BTreeSet<String>,
        excepted_seen: &mut BTreeSet<String>,
        planned: &mut Vec<PlannedChange>,
        failed: &mut usize,
    ) -> (usize, usize) {
        let member_attr = &self.config.dependent.member_attr;
        let dep_members: BTreeSet<String> =
            d_view.members.iter().map(|m| m.to_lowercase()).collect();

        let mut additions: BTreeSet<String> = BTreeSet::new();
        let mut source_active: BTreeSet<String> = BTreeSet::new();
        for member_dn in &p_view.members {
            let Some(account) = accounts.get(&member_dn.to_lowercase()) else {
                warn!(member = %member_dn, "Member does not exist in the primary directory, skipping");
                *failed += 1;
                continue;
            };
            if !account.active {
                debug!(group = %name, user = %account.login, "Member account inactive");
                continue;
            }
            let login = match self.config.exceptions.get(&account.login) {
                Some(target) if target == EXCEPTION_NONE => {
                    if excepted_seen.insert(account.login.clone()) {
                        info!(
                            user = %account.login,
                            "Exception table maps user to NONE; excluded from group sync"
                        );
                        planned.push(PlannedChange::new(SyncDecision::new(
                            &account.login,
                            member_dn.clone(),
                            ObjectKind::User,
                            SyncAction::SkipExcepted,
                        )));
                    }
                    continue;
                }
                Some(target) => target.to_lowercase(),
                None => account.login.clone(),
            };
            if !dependent_logins.contains(&login) {
                warn!(user = %login, "Not found in the dependent directory, skipping");
                *failed += 1;
                continue;
            }
            source_active.insert(login.clone());
            if !country_allowed(&self.config.country_control, name, account.country.as_deref()) {
                debug!(
                    group = %name,
                    user = %login,
                    "Group is country controlled and user is not in a valid country; user excluded"
                );
                planned.push(PlannedChange::new(SyncDecision::new(
                    &login,
                    member_dn.clone(),
                    ObjectKind::User,
                    SyncAction::SkipCountryDenied,
                )));
                continue;
            }
            if !dep_members.contains(&login) {
                additions.insert(login);
            }
        }
        let deletions: Vec<String> = d_view
            .members
            .iter()
            .filter(|m| !source_active.contains(&m.to_lowercase()))
            .cloned()
            .collect();
        let additions: Vec<String> = additions.into_iter().collect();
        if additions.is_empty() && deletions.is_empty() {
            debug!(group = %name, "Membership already aligned");
            return (0, 0);
        }

        let batch = ChangeBatch {
            name: name.to_string(),
            size: d_view.members.len(),
            additions: additions.len(),
            deletions: deletions.len(),
            total_changes: additions.len() + deletions.len(),
        };
        let verdict = Governor::new(&self.config.settings).evaluate(&batch);
        let metrics = ChangeMetrics::new(additions.len(), deletions.len(), batch.total_changes);

        let mut after_members: Vec<String> = d_view
            .members
            .iter()
            .filter(|m| !deletions.contains(*m))
            .cloned()
            .collect();
        after_members.extend(additions.iter().cloned());

        let apply = verdict.is_auto() || self.options.override_granted(name);
        let action = if apply {
            if !verdict.is_auto() {
                info!(group = %name, "Running in override, applying all changes");
            }
            SyncAction::Update
        } else {
            warn!(
                group = %name,
                additions = additions.len(),
                deletions = deletions.len(),
                "Breaches thresholds but override mode not set; consult the owner and run in override"
            );
            warn!(group = %name, current = ?d_view.members, "Current members");
            warn!(group = %name, proposed = ?additions, "Proposed additions");
            warn!(group = %name, proposed = ?deletions, "Proposed deletions");
            SyncAction::SkipOverrideRequired
        };

        let decision = SyncDecision::new(name, d_view.dn.clone(), ObjectKind::Group, action)
            .with_metrics(metrics);
        let mut change = PlannedChange::new(decision);
        change.before.insert(
            member_attr.clone(),
            AttrValue::List(d_view.members.clone()),
        );
        change
            .after
            .insert(member_attr.clone(), AttrValue::List(after_members));
        let pending = if apply {
            let mut modifications = Vec::new();
            if !deletions.is_empty() {
                modifications.push(Modification::delete_values(member_attr.clone(), deletions));
            }
            if !additions.is_empty() {
                modifications.push(Modification::add_values(member_attr.clone(), additions));
            }
            change.ops.push(TargetedOp::dependent(DirectoryOp::Modify {
                dn: d_view.dn.clone(),
                changes: modifications,
            }));
            (0, 0)
        } else {
            (metrics.additions, metrics.deletions)
        };
        planned.push(change);
        pending
    }
}

#[async_trait]
impl EntityOrchestrator for GroupSyncOrchestrator {
    fn entity_kind(&self) -> ObjectKind {
        ObjectKind::Group
    }

    #[instrument(skip(self), name = "group_sync")]
    async fn run(&self) -> SyncResult<RunReport> {
        self.config.validate()?;
        let mut failed = 0usize;

        // Fetch: both sides concurrently; either failure is fatal.
        let (primary_side, dependent_side) = tokio::join!(
            self.fetch_side(self.primary.as_ref(), &self.config.primary),
            self.fetch_side(self.dependent.as_ref(), &self.config.dependent),
        );
        let (primary_groups, primary_users) = primary_side?;
        let (dependent_groups, dependent_users) = dependent_side?;
        info!(
            primary_groups = primary_groups.len(),
            dependent_groups = dependent_groups.len(),
            "Fetched group snapshots"
        );

        let accounts = self.account_index(primary_users);
        let dependent_logins = self.dependent_logins(dependent_users);
        let mut primary_views =
            Self::group_views(primary_groups, &self.config.primary, &mut failed);
        let mut dependent_views =
            Self::group_views(dependent_groups, &self.config.dependent, &mut failed);

        // Flatten nested primary groups; the graph is rebuilt fresh from
        // this run's snapshot.
        let mut graph = GroupMembershipGraph::new();
        for view in primary_views.values() {
            graph.insert_group(view.dn.clone(), view.members.clone());
        }
        let mut unresolvable: Vec<String> = Vec::new();
        for (name, view) in &mut primary_views {
            match flatten(
                &view.dn,
                &view.members,
                &graph,
                self.config.settings.max_nesting_depth,
            ) {
                Ok(outcome) => view.members = outcome.members.into_iter().collect(),
                Err(e) => {
                    warn!(group = %name, error = %e, "Skipping group, membership unresolvable");
                    failed += 1;
                    unresolvable.push(name.clone());
                }
            }
        }
        for name in unresolvable {
            primary_views.remove(&name);
        }

        let mut planned: Vec<PlannedChange> = Vec::new();
        self.plan_group_creations(
            &mut primary_views,
            &mut dependent_views,
            &mut planned,
            &mut failed,
        )
        .await?;

        let valid = Self::valid_sync_groups(&primary_views, &dependent_views);
        debug!(groups = ?valid, "Valid sync groups");

        let mut pending_additions = 0;
        let mut pending_deletions = 0;
        let mut excepted_seen: BTreeSet<String> = BTreeSet::new();
        for name in &valid {
            let (Some(p_view), Some(d_view)) =
                (primary_views.get(name), dependent_views.get(name))
            else {
                continue;
            };
            let (pending_add, pending_del) = self.plan_membership(
                name,
                p_view,
                d_view,
                &accounts,
                &dependent_logins,
                &mut excepted_seen,
                &mut planned,
                &mut failed,
            );
            pending_additions += pending_add;
            pending_deletions += pending_del;
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

        let mut summary = RunSummary::new(recorder.run_id(), "group_sync");
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
            "Group sync run complete"
        );

        Ok(RunReport {
            summary,
            decisions: planned.into_iter().map(|c| c.decision).collect(),
        })
    }
}

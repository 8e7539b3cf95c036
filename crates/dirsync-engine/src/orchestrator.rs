//! Entity sync orchestration.
//!
//! Both orchestrators drive the same state machine per run:
//! Fetch -> Normalize -> Diff -> Govern -> (Allocate + Generate) ->
//! Compile -> Record -> Apply or Suppress. Apply is skipped entirely in
//! dry-run mode; every earlier step still executes and is recorded.

use async_trait::async_trait;
use tracing::{error, info};

use dirsync_connector::entry::{DirectoryEntry, ObjectKind, SourceSystem};
use dirsync_connector::filter::{SearchFilter, SearchScope};
use dirsync_connector::operation::DirectoryOp;
use dirsync_connector::traits::DirectoryClient;

use crate::compiler::TargetedOp;
use crate::decision::SyncDecision;
use crate::error::{SyncError, SyncResult};
use crate::manifest::RunSummary;

/// What one orchestrator run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The summary written to the monitoring sink.
    pub summary: RunSummary,
    /// Every decision taken during the run.
    pub decisions: Vec<SyncDecision>,
}

/// One entity kind's reconciliation driver.
///
/// The user and group orchestrators implement this shape and share the
/// normalizer, governor, allocator, and compiler as collaborators.
#[async_trait]
pub trait EntityOrchestrator {
    /// Which entity kind this orchestrator reconciles.
    fn entity_kind(&self) -> ObjectKind;

    /// Execute one full reconciliation run.
    ///
    /// A failure fetching either directory is fatal; per-entry failures are
    /// recorded in the run summary and the remaining entries proceed.
    async fn run(&self) -> SyncResult<RunReport>;
}

/// Fetch a directory snapshot, mapping failure to the fatal fetch error.
pub(crate) async fn fetch_snapshot(
    client: &dyn DirectoryClient,
    base: &str,
    filter: &SearchFilter,
    attributes: &[&str],
) -> SyncResult<Vec<DirectoryEntry>> {
    client
        .search(base, SearchScope::Subtree, filter, attributes)
        .await
        .map_err(|error| SyncError::Fetch {
            source: client.source(),
            error,
        })
}

/// Outcome of the apply phase.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ApplyOutcome {
    pub applied: usize,
    pub failed: usize,
}

/// Hand compiled operations to the directory clients.
///
/// Per-operation failures are logged and counted; nothing is rolled back.
/// Operation values are never logged, only the DN and operation kind, so
/// credential material cannot leak into the log stream.
pub(crate) async fn apply_ops(
    primary: &dyn DirectoryClient,
    dependent: &dyn DirectoryClient,
    ops: &[TargetedOp],
    dry_run: bool,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    if dry_run {
        info!(
            suppressed = ops.len(),
            "Dry-run mode, suppressing all directory mutations"
        );
        return outcome;
    }
    for targeted in ops {
        let client: &dyn DirectoryClient = match targeted.target {
            SourceSystem::Primary => primary,
            SourceSystem::Dependent => dependent,
        };
        let result = match &targeted.op {
            DirectoryOp::Add {
                dn,
                object_classes,
                attributes,
            } => client.add(dn, object_classes, attributes).await,
            DirectoryOp::Modify { dn, changes } => client.modify(dn, changes).await,
            DirectoryOp::Delete { dn } => client.delete(dn).await,
        };
        match result {
            Ok(()) => {
                info!(
                    dn = targeted.op.dn(),
                    op = targeted.op.kind_str(),
                    target = %targeted.target,
                    "Applied directory operation"
                );
                outcome.applied += 1;
            }
            Err(e) => {
                error!(
                    dn = targeted.op.dn(),
                    op = targeted.op.kind_str(),
                    target = %targeted.target,
                    error = %e,
                    "Failed to apply directory operation"
                );
                outcome.failed += 1;
            }
        }
    }
    outcome
}

//! Append-only audit manifest.
//!
//! One record per decision, one run-summary per run, written exclusively by
//! the orchestrator at the point a decision becomes final and never mutated
//! afterwards. Records are written before the apply phase: an unusable
//! sink aborts the run before any mutation reaches a directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use dirsync_connector::entry::{AttrValue, ObjectKind};
use dirsync_connector::error::DirectoryResult;

use crate::compiler::PlannedChange;
use crate::decision::SyncAction;

/// Attributes whose values never appear in audit records.
const SENSITIVE_ATTRS: [&str; 3] = ["userPassword", "sambaNTPassword", "unicodePwd"];

const REDACTED: &str = "***REDACTED***";

/// One append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// When the decision became final.
    pub timestamp: DateTime<Utc>,
    /// The run this record belongs to.
    pub run_id: Uuid,
    /// Entity identifier.
    pub entity: String,
    /// Entity DN.
    pub dn: String,
    /// What kind of entity.
    pub kind: ObjectKind,
    /// The decision taken.
    pub action: SyncAction,
    /// Affected attributes before the change, credential values redacted.
    pub before: BTreeMap<String, AttrValue>,
    /// Affected attributes after the change, credential values redacted.
    pub after: BTreeMap<String, AttrValue>,
}

fn redact(mut snapshot: BTreeMap<String, AttrValue>) -> BTreeMap<String, AttrValue> {
    for attr in SENSITIVE_ATTRS {
        if let Some(value) = snapshot.get_mut(attr) {
            *value = AttrValue::from(REDACTED);
        }
    }
    snapshot
}

impl ManifestRecord {
    /// Build the record for a finalized planned change.
    #[must_use]
    pub fn for_change(run_id: Uuid, change: &PlannedChange) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            entity: change.decision.identifier.clone(),
            dn: change.decision.dn.clone(),
            kind: change.decision.kind,
            action: change.decision.action,
            before: redact(change.before.clone()),
            after: redact(change.after.clone()),
        }
    }
}

/// Per-run summary consumed by the monitoring collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// The run this summarizes.
    pub run_id: Uuid,
    /// Which orchestrator produced it ("user_sync" or "group_sync").
    pub runner: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// False when any entry or operation failed.
    pub success: bool,
    /// Decisions applied to the directory.
    pub applied: usize,
    /// Decisions withheld by policy (override, exception, country).
    pub skipped_policy: usize,
    /// Entries or operations that failed.
    pub failed: usize,
    /// Additions pending operator override.
    pub pending_additions: usize,
    /// Deletions pending operator override.
    pub pending_deletions: usize,
}

impl RunSummary {
    /// Create an empty summary for a run.
    pub fn new(run_id: Uuid, runner: impl Into<String>) -> Self {
        Self {
            run_id,
            runner: runner.into(),
            timestamp: Utc::now(),
            success: true,
            applied: 0,
            skipped_policy: 0,
            failed: 0,
            pending_additions: 0,
            pending_deletions: 0,
        }
    }
}

/// Capability interface to the audit/monitoring sink.
#[async_trait]
pub trait ManifestSink: Send + Sync {
    /// Append one record to the manifest.
    async fn append(&self, record: &ManifestRecord) -> DirectoryResult<()>;

    /// Write the run summary for the monitoring collector.
    async fn write_run_summary(&self, summary: &RunSummary) -> DirectoryResult<()>;
}

/// Writes manifest records for one run.
pub struct ManifestRecorder {
    sink: Arc<dyn ManifestSink>,
    run_id: Uuid,
}

impl ManifestRecorder {
    /// Create a recorder with a fresh run identifier.
    pub fn new(sink: Arc<dyn ManifestSink>) -> Self {
        Self {
            sink,
            run_id: Uuid::new_v4(),
        }
    }

    /// The run identifier stamped onto every record.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record one finalized change.
    pub async fn record(&self, change: &PlannedChange) -> DirectoryResult<()> {
        let record = ManifestRecord::for_change(self.run_id, change);
        self.sink.append(&record).await
    }

    /// Write the run summary.
    pub async fn finish(&self, summary: &RunSummary) -> DirectoryResult<()> {
        self.sink.write_run_summary(summary).await
    }
}

/// In-memory sink for the engine test suites.
#[derive(Default)]
pub struct MemoryManifestSink {
    records: Mutex<Vec<ManifestRecord>>,
    summaries: Mutex<Vec<RunSummary>>,
}

impl MemoryManifestSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records appended so far.
    #[must_use]
    pub fn records(&self) -> Vec<ManifestRecord> {
        self.lock_records().clone()
    }

    /// All run summaries written so far.
    #[must_use]
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.lock_summaries().clone()
    }

    fn lock_records(&self) -> MutexGuard<'_, Vec<ManifestRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_summaries(&self) -> MutexGuard<'_, Vec<RunSummary>> {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ManifestSink for MemoryManifestSink {
    async fn append(&self, record: &ManifestRecord) -> DirectoryResult<()> {
        self.lock_records().push(record.clone());
        Ok(())
    }

    async fn write_run_summary(&self, summary: &RunSummary) -> DirectoryResult<()> {
        self.lock_summaries().push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::SyncDecision;

    fn change_with_password() -> PlannedChange {
        let mut change = PlannedChange::new(SyncDecision::new(
            "johnd",
            "uid=johnd,ou=People,dc=example,dc=com",
            ObjectKind::User,
            SyncAction::Update,
        ));
        change
            .after
            .insert("gecos".to_string(), AttrValue::from("John Doe"));
        change
            .after
            .insert("userPassword".to_string(), AttrValue::from("{CRYPT}$6$s$h"));
        change
            .after
            .insert("sambaNTPassword".to_string(), AttrValue::from("8846F7EA"));
        change
    }

    #[test]
    fn test_record_redacts_credentials() {
        let record = ManifestRecord::for_change(Uuid::new_v4(), &change_with_password());
        assert_eq!(
            record.after.get("userPassword"),
            Some(&AttrValue::from(REDACTED))
        );
        assert_eq!(
            record.after.get("sambaNTPassword"),
            Some(&AttrValue::from(REDACTED))
        );
        assert_eq!(record.after.get("gecos"), Some(&AttrValue::from("John Doe")));
    }

    #[test]
    fn test_record_serializes_without_plaintext() {
        let record = ManifestRecord::for_change(Uuid::new_v4(), &change_with_password());
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("{CRYPT}"));
        assert!(!json.contains("8846F7EA"));
    }

    #[tokio::test]
    async fn test_recorder_appends_and_finishes() {
        let sink = Arc::new(MemoryManifestSink::new());
        let recorder = ManifestRecorder::new(Arc::clone(&sink) as Arc<dyn ManifestSink>);

        recorder.record(&change_with_password()).await.unwrap();
        let mut summary = RunSummary::new(recorder.run_id(), "user_sync");
        summary.applied = 1;
        recorder.finish(&summary).await.unwrap();

        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].run_id, recorder.run_id());
        assert_eq!(sink.summaries().len(), 1);
        assert!(sink.summaries()[0].success);
    }
}

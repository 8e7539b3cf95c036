//! Sync decisions: the final unit of work per entry per run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use dirsync_connector::entry::ObjectKind;

use crate::changeset::ChangeSet;

/// The action decided for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncAction {
    /// Create the entry in the dependent directory.
    Create,
    /// Apply attribute or membership changes.
    Update,
    /// Flip the account to its active state.
    Enable,
    /// Flip the account to its disabled state.
    Disable,
    /// Remove the entry from the dependent directory.
    Delete,
    /// Changes exceed thresholds; nothing applied until an operator
    /// overrides.
    SkipOverrideRequired,
    /// The entry is on the exception list; handled separately.
    SkipExcepted,
    /// The entry failed country control for this batch.
    SkipCountryDenied,
}

impl SyncAction {
    /// Get the string representation used in manifest records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Enable => "enable",
            SyncAction::Disable => "disable",
            SyncAction::Delete => "delete",
            SyncAction::SkipOverrideRequired => "skip-override-required",
            SyncAction::SkipExcepted => "skip-excepted",
            SyncAction::SkipCountryDenied => "skip-country-denied",
        }
    }

    /// Check whether this action mutates the directory.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            SyncAction::Create
                | SyncAction::Update
                | SyncAction::Enable
                | SyncAction::Disable
                | SyncAction::Delete
        )
    }

    /// Check whether this is a deliberate policy-gated non-application.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        !self.is_mutation()
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = ParseSyncActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "enable" => Ok(SyncAction::Enable),
            "disable" => Ok(SyncAction::Disable),
            "delete" => Ok(SyncAction::Delete),
            "skip-override-required" => Ok(SyncAction::SkipOverrideRequired),
            "skip-excepted" => Ok(SyncAction::SkipExcepted),
            "skip-country-denied" => Ok(SyncAction::SkipCountryDenied),
            _ => Err(ParseSyncActionError(s.to_string())),
        }
    }
}

/// Error parsing sync action from string.
#[derive(Debug, Clone)]
pub struct ParseSyncActionError(String);

impl fmt::Display for ParseSyncActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sync action '{}'", self.0)
    }
}

impl std::error::Error for ParseSyncActionError {}

/// Size metrics for one decision, consumed by the threshold governor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetrics {
    /// Member or entry additions.
    pub additions: usize,
    /// Member or entry removals.
    pub deletions: usize,
    /// Total changed attributes.
    pub total_changes: usize,
}

impl ChangeMetrics {
    /// Create metrics with explicit counts.
    #[must_use]
    pub fn new(additions: usize, deletions: usize, total_changes: usize) -> Self {
        Self {
            additions,
            deletions,
            total_changes,
        }
    }
}

/// The final unit of work for one entry in one run. Produced once,
/// compiled into operations, recorded in the manifest, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDecision {
    /// Target entry identifier.
    pub identifier: String,
    /// Target entry DN.
    pub dn: String,
    /// What kind of entry this concerns.
    pub kind: ObjectKind,
    /// The decided action.
    pub action: SyncAction,
    /// The attribute changes, if any.
    pub changeset: ChangeSet,
    /// Size metrics for governor accounting.
    pub metrics: ChangeMetrics,
}

impl SyncDecision {
    /// Create a decision with empty changeset and metrics.
    pub fn new(
        identifier: impl Into<String>,
        dn: impl Into<String>,
        kind: ObjectKind,
        action: SyncAction,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            dn: dn.into(),
            kind,
            action,
            changeset: ChangeSet::new(),
            metrics: ChangeMetrics::default(),
        }
    }

    /// Attach a changeset.
    #[must_use]
    pub fn with_changeset(mut self, changeset: ChangeSet) -> Self {
        self.changeset = changeset;
        self
    }

    /// Attach metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: ChangeMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

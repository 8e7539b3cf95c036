//! Change threshold governance.
//!
//! Classifies a batch of changes as auto-apply or override-required from
//! its blast radius. Small batches are applied blind; anything else is
//! checked against the configured count thresholds, and a breach gates the
//! whole batch behind an operator override.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::Settings;

/// Aggregated change counts for one batch (one group's membership, or one
/// run's user changesets).
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Batch name, used for logs and per-batch overrides.
    pub name: String,
    /// Number of entries currently in the batch's scope.
    pub size: usize,
    /// Pending additions.
    pub additions: usize,
    /// Pending deletions.
    pub deletions: usize,
    /// Total changed attributes or members.
    pub total_changes: usize,
}

/// Governor verdict for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Apply the batch automatically.
    AutoApply,
    /// Too large to apply without an operator override; the counts are
    /// surfaced for review.
    OverrideRequired {
        additions: usize,
        deletions: usize,
        total_changes: usize,
    },
}

impl Verdict {
    /// Check whether the batch may be applied without override.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        matches!(self, Verdict::AutoApply)
    }
}

/// Threshold governor over the run's settings.
#[derive(Debug, Clone, Copy)]
pub struct Governor<'a> {
    settings: &'a Settings,
}

impl<'a> Governor<'a> {
    /// Create a governor.
    #[must_use]
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Classify a batch.
    ///
    /// The small-batch rule is evaluated first: a batch at or below
    /// `small_group_blind_update` entries is applied regardless of change
    /// volume.
    #[must_use]
    pub fn evaluate(&self, batch: &ChangeBatch) -> Verdict {
        debug!(
            batch = %batch.name,
            size = batch.size,
            additions = batch.additions,
            deletions = batch.deletions,
            total = batch.total_changes,
            "Evaluating change thresholds"
        );
        if batch.size <= self.settings.small_group_blind_update {
            debug!(
                batch = %batch.name,
                threshold = self.settings.small_group_blind_update,
                "Batch within blind-update size, applying without threshold checks"
            );
            return Verdict::AutoApply;
        }
        let mut breached = false;
        if batch.additions > self.settings.additions_change_threshold {
            warn!(
                batch = %batch.name,
                additions = batch.additions,
                threshold = self.settings.additions_change_threshold,
                "Addition change threshold breach"
            );
            breached = true;
        }
        if batch.deletions > self.settings.deletions_change_threshold {
            warn!(
                batch = %batch.name,
                deletions = batch.deletions,
                threshold = self.settings.deletions_change_threshold,
                "Deletion change threshold breach"
            );
            breached = true;
        }
        if batch.total_changes > self.settings.total_change_threshold {
            warn!(
                batch = %batch.name,
                total = batch.total_changes,
                threshold = self.settings.total_change_threshold,
                "Total change threshold breach"
            );
            breached = true;
        }
        if breached {
            Verdict::OverrideRequired {
                additions: batch.additions,
                deletions: batch.deletions,
                total_changes: batch.total_changes,
            }
        } else {
            Verdict::AutoApply
        }
    }
}

/// Check country control for one entry against one batch.
///
/// Uncontrolled groups admit everyone; a missing or empty country code is
/// always admitted (the original data is authoritative, absence is not a
/// denial).
#[must_use]
pub fn country_allowed(
    country_control: &BTreeMap<String, Vec<String>>,
    group: &str,
    country_code: Option<&str>,
) -> bool {
    let Some(allowed) = country_control.get(group) else {
        return true;
    };
    match country_code {
        None | Some("") => true,
        Some(code) => allowed.iter().any(|c| c == code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            small_group_blind_update: 10,
            additions_change_threshold: 30,
            deletions_change_threshold: 30,
            total_change_threshold: 50,
            ..Settings::default()
        }
    }

    fn batch(size: usize, additions: usize, deletions: usize) -> ChangeBatch {
        ChangeBatch {
            name: "test_group".to_string(),
            size,
            additions,
            deletions,
            total_changes: additions + deletions,
        }
    }

    #[test]
    fn test_small_batch_always_auto_applies() {
        let settings = settings();
        let governor = Governor::new(&settings);
        // Every entry changing would breach every threshold, but the batch
        // is small enough to apply blind.
        let verdict = governor.evaluate(&batch(10, 100, 100));
        assert!(verdict.is_auto());
    }

    #[test]
    fn test_additions_threshold_breach() {
        let settings = settings();
        let governor = Governor::new(&settings);
        let verdict = governor.evaluate(&batch(200, 40, 0));
        assert_eq!(
            verdict,
            Verdict::OverrideRequired {
                additions: 40,
                deletions: 0,
                total_changes: 40,
            }
        );
    }

    #[test]
    fn test_deletions_threshold_breach() {
        let settings = settings();
        let governor = Governor::new(&settings);
        assert!(!governor.evaluate(&batch(200, 0, 31)).is_auto());
    }

    #[test]
    fn test_total_threshold_breach() {
        let settings = settings();
        let governor = Governor::new(&settings);
        // Neither individual threshold breached, but the combination is.
        assert!(!governor.evaluate(&batch(200, 28, 28)).is_auto());
    }

    #[test]
    fn test_under_all_thresholds_auto_applies() {
        let settings = settings();
        let governor = Governor::new(&settings);
        assert!(governor.evaluate(&batch(200, 20, 20)).is_auto());
    }

    #[test]
    fn test_country_control() {
        let mut table = BTreeMap::new();
        table.insert("export_controlled".to_string(), vec!["GB".to_string()]);

        assert!(country_allowed(&table, "open_group", Some("TW")));
        assert!(country_allowed(&table, "export_controlled", Some("GB")));
        assert!(!country_allowed(&table, "export_controlled", Some("TW")));
        assert!(country_allowed(&table, "export_controlled", None));
        assert!(country_allowed(&table, "export_controlled", Some("")));
    }
}

//! Nested group membership resolution.
//!
//! The membership graph is rebuilt fresh each run from directory search
//! results and never persisted. Expansion is depth-first with an explicit
//! on-path set: a group already on the current expansion path is skipped
//! rather than re-expanded, which terminates on cyclic input while still
//! reaching every directly reachable user. A configured depth cap is a hard
//! safety limit; exceeding it is a reportable error, not silent truncation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, instrument, warn};

use crate::error::{SyncError, SyncResult};

/// Directed membership graph: group DN (lowercased) to its direct member
/// DNs. Members absent from the map are users (or other non-group objects).
#[derive(Debug, Clone, Default)]
pub struct GroupMembershipGraph {
    members: BTreeMap<String, Vec<String>>,
}

impl GroupMembershipGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group and its direct members.
    pub fn insert_group(&mut self, dn: impl Into<String>, members: Vec<String>) {
        self.members.insert(dn.into().to_lowercase(), members);
    }

    /// Check whether a DN names a known group.
    #[must_use]
    pub fn is_group(&self, dn: &str) -> bool {
        self.members.contains_key(&dn.to_lowercase())
    }

    /// Direct members of a group, if the DN names one.
    #[must_use]
    pub fn direct_members(&self, dn: &str) -> Option<&[String]> {
        self.members.get(&dn.to_lowercase()).map(Vec::as_slice)
    }

    /// Number of known groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of flattening one group.
#[derive(Debug, Clone, Default)]
pub struct FlattenOutcome {
    /// DNs of every user member reachable through nesting, deduplicated.
    pub members: BTreeSet<String>,
    /// Number of cycle back-edges skipped during expansion.
    pub cycles_detected: usize,
    /// Deepest nesting level traversed.
    pub max_depth: u32,
}

/// Expand nested membership of the group at `root_dn` into a flat user set.
#[instrument(skip(direct_members, graph), fields(group = root_dn, direct = direct_members.len()))]
pub fn flatten(
    root_dn: &str,
    direct_members: &[String],
    graph: &GroupMembershipGraph,
    max_depth: u32,
) -> SyncResult<FlattenOutcome> {
    let mut outcome = FlattenOutcome::default();
    let mut path: HashSet<String> = HashSet::new();
    path.insert(root_dn.to_lowercase());
    expand(direct_members, 0, max_depth, graph, &mut path, &mut outcome)?;
    if outcome.cycles_detected > 0 {
        warn!(
            group = root_dn,
            cycles = outcome.cycles_detected,
            "Circular group nesting detected during resolution"
        );
    }
    debug!(
        group = root_dn,
        members = outcome.members.len(),
        max_depth = outcome.max_depth,
        "Nested group resolution complete"
    );
    Ok(outcome)
}

fn expand(
    members: &[String],
    depth: u32,
    max_depth: u32,
    graph: &GroupMembershipGraph,
    path: &mut HashSet<String>,
    outcome: &mut FlattenOutcome,
) -> SyncResult<()> {
    for member in members {
        let key = member.to_lowercase();
        let Some(nested) = graph.direct_members(&key) else {
            outcome.members.insert(member.clone());
            continue;
        };
        if path.contains(&key) {
            outcome.cycles_detected += 1;
            continue;
        }
        if depth + 1 > max_depth {
            return Err(SyncError::NestingDepthExceeded {
                group: member.clone(),
                depth: depth + 1,
            });
        }
        path.insert(key.clone());
        outcome.max_depth = outcome.max_depth.max(depth + 1);
        expand(nested, depth + 1, max_depth, graph, path, outcome)?;
        path.remove(&key);
    }
    Ok(())
}

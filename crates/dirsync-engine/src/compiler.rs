//! Operation compilation.
//!
//! Turns governed decisions into an ordered list of directory mutations:
//! entry creations run before attribute updates for the same identifier,
//! and member deletions run before member additions within each group so a
//! group never passes through a transient over-membership state.

use std::collections::BTreeMap;

use dirsync_connector::entry::{AttrValue, SourceSystem};
use dirsync_connector::operation::{DirectoryOp, Modification, ModifyOp};

use crate::decision::SyncDecision;

/// A directory operation bound to the directory it targets. Most
/// operations go to the dependent directory; a few (e.g. a GID write-back)
/// target the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedOp {
    /// Which directory the operation applies to.
    pub target: SourceSystem,
    /// The operation itself.
    pub op: DirectoryOp,
}

impl TargetedOp {
    /// Create an operation against the dependent directory.
    #[must_use]
    pub fn dependent(op: DirectoryOp) -> Self {
        Self {
            target: SourceSystem::Dependent,
            op,
        }
    }

    /// Create an operation against the primary directory.
    #[must_use]
    pub fn primary(op: DirectoryOp) -> Self {
        Self {
            target: SourceSystem::Primary,
            op,
        }
    }
}

/// One decision together with the operations realizing it and the
/// before/after snapshot for its manifest record.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// The decision being realized.
    pub decision: SyncDecision,
    /// The operations to apply, in order. Empty for skip decisions.
    pub ops: Vec<TargetedOp>,
    /// Affected attributes before the change.
    pub before: BTreeMap<String, AttrValue>,
    /// Affected attributes after the change.
    pub after: BTreeMap<String, AttrValue>,
}

impl PlannedChange {
    /// Create a planned change with no operations or snapshots.
    #[must_use]
    pub fn new(decision: SyncDecision) -> Self {
        Self {
            decision,
            ops: Vec::new(),
            before: BTreeMap::new(),
            after: BTreeMap::new(),
        }
    }
}

fn op_rank(op: &DirectoryOp) -> u8 {
    match op {
        DirectoryOp::Add { .. } => 0,
        DirectoryOp::Modify { .. } => 1,
        DirectoryOp::Delete { .. } => 2,
    }
}

fn modification_rank(m: &Modification) -> u8 {
    match m.op {
        ModifyOp::DeleteValues => 0,
        ModifyOp::Replace => 1,
        ModifyOp::AddValues => 2,
    }
}

/// Compile planned changes into the ordered operation list.
#[must_use]
pub fn compile(changes: &[PlannedChange]) -> Vec<TargetedOp> {
    let mut ops: Vec<TargetedOp> = changes.iter().flat_map(|c| c.ops.clone()).collect();
    for targeted in &mut ops {
        if let DirectoryOp::Modify { changes, .. } = &mut targeted.op {
            changes.sort_by_key(modification_rank);
        }
    }
    ops.sort_by_key(|t| op_rank(&t.op));
    ops
}

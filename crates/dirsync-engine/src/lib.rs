//! # Directory reconciliation engine
//!
//! Reconciles user and group identity records between an authoritative
//! primary directory (AD) and a dependent target directory (OpenLDAP),
//! applying controlled, auditable mutations so the target mirrors the
//! source within policy limits.
//!
//! ## Architecture
//!
//! One run per entity kind, driven by an [`EntityOrchestrator`]:
//! Fetch -> Normalize -> Diff -> Govern -> (Allocate + Generate) ->
//! Compile -> Record -> Apply (or Suppress, in dry-run mode).
//!
//! - [`normalize`] - canonical attribute views and unicode-tolerant diffing
//! - [`allocator`] - gap-filling numeric and security identifier allocation
//! - [`credentials`] - policy-compliant password generation and encoding
//! - [`groups`] - nested group flattening with cycle breaking
//! - [`governor`] - blast-radius classification and override gating
//! - [`changeset`] / [`decision`] - minimal changesets and final decisions
//! - [`compiler`] - ordered operation compilation
//! - [`manifest`] - append-only audit records and run summaries
//! - [`user_sync`] / [`group_sync`] - the two entity orchestrators
//!
//! Directory access goes through the `dirsync-connector` capability traits;
//! the engine never speaks a wire protocol itself.
//!
//! [`EntityOrchestrator`]: orchestrator::EntityOrchestrator

pub mod allocator;
pub mod changeset;
pub mod compiler;
pub mod config;
pub mod credentials;
pub mod decision;
pub mod error;
pub mod governor;
pub mod group_sync;
pub mod groups;
pub mod manifest;
pub mod normalize;
pub mod orchestrator;
pub mod user_sync;

/// Prelude module for convenient imports.
///
/// ```
/// use dirsync_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::allocator::{IdAllocator, IdClass, SidAllocator};
    pub use crate::changeset::ChangeSet;
    pub use crate::compiler::{compile, PlannedChange, TargetedOp};
    pub use crate::config::{
        AccountStateMasks, AttributeMapping, DirectorySchema, NewObjectMask, Settings, SyncConfig,
        SyncOptions,
    };
    pub use crate::decision::{ChangeMetrics, SyncAction, SyncDecision};
    pub use crate::error::{SyncError, SyncResult};
    pub use crate::governor::{ChangeBatch, Governor, Verdict};
    pub use crate::group_sync::GroupSyncOrchestrator;
    pub use crate::groups::{flatten, FlattenOutcome, GroupMembershipGraph};
    pub use crate::manifest::{
        ManifestRecord, ManifestRecorder, ManifestSink, MemoryManifestSink, RunSummary,
    };
    pub use crate::normalize::{compare_attr, Comparison, EntryDiffer};
    pub use crate::orchestrator::{EntityOrchestrator, RunReport};
    pub use crate::user_sync::UserSyncOrchestrator;
}

//! The operation model (C4): per-kind validate/execute/rollback/
//! reverse-op behavior, unified behind one trait.
//!
//! Per the collapsing direction in the redesign notes, each kind's
//! struct below *is* its own item payload (no separate `Item` sum type
//! wrapping a second operation-wrapper layer): `CreateFile` carries
//! `path`/`content`/`mode` directly and implements [`Operation`].

pub mod copy;
pub mod create_archive;
pub mod create_directory;
pub mod create_file;
pub mod create_symlink;
pub mod delete;
pub mod move_op;
pub mod unarchive;

use std::time::Duration;

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::OperationDescriptor;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::prerequisite::Prerequisite;

/// Context made available to an operation during `execute`. Threaded
/// through rather than read from ambient state, per the redesign
/// direction against process-wide singletons.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionContext {
    pub dry_run: bool,
}

/// The state a single operation passes through during a run (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Validated,
    ValidationFailed,
    Executing,
    Success,
    Failed,
    Skipped,
}

/// Every operation kind implements this. Implementations are produced
/// by builders (e.g. [`create_file::CreateFile::builder`]) and are
/// immutable once built; neither the pipeline nor the executor mutates
/// an operation after it has been added.
pub trait Operation: std::fmt::Debug {
    fn id(&self) -> &OperationId;

    fn describe(&self) -> OperationDescriptor;

    /// IDs of operations that must appear earlier in the resolved
    /// sequence.
    fn dependencies(&self) -> &[OperationId];

    /// Reserved for future use; always empty today.
    fn conflicts(&self) -> &[OperationId] {
        &[]
    }

    /// Declared prerequisites. Never implied by `execute`'s behavior.
    fn prerequisites(&self) -> Vec<Prerequisite>;

    /// Check prerequisites and any kind-specific validation. Must not
    /// mutate `fs`.
    fn validate(&self, fs: &dyn FileSystem) -> Result<()>;

    /// Perform the mutation.
    fn execute(&self, fs: &dyn FileSystem, ctx: &ExecutionContext) -> Result<()>;

    /// Best-effort undo using only locally-known state (no backup
    /// data). Used by the executor's post-run rollback closure.
    fn rollback(&self, fs: &dyn FileSystem) -> Result<()>;

    /// Generate the operations that, run against the post-state,
    /// reproduce the pre-state, plus any captured content, charging
    /// `budget` for what it captures. Must be called before the
    /// mutating `execute` when used for a restorable run (§4.3, §4.6).
    fn reverse_ops(
        &self,
        fs: &dyn FileSystem,
        budget: &mut BackupBudget,
    ) -> Result<(Vec<Box<dyn Operation>>, BackupData)>;
}

/// The outcome of running a single operation (§3).
#[derive(Debug)]
pub struct OperationResult {
    pub op_id: OperationId,
    pub operation_ref: OperationDescriptor,
    pub status: OperationStatus,
    pub error: Option<Error>,
    pub duration: Duration,
    pub backup: Option<BackupData>,
}


// src/lib.rs

//! filepipe
//!
//! A transactional filesystem operation engine: declare a batch of
//! filesystem mutations (create/write/copy/move/delete/symlink/archive/
//! unarchive), let the pipeline resolve missing prerequisites, validate
//! and execute the batch in dependency order, and — when requested —
//! generate budget-limited reverse operations that undo it.
//!
//! # Architecture
//!
//! - **Pipeline** (§4.4): an append-only, dependency-ordered container
//!   of operations, resolved via Kahn's algorithm.
//! - **Resolver** (§4.5): expands a pipeline with synthesized
//!   `create_directory` operations wherever a declared `parent_dir`
//!   prerequisite is unmet.
//! - **Executor** (§4.6): validates, then runs, a resolved pipeline
//!   against a [`fs::FileSystem`] adapter, optionally capturing
//!   reverse-ops under a [`budget::BackupBudget`] and publishing
//!   lifecycle events onto an [`events::EventBus`].
//! - **Operations** (§4.3): one type per kind
//!   (`create_file`/`create_directory`/`create_symlink`/
//!   `create_archive`/`unarchive`/`copy`/`move`/`delete`), each
//!   implementing the [`operation::Operation`] trait.
//!
//! The filesystem adapter, the CLI, and the plan serializer are
//! external collaborators (§1): this crate defines the interface the
//! adapter must satisfy ([`fs::FileSystem`]) and ships one in-memory
//! reference implementation ([`fs::memory::MemoryFs`]) used by its own
//! tests; it is not a production adapter.

pub mod backup;
pub mod budget;
pub mod checksum;
pub mod descriptor;
mod error;
pub mod events;
pub mod executor;
pub mod fs;
pub mod id;
pub mod operation;
pub mod pipeline;
pub mod plan;
pub mod prerequisite;
pub mod resolver;

pub use backup::{BackupData, BackupKind, TreeItem};
pub use budget::{BackupBudget, BudgetExceeded};
pub use checksum::ChecksumRecord;
pub use descriptor::{DetailValue, OperationDescriptor, OperationKind};
pub use error::{Error, FsError, FsErrorKind, Result};
pub use events::{Event, EventBus, EventPayload, SubscriptionId};
pub use executor::{Executor, ExecutorOptions, RollbackHandle, RunResult};
pub use fs::{DirEntry, FileSystem, Metadata};
pub use id::OperationId;
pub use operation::{ExecutionContext, Operation, OperationResult, OperationStatus};
pub use pipeline::Pipeline;
pub use plan::{PlanFile, PlanMetadata, PlanOperationSpec};
pub use prerequisite::{Prerequisite, PrerequisiteKind};
pub use resolver::resolve_prerequisites;

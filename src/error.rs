//! Crate-wide error taxonomy.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::id::OperationId;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong building, resolving, or running a pipeline.
///
/// Variant names follow the error *kinds* named in the operation model
/// rather than one variant per filesystem adapter; adapter errors are
/// wrapped into [`Error::Execution`] with their own [`FsErrorKind`].
#[derive(Error, Debug)]
pub enum Error {
    // --- validation ---
    #[error("path must not be empty")]
    EmptyPath,

    #[error("operation id must not be empty or whitespace-only")]
    InvalidId,

    #[error("no item found at '{0}'")]
    MissingItem(PathBuf),

    #[error("item at '{path}' is not a {expected}")]
    WrongItemKind { path: PathBuf, expected: &'static str },

    #[error("unsupported archive format: {0}")]
    InvalidFormat(String),

    #[error("missing source path for operation: {0}")]
    MissingSource(PathBuf),

    #[error("path conflict: '{0}' already exists")]
    PathConflict(PathBuf),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("source '{0}' is a directory but a file was required")]
    SourceNotDirectory(PathBuf),

    #[error("destination '{0}' already exists")]
    DestinationExists(PathBuf),

    // --- prerequisite ---
    #[error("parent directory of '{0}' is missing")]
    ParentMissing(PathBuf),

    #[error("conflicting entry exists at '{0}'")]
    ConflictExists(PathBuf),

    #[error("source '{0}' does not exist")]
    SourceMissing(PathBuf),

    // --- dependency / graph ---
    #[error("dependency cycle detected among operations: {0:?}")]
    CycleDetected(Vec<OperationId>),

    #[error("operation '{0}' depends on unknown id '{1}'")]
    MissingDependency(OperationId, OperationId),

    #[error("duplicate operation id: {0}")]
    DuplicateId(OperationId),

    // --- execution ---
    #[error("filesystem error on '{path}': {kind}")]
    Execution { path: PathBuf, kind: FsErrorKind },

    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("archive entry '{0}' would escape the extraction root")]
    UnsafePath(String),

    // --- rollback ---
    #[error("rollback failed: {per_op:?}, original error: {original}")]
    RollbackFailure {
        original: Box<Error>,
        per_op: BTreeMap<OperationId, Error>,
    },

    // --- run-level aggregate ---
    #[error("{0} operations failed during the run")]
    PipelineFailed(usize),

    #[error("the run was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The coarse classification an adapter attaches to its own failures.
///
/// This mirrors the distinctions §4.1 requires every filesystem adapter
/// to make, independent of whatever error type the adapter itself uses
/// internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    InvalidPath,
    PermissionDenied,
    Other,
}

impl std::fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FsErrorKind::NotFound => "not found",
            FsErrorKind::AlreadyExists => "already exists",
            FsErrorKind::NotADirectory => "not a directory",
            FsErrorKind::InvalidPath => "invalid path",
            FsErrorKind::PermissionDenied => "permission denied",
            FsErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// An adapter-level error: a [`FsErrorKind`] plus the path it concerns.
///
/// Adapters return this from every fallible call; the core wraps it into
/// [`Error::Execution`] when surfacing it to a caller.
#[derive(Error, Debug)]
#[error("{kind} at '{}'", path.display())]
pub struct FsError {
    pub path: PathBuf,
    pub kind: FsErrorKind,
    #[source]
    pub source: Option<std::io::Error>,
}

impl FsError {
    pub fn new(path: impl Into<PathBuf>, kind: FsErrorKind) -> Self {
        Self { path: path.into(), kind, source: None }
    }

    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => FsErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => FsErrorKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
            _ => FsErrorKind::Other,
        };
        Self { path: path.into(), kind, source: Some(err) }
    }
}

impl From<FsError> for Error {
    fn from(e: FsError) -> Self {
        Error::Execution { path: e.path, kind: e.kind }
    }
}

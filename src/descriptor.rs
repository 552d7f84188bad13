//! Operation descriptors (C1): the kind-tagged, human-readable summary
//! of an operation, independent of its executable behavior.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// The kind of operation a descriptor or event payload refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationKind {
    CreateFile,
    CreateDirectory,
    CreateSymlink,
    CreateArchive,
    Unarchive,
    Copy,
    Move,
    Delete,
    Custom,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateFile => "create_file",
            OperationKind::CreateDirectory => "create_directory",
            OperationKind::CreateSymlink => "create_symlink",
            OperationKind::CreateArchive => "create_archive",
            OperationKind::Unarchive => "unarchive",
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single kind-specific parameter value. Free-form `details` maps use
/// this rather than a bare string so the common shapes (paths, modes,
/// source lists) stay typed while still giving `custom` operations an
/// escape hatch via `Raw`.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailValue {
    Path(PathBuf),
    Bytes(Vec<u8>),
    U32(u32),
    Bool(bool),
    PathList(Vec<PathBuf>),
    Raw(String),
}

/// A structured, human-readable description of an operation, used for
/// event payloads and plan round-tripping. Carries no behavior.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub primary_path: PathBuf,
    pub details: BTreeMap<String, DetailValue>,
}

impl OperationDescriptor {
    pub fn new(kind: OperationKind, primary_path: impl Into<PathBuf>) -> Self {
        Self { kind, primary_path: primary_path.into(), details: BTreeMap::new() }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: DetailValue) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

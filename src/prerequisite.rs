//! The prerequisite model (C3): declarative predicates an operation
//! asserts must hold against the filesystem at its position.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// A declarative predicate an operation requires to hold before it
/// executes. Prerequisites are *declared*, never implied: an
/// operation's [`crate::operation::Operation::prerequisites`] is the
/// complete list the resolver and executor reason about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerequisite {
    /// The parent of `path` exists and is a directory. A parent of `.`
    /// or `/` is trivially satisfied.
    ParentDir(PathBuf),
    /// `stat(path)` reports not found.
    NoConflict(PathBuf),
    /// `stat(path)` succeeds, regardless of kind.
    SourceExists(PathBuf),
}

/// Short tag naming which [`Prerequisite`] variant this is, used in
/// error messages and resolver bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisiteKind {
    ParentDir,
    NoConflict,
    SourceExists,
}

impl Prerequisite {
    pub fn kind(&self) -> PrerequisiteKind {
        match self {
            Prerequisite::ParentDir(_) => PrerequisiteKind::ParentDir,
            Prerequisite::NoConflict(_) => PrerequisiteKind::NoConflict,
            Prerequisite::SourceExists(_) => PrerequisiteKind::SourceExists,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Prerequisite::ParentDir(p) => p,
            Prerequisite::NoConflict(p) => p,
            Prerequisite::SourceExists(p) => p,
        }
    }

    /// Check this prerequisite against `fs`. A failure is a typed error
    /// carrying the variant tag and offending path (§4.2).
    pub fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        match self {
            Prerequisite::ParentDir(path) => {
                let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
                let Some(parent) = parent else {
                    // parent is "." or "/": trivially satisfied
                    return Ok(());
                };
                match fs.stat(parent) {
                    Ok(meta) if meta.is_dir => Ok(()),
                    Ok(_) => Err(Error::ParentMissing(path.clone())),
                    Err(_) => Err(Error::ParentMissing(path.clone())),
                }
            }
            Prerequisite::NoConflict(path) => match fs.stat(path) {
                Ok(_) => Err(Error::ConflictExists(path.clone())),
                Err(_) => Ok(()),
            },
            Prerequisite::SourceExists(path) => match fs.stat(path) {
                Ok(_) => Ok(()),
                Err(_) => Err(Error::SourceMissing(path.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use std::path::Path;

    #[test]
    fn parent_dir_satisfied_for_top_level_path() {
        let fs = MemoryFs::new();
        let pre = Prerequisite::ParentDir(PathBuf::from("a.txt"));
        assert!(pre.validate(&fs).is_ok());
    }

    #[test]
    fn parent_dir_fails_when_missing() {
        let fs = MemoryFs::new();
        let pre = Prerequisite::ParentDir(PathBuf::from("a/b.txt"));
        assert!(matches!(pre.validate(&fs), Err(Error::ParentMissing(_))));
    }

    #[test]
    fn no_conflict_fails_when_present() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("a.txt"), b"x", 0o644).unwrap();
        let pre = Prerequisite::NoConflict(PathBuf::from("a.txt"));
        assert!(matches!(pre.validate(&fs), Err(Error::ConflictExists(_))));
    }

    #[test]
    fn source_exists_fails_when_missing() {
        let fs = MemoryFs::new();
        let pre = Prerequisite::SourceExists(PathBuf::from("missing.txt"));
        assert!(matches!(pre.validate(&fs), Err(Error::SourceMissing(_))));
    }
}

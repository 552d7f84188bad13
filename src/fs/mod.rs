//! The filesystem capability contract (C2).
//!
//! This is the minimal abstract interface the core depends on. Paths
//! passed to these methods are adapter-relative; an adapter is
//! responsible for rejecting traversal outside whatever it considers
//! its root. The core itself never sanitizes a path before handing it
//! to the adapter — the one exception is unarchive's entry-path safety
//! check (`unsafe_path`, see [`safe_extract_path`]), which is a property
//! of the operation, not of the adapter contract.

pub mod memory;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::FsError;

/// Metadata about a single path, as reported by [`FileSystem::stat`].
#[derive(Debug, Clone)]
pub struct Metadata {
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub modtime: SystemTime,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        !self.is_dir && !self.is_symlink
    }
}

/// One entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub metadata: Metadata,
}

/// The abstract capability every operation is written against.
///
/// All methods are fallible with a [`FsError`] that distinguishes *not
/// found*, *already exists*, *not a directory*, *invalid path*,
/// *permission*, and *other* (§4.1). Implementations are adapters: an
/// on-disk adapter and [`memory::MemoryFs`] (this crate's reference,
/// test-only implementation) both satisfy this trait; neither is part
/// of the core.
pub trait FileSystem {
    /// Open `path` for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError>;

    /// Stat `path`. Fails with `NotFound` if nothing is there.
    fn stat(&self, path: &Path) -> Result<Metadata, FsError>;

    /// Write `bytes` to `path` with `mode`, truncating if it exists.
    fn write_file(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<(), FsError>;

    /// Create `path` and all missing ancestors. Idempotent: succeeds if
    /// `path` is already a directory.
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<(), FsError>;

    /// Remove `path`. Non-recursive: fails on a non-empty directory.
    fn remove(&self, path: &Path) -> Result<(), FsError>;

    /// Remove `path` and everything under it. Idempotent for missing
    /// paths.
    fn remove_tree(&self, path: &Path) -> Result<(), FsError>;

    /// Create a symlink at `link_path` pointing at `target`.
    fn symlink(&self, target: &Path, link_path: &Path) -> Result<(), FsError>;

    /// Read the target of the symlink at `path`.
    fn readlink(&self, path: &Path) -> Result<PathBuf, FsError>;

    /// Rename `old` to `new`.
    fn rename(&self, old: &Path, new: &Path) -> Result<(), FsError>;

    /// List the immediate children of the directory at `path`.
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;
}

/// Clean an archive entry name and join it under `extract_path`,
/// refusing any entry whose cleaned path would land outside
/// `extract_path` (P7). This is the `unsafe_path` check unarchive
/// relies on; it is deliberately independent of the adapter, since the
/// adapter may not even have a concept of a root to escape.
pub fn safe_extract_path(extract_path: &Path, entry_name: &str) -> Option<PathBuf> {
    use std::path::Component;

    let mut rel = PathBuf::new();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(c) => rel.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => return None,
        }
    }
    if rel.as_os_str().is_empty() {
        return None;
    }

    let joined = extract_path.join(&rel);
    let cleaned_extract = clean(extract_path);
    let cleaned_joined = clean(&joined);
    if cleaned_joined.starts_with(&cleaned_extract) && cleaned_joined != cleaned_extract {
        Some(joined)
    } else {
        None
    }
}

/// Walk `base` pre-order, collecting every regular file under it with
/// its path relative to `base` and its content and mode. Used by
/// `create_archive` to stream a directory source into an archive;
/// hand-rolled over [`FileSystem::read_dir`] rather than a
/// filesystem-path-based walker, since `base` may live on any adapter,
/// not just the real filesystem.
pub fn walk_files(fs: &dyn FileSystem, base: &Path) -> Result<Vec<(PathBuf, Vec<u8>, u32)>, FsError> {
    let mut out = Vec::new();
    walk_files_into(fs, base, Path::new(""), &mut out)?;
    Ok(out)
}

fn walk_files_into(
    fs: &dyn FileSystem,
    abs: &Path,
    rel: &Path,
    out: &mut Vec<(PathBuf, Vec<u8>, u32)>,
) -> Result<(), FsError> {
    let meta = fs.stat(abs)?;
    if meta.is_dir {
        for entry in fs.read_dir(abs)? {
            let child_abs = abs.join(&entry.name);
            let child_rel = rel.join(&entry.name);
            walk_files_into(fs, &child_abs, &child_rel, out)?;
        }
    } else {
        let mut content = Vec::new();
        fs.open(abs)?.read_to_end(&mut content).map_err(|e| FsError::from_io(abs, e))?;
        out.push((rel.to_path_buf(), content, meta.mode));
    }
    Ok(())
}

/// Lexical path cleanup (no filesystem access): collapses `.` and
/// resolves the `Component` stream without touching disk. Used only to
/// compare prefixes in [`safe_extract_path`]; not a general-purpose
/// canonicalizer.
fn clean(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_extract_path_allows_normal_entries() {
        let root = Path::new("/tmp/out");
        assert_eq!(
            safe_extract_path(root, "a/b.txt"),
            Some(PathBuf::from("/tmp/out/a/b.txt"))
        );
    }

    #[test]
    fn safe_extract_path_rejects_parent_traversal() {
        let root = Path::new("/tmp/out");
        assert_eq!(safe_extract_path(root, "../../etc/passwd"), None);
        assert_eq!(safe_extract_path(root, "a/../../escape"), None);
    }

    #[test]
    fn safe_extract_path_rejects_absolute_entries() {
        let root = Path::new("/tmp/out");
        assert_eq!(safe_extract_path(root, "/etc/passwd"), None);
    }

    #[test]
    fn safe_extract_path_rejects_empty_entry() {
        let root = Path::new("/tmp/out");
        assert_eq!(safe_extract_path(root, ""), None);
        assert_eq!(safe_extract_path(root, "."), None);
    }
}

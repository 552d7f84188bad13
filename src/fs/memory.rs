//! An in-memory reference implementation of [`FileSystem`].
//!
//! This is the reference/test-only adapter mentioned in §1: it exists so
//! the crate is buildable and testable in isolation, not as a production
//! filesystem adapter. It backs the crate's own doctests and unit tests,
//! and is what the executor's dry-run overlay is built from (§4.6).

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::error::{FsError, FsErrorKind};
use crate::fs::{DirEntry, FileSystem, Metadata};

#[derive(Debug, Clone)]
enum Node {
    File { content: Vec<u8>, mode: u32, modtime: SystemTime },
    Dir { mode: u32, children: BTreeMap<String, Node> },
    Symlink { target: PathBuf },
}

/// An in-memory tree of files, directories, and symlinks, keyed by
/// normalized relative path components.
pub struct MemoryFs {
    root: Mutex<Node>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Node::Dir { mode: 0o755, children: BTreeMap::new() }),
        }
    }

    fn components(path: &Path) -> Vec<String> {
        path.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    }

    fn not_found(path: &Path) -> FsError {
        FsError::new(path, FsErrorKind::NotFound)
    }

    fn lookup<'a>(root: &'a Node, parts: &[String]) -> Option<&'a Node> {
        let mut node = root;
        for part in parts {
            match node {
                Node::Dir { children, .. } => node = children.get(part)?,
                _ => return None,
            }
        }
        Some(node)
    }

    fn lookup_mut<'a>(root: &'a mut Node, parts: &[String]) -> Option<&'a mut Node> {
        let mut node = root;
        for part in parts {
            match node {
                Node::Dir { children, .. } => node = children.get_mut(part)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Walk to the parent directory's children map, creating nothing.
    fn parent_children<'a>(
        root: &'a mut Node,
        parts: &[String],
        path: &Path,
    ) -> Result<&'a mut BTreeMap<String, Node>, FsError> {
        let parent_parts = &parts[..parts.len().saturating_sub(1)];
        let parent = Self::lookup_mut(root, parent_parts).ok_or_else(|| Self::not_found(path))?;
        match parent {
            Node::Dir { children, .. } => Ok(children),
            _ => Err(FsError::new(path, FsErrorKind::NotADirectory)),
        }
    }
}

impl FileSystem for MemoryFs {
    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
        let parts = Self::components(path);
        let root = self.root.lock().unwrap();
        match Self::lookup(&root, &parts) {
            Some(Node::File { content, .. }) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(Node::Dir { .. }) => Err(FsError::new(path, FsErrorKind::NotADirectory)),
            Some(Node::Symlink { .. }) | None => Err(Self::not_found(path)),
        }
    }

    fn stat(&self, path: &Path) -> Result<Metadata, FsError> {
        let parts = Self::components(path);
        let root = self.root.lock().unwrap();
        if parts.is_empty() {
            return Ok(Metadata {
                size: 0,
                mode: 0o755,
                is_dir: true,
                is_symlink: false,
                modtime: SystemTime::now(),
            });
        }
        match Self::lookup(&root, &parts) {
            Some(Node::File { content, mode, modtime }) => Ok(Metadata {
                size: content.len() as u64,
                mode: *mode,
                is_dir: false,
                is_symlink: false,
                modtime: *modtime,
            }),
            Some(Node::Dir { mode, .. }) => Ok(Metadata {
                size: 0,
                mode: *mode,
                is_dir: true,
                is_symlink: false,
                modtime: SystemTime::now(),
            }),
            Some(Node::Symlink { .. }) => Ok(Metadata {
                size: 0,
                mode: 0o777,
                is_dir: false,
                is_symlink: true,
                modtime: SystemTime::now(),
            }),
            None => Err(Self::not_found(path)),
        }
    }

    fn write_file(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<(), FsError> {
        let parts = Self::components(path);
        if parts.is_empty() {
            return Err(FsError::new(path, FsErrorKind::InvalidPath));
        }
        let name = parts.last().unwrap().clone();
        let mut root = self.root.lock().unwrap();
        let children = Self::parent_children(&mut root, &parts, path)?;
        if let Some(Node::Dir { .. }) = children.get(&name) {
            return Err(FsError::new(path, FsErrorKind::NotADirectory));
        }
        children.insert(
            name,
            Node::File { content: bytes.to_vec(), mode, modtime: SystemTime::now() },
        );
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<(), FsError> {
        let parts = Self::components(path);
        let mut root = self.root.lock().unwrap();
        let mut node = &mut *root;
        for part in &parts {
            match node {
                Node::Dir { children, .. } => {
                    node = children.entry(part.clone()).or_insert_with(|| Node::Dir {
                        mode,
                        children: BTreeMap::new(),
                    });
                }
                _ => return Err(FsError::new(path, FsErrorKind::NotADirectory)),
            }
        }
        match node {
            Node::Dir { .. } => Ok(()),
            _ => Err(FsError::new(path, FsErrorKind::AlreadyExists)),
        }
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        let parts = Self::components(path);
        if parts.is_empty() {
            return Err(FsError::new(path, FsErrorKind::InvalidPath));
        }
        let name = parts.last().unwrap().clone();
        let mut root = self.root.lock().unwrap();
        let parent_parts = &parts[..parts.len() - 1];
        let parent = Self::lookup_mut(&mut root, parent_parts).ok_or_else(|| Self::not_found(path))?;
        match parent {
            Node::Dir { children, .. } => match children.get(&name) {
                Some(Node::Dir { children: grandchildren, .. }) if !grandchildren.is_empty() => {
                    Err(FsError::new(path, FsErrorKind::Other))
                }
                Some(_) => {
                    children.remove(&name);
                    Ok(())
                }
                None => Err(Self::not_found(path)),
            },
            _ => Err(FsError::new(path, FsErrorKind::NotADirectory)),
        }
    }

    fn remove_tree(&self, path: &Path) -> Result<(), FsError> {
        let parts = Self::components(path);
        if parts.is_empty() {
            return Err(FsError::new(path, FsErrorKind::InvalidPath));
        }
        let name = parts.last().unwrap().clone();
        let mut root = self.root.lock().unwrap();
        let parent_parts = &parts[..parts.len() - 1];
        let Some(parent) = Self::lookup_mut(&mut root, parent_parts) else {
            return Ok(());
        };
        if let Node::Dir { children, .. } = parent {
            children.remove(&name);
        }
        Ok(())
    }

    fn symlink(&self, target: &Path, link_path: &Path) -> Result<(), FsError> {
        let parts = Self::components(link_path);
        if parts.is_empty() {
            return Err(FsError::new(link_path, FsErrorKind::InvalidPath));
        }
        let name = parts.last().unwrap().clone();
        let mut root = self.root.lock().unwrap();
        let children = Self::parent_children(&mut root, &parts, link_path)?;
        if children.contains_key(&name) {
            return Err(FsError::new(link_path, FsErrorKind::AlreadyExists));
        }
        children.insert(name, Node::Symlink { target: target.to_path_buf() });
        Ok(())
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf, FsError> {
        let parts = Self::components(path);
        let root = self.root.lock().unwrap();
        match Self::lookup(&root, &parts) {
            Some(Node::Symlink { target }) => Ok(target.clone()),
            Some(_) => Err(FsError::new(path, FsErrorKind::InvalidPath)),
            None => Err(Self::not_found(path)),
        }
    }

    fn rename(&self, old: &Path, new: &Path) -> Result<(), FsError> {
        let old_parts = Self::components(old);
        let new_parts = Self::components(new);
        if old_parts.is_empty() || new_parts.is_empty() {
            return Err(FsError::new(old, FsErrorKind::InvalidPath));
        }
        let mut root = self.root.lock().unwrap();

        let old_name = old_parts.last().unwrap().clone();
        let old_parent = Self::lookup_mut(&mut root, &old_parts[..old_parts.len() - 1])
            .ok_or_else(|| Self::not_found(old))?;
        let node = match old_parent {
            Node::Dir { children, .. } => {
                children.remove(&old_name).ok_or_else(|| Self::not_found(old))?
            }
            _ => return Err(FsError::new(old, FsErrorKind::NotADirectory)),
        };

        let new_name = new_parts.last().unwrap().clone();
        let new_parent = match Self::lookup_mut(&mut root, &new_parts[..new_parts.len() - 1]) {
            Some(p) => p,
            None => {
                // restore what we removed before failing
                if let Node::Dir { children, .. } =
                    Self::lookup_mut(&mut root, &old_parts[..old_parts.len() - 1]).unwrap()
                {
                    children.insert(old_name, node);
                }
                return Err(Self::not_found(new));
            }
        };
        match new_parent {
            Node::Dir { children, .. } => {
                children.insert(new_name, node);
                Ok(())
            }
            _ => Err(FsError::new(new, FsErrorKind::NotADirectory)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let parts = Self::components(path);
        let root = self.root.lock().unwrap();
        match Self::lookup(&root, &parts) {
            Some(Node::Dir { children, .. }) => Ok(children
                .iter()
                .map(|(name, node)| DirEntry {
                    name: name.clone(),
                    metadata: match node {
                        Node::File { content, mode, modtime } => Metadata {
                            size: content.len() as u64,
                            mode: *mode,
                            is_dir: false,
                            is_symlink: false,
                            modtime: *modtime,
                        },
                        Node::Dir { mode, .. } => Metadata {
                            size: 0,
                            mode: *mode,
                            is_dir: true,
                            is_symlink: false,
                            modtime: SystemTime::now(),
                        },
                        Node::Symlink { .. } => Metadata {
                            size: 0,
                            mode: 0o777,
                            is_dir: false,
                            is_symlink: true,
                            modtime: SystemTime::now(),
                        },
                    },
                })
                .collect()),
            Some(_) => Err(FsError::new(path, FsErrorKind::NotADirectory)),
            None => Err(Self::not_found(path)),
        }
    }
}

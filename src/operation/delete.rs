use std::io::Read;
use std::path::{Path, PathBuf};

use crate::backup::{bytes_to_mb, tree_restore_order, BackupData, TreeItem, DIR_ENTRY_MB};
use crate::budget::BackupBudget;
use crate::descriptor::{OperationDescriptor, OperationKind};
use crate::error::{FsErrorKind, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::create_directory::CreateDirectory;
use crate::operation::create_file::CreateFile;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

use tracing::warn;

/// Removes whatever is at `path`: a directory (recursively) or a
/// single file/symlink. Idempotent at execute time — deleting a path
/// that is already gone is a success, not an error (§4.3).
#[derive(Debug, Clone)]
pub struct Delete {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    /// When set, `path` must exist at validate time. Off by default,
    /// matching the idempotent execute-time behavior.
    strict: bool,
}

impl Delete {
    pub fn builder(id: OperationId, path: impl Into<PathBuf>) -> DeleteBuilder {
        DeleteBuilder { id, dependencies: Vec::new(), path: path.into(), strict: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn capture_tree(&self, fs: &dyn FileSystem) -> Result<Vec<TreeItem>> {
        let mut items = Vec::new();
        capture_recursive(fs, &self.path, Path::new(""), &mut items)?;
        Ok(items)
    }
}

fn capture_recursive(fs: &dyn FileSystem, abs: &Path, rel: &Path, out: &mut Vec<TreeItem>) -> Result<()> {
    let meta = fs.stat(abs)?;
    if meta.is_dir {
        out.push(TreeItem { relative_path: rel.to_path_buf(), is_dir: true, mode: meta.mode, size: 0, content: None });
        for entry in fs.read_dir(abs)? {
            let child_abs = abs.join(&entry.name);
            let child_rel = rel.join(&entry.name);
            capture_recursive(fs, &child_abs, &child_rel, out)?;
        }
    } else {
        let mut content = Vec::new();
        fs.open(abs)?.read_to_end(&mut content)?;
        out.push(TreeItem {
            relative_path: rel.to_path_buf(),
            is_dir: false,
            mode: meta.mode,
            size: content.len() as u64,
            content: Some(content),
        });
    }
    Ok(())
}

pub struct DeleteBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    strict: bool,
}

impl DeleteBuilder {
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> Delete {
        Delete { id: self.id, dependencies: self.dependencies, path: self.path, strict: self.strict }
    }
}

impl Operation for Delete {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::Delete, self.path.clone())
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        if self.strict {
            vec![Prerequisite::SourceExists(self.path.clone())]
        } else {
            Vec::new()
        }
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        for pre in self.prerequisites() {
            pre.validate(fs)?;
        }
        Ok(())
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        match fs.stat(&self.path) {
            Ok(meta) if meta.is_dir => {
                fs.remove_tree(&self.path)?;
                Ok(())
            }
            Ok(_) => {
                fs.remove(&self.path)?;
                Ok(())
            }
            Err(e) if e.kind == FsErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn rollback(&self, _fs: &dyn FileSystem) -> Result<()> {
        // A delete's rollback without captured backup data cannot
        // recreate what was removed; restoring is the job of the
        // reverse-ops this operation generates, run through their own
        // execute() by the caller.
        Ok(())
    }

    fn reverse_ops(
        &self,
        fs: &dyn FileSystem,
        budget: &mut BackupBudget,
    ) -> Result<(Vec<Box<dyn Operation>>, BackupData)> {
        let meta = match fs.stat(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind == FsErrorKind::NotFound => {
                return Ok((Vec::new(), BackupData::none(self.id.clone(), self.path.clone())));
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir {
            let items = self.capture_tree(fs)?;
            let sum_mb: f64 = items
                .iter()
                .map(|it| if it.is_dir { DIR_ENTRY_MB } else { bytes_to_mb(it.size) })
                .sum();
            match budget.consume(sum_mb) {
                Ok(()) => {
                    let ordered = tree_restore_order(items);
                    let mut reverse_ops: Vec<Box<dyn Operation>> = Vec::new();
                    for (i, item) in ordered.iter().enumerate() {
                        let target = self.path.join(&item.relative_path);
                        let rid = OperationId::new(format!("reverse:restore:{}:{}", self.id, i))?;
                        if item.is_dir {
                            reverse_ops.push(Box::new(CreateDirectory::builder(rid, target).mode(item.mode).build()));
                        } else {
                            reverse_ops.push(Box::new(
                                CreateFile::builder(rid, target)
                                    .content(item.content.clone().unwrap_or_default())
                                    .mode(item.mode)
                                    .build(),
                            ));
                        }
                    }
                    Ok((reverse_ops, BackupData::directory_tree(self.id.clone(), self.path.clone(), sum_mb, ordered)))
                }
                Err(exceeded) => {
                    warn!(
                        op_id = %self.id,
                        path = %self.path.display(),
                        wanted_mb = exceeded.wanted_mb,
                        remaining_mb = exceeded.remaining_mb,
                        "backup budget rejected directory tree capture"
                    );
                    Ok((Vec::new(), BackupData::budget_rejected(self.id.clone(), self.path.clone(), exceeded)))
                }
            }
        } else {
            let mut content = Vec::new();
            fs.open(&self.path)?.read_to_end(&mut content)?;
            let size_mb = bytes_to_mb(content.len() as u64);
            match budget.consume(size_mb) {
                Ok(()) => {
                    let rid = OperationId::new(format!("reverse:restore:{}", self.id))?;
                    let reverse: Box<dyn Operation> = Box::new(
                        CreateFile::builder(rid, self.path.clone()).content(content.clone()).mode(meta.mode).build(),
                    );
                    Ok((vec![reverse], BackupData::file(self.id.clone(), self.path.clone(), content, meta.mode)))
                }
                Err(exceeded) => {
                    warn!(
                        op_id = %self.id,
                        path = %self.path.display(),
                        wanted_mb = exceeded.wanted_mb,
                        remaining_mb = exceeded.remaining_mb,
                        "backup budget rejected file capture"
                    );
                    Ok((Vec::new(), BackupData::budget_rejected(self.id.clone(), self.path.clone(), exceeded)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;

    #[test]
    fn execute_on_missing_path_is_a_no_op() {
        let fs = MemoryFs::new();
        let op = Delete::builder(OperationId::new("d1").unwrap(), "gone").build();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
    }

    #[test]
    fn execute_removes_file_and_directory_tree() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("a/b"), 0o755).unwrap();
        fs.write_file(Path::new("a/b/f.txt"), b"hi", 0o644).unwrap();
        let op = Delete::builder(OperationId::new("d1").unwrap(), "a").build();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("a")).is_err());
    }

    #[test]
    fn reverse_ops_restores_deleted_file_within_budget() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("a.txt"), b"hello", 0o644).unwrap();
        let op = Delete::builder(OperationId::new("d1").unwrap(), "a.txt").build();
        let mut budget = BackupBudget::new(10.0);
        let (reverse, backup) = op.reverse_ops(&fs, &mut budget).unwrap();
        assert_eq!(backup.kind, crate::backup::BackupKind::File);
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("a.txt")).is_err());
        for r in &reverse {
            r.execute(&fs, &ExecutionContext::default()).unwrap();
        }
        let restored = fs.open(Path::new("a.txt")).unwrap();
        let mut buf = Vec::new();
        let mut restored = restored;
        restored.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn reverse_ops_rejected_when_budget_too_small() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("a.txt"), &vec![0u8; 2 * 1_048_576], 0o644).unwrap();
        let op = Delete::builder(OperationId::new("d1").unwrap(), "a.txt").build();
        let mut budget = BackupBudget::new(1.0);
        let (reverse, backup) = op.reverse_ops(&fs, &mut budget).unwrap();
        assert!(reverse.is_empty());
        assert!(backup.rejected.is_some());
        assert_eq!(budget.used_mb(), 0.0);
    }

    #[test]
    fn reverse_ops_restores_directory_tree_in_correct_order() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("a/b"), 0o755).unwrap();
        fs.write_file(Path::new("a/f.txt"), b"top", 0o644).unwrap();
        fs.write_file(Path::new("a/b/g.txt"), b"nested", 0o644).unwrap();
        let op = Delete::builder(OperationId::new("d1").unwrap(), "a").build();
        let mut budget = BackupBudget::new(10.0);
        let (reverse, backup) = op.reverse_ops(&fs, &mut budget).unwrap();
        assert_eq!(backup.kind, crate::backup::BackupKind::DirectoryTree);
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        for r in &reverse {
            r.execute(&fs, &ExecutionContext::default()).unwrap();
        }
        assert!(fs.stat(Path::new("a/b/g.txt")).unwrap().is_file());
        assert!(fs.stat(Path::new("a/f.txt")).unwrap().is_file());
    }
}

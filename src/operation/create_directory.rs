use std::path::{Path, PathBuf};

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::{Error, FsErrorKind, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

/// Creates a directory at `path` with `mode`. Unlike `create_file`,
/// an already-existing directory at `path` is treated as success
/// rather than a conflict (Open Question, resolved in favor of
/// idempotent directory creation).
#[derive(Debug, Clone)]
pub struct CreateDirectory {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    mode: u32,
}

impl CreateDirectory {
    pub fn builder(id: OperationId, path: impl Into<PathBuf>) -> CreateDirectoryBuilder {
        CreateDirectoryBuilder { id, dependencies: Vec::new(), path: path.into(), mode: 0o755 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct CreateDirectoryBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    mode: u32,
}

impl CreateDirectoryBuilder {
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> CreateDirectory {
        CreateDirectory { id: self.id, dependencies: self.dependencies, path: self.path, mode: self.mode }
    }
}

impl Operation for CreateDirectory {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::CreateDirectory, self.path.clone())
            .with_detail("mode", DetailValue::U32(self.mode))
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        vec![Prerequisite::ParentDir(self.path.clone())]
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        for pre in self.prerequisites() {
            pre.validate(fs)?;
        }
        match fs.stat(&self.path) {
            Ok(meta) if meta.is_dir => Ok(()),
            Ok(_) => Err(Error::ConflictExists(self.path.clone())),
            Err(e) if e.kind == FsErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        fs.mkdir_all(&self.path, self.mode)?;
        Ok(())
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        match fs.remove(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind == FsErrorKind::NotFound => Ok(()),
            // A non-empty directory (e.g. one that already existed
            // before this run and gained unrelated children) is left
            // alone rather than treated as a rollback failure.
            Err(e) if e.kind == FsErrorKind::Other => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn reverse_ops(
        &self,
        fs: &dyn FileSystem,
        _budget: &mut BackupBudget,
    ) -> Result<(Vec<Box<dyn Operation>>, BackupData)> {
        // If the directory already existed, running this op was a
        // no-op and there is nothing to reverse.
        if fs.stat(&self.path).map(|m| m.is_dir).unwrap_or(false) {
            return Ok((Vec::new(), BackupData::none(self.id.clone(), self.path.clone())));
        }
        let reverse: Box<dyn Operation> = Box::new(
            super::delete::Delete::builder(
                OperationId::new(format!("reverse:delete:{}", self.id))?,
                self.path.clone(),
            )
            .build(),
        );
        Ok((vec![reverse], BackupData::none(self.id.clone(), self.path.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;

    #[test]
    fn execute_creates_missing_parents() {
        let fs = MemoryFs::new();
        let op = CreateDirectory::builder(OperationId::new("d1").unwrap(), "a/b/c").build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("a/b/c")).unwrap().is_dir);
    }

    #[test]
    fn validate_is_idempotent_on_existing_directory() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("a"), 0o755).unwrap();
        let op = CreateDirectory::builder(OperationId::new("d1").unwrap(), "a").build();
        op.validate(&fs).unwrap();
    }

    #[test]
    fn validate_rejects_file_at_path() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("a"), b"x", 0o644).unwrap();
        let op = CreateDirectory::builder(OperationId::new("d1").unwrap(), "a").build();
        assert!(op.validate(&fs).is_err());
    }

    #[test]
    fn reverse_ops_is_empty_when_directory_preexisted() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("a"), 0o755).unwrap();
        let op = CreateDirectory::builder(OperationId::new("d1").unwrap(), "a").build();
        let mut budget = BackupBudget::new(10.0);
        let (reverse, _) = op.reverse_ops(&fs, &mut budget).unwrap();
        assert!(reverse.is_empty());
    }
}

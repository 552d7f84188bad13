use std::path::{Path, PathBuf};

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::{FsErrorKind, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

/// Creates a symlink at `path` pointing at `target`. `target` is an
/// opaque string and is never checked for existence — it may point
/// anywhere, including outside whatever root an adapter enforces.
#[derive(Debug, Clone)]
pub struct CreateSymlink {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    target: PathBuf,
}

impl CreateSymlink {
    pub fn builder(id: OperationId, path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> CreateSymlinkBuilder {
        CreateSymlinkBuilder { id, dependencies: Vec::new(), path: path.into(), target: target.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct CreateSymlinkBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    target: PathBuf,
}

impl CreateSymlinkBuilder {
    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> CreateSymlink {
        CreateSymlink { id: self.id, dependencies: self.dependencies, path: self.path, target: self.target }
    }
}

impl Operation for CreateSymlink {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::CreateSymlink, self.path.clone())
            .with_detail("target", DetailValue::Path(self.target.clone()))
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        vec![
            Prerequisite::ParentDir(self.path.clone()),
            Prerequisite::NoConflict(self.path.clone()),
        ]
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        for pre in self.prerequisites() {
            pre.validate(fs)?;
        }
        Ok(())
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        fs.symlink(&self.target, &self.path)?;
        Ok(())
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        match fs.remove(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind == FsErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn reverse_ops(
        &self,
        _fs: &dyn FileSystem,
        _budget: &mut BackupBudget,
    ) -> Result<(Vec<Box<dyn Operation>>, BackupData)> {
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
    fn execute_creates_symlink_to_arbitrary_target() {
        let fs = MemoryFs::new();
        let op = CreateSymlink::builder(OperationId::new("s1").unwrap(), "link", "/nowhere/at/all").build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert_eq!(fs.readlink(Path::new("link")).unwrap(), PathBuf::from("/nowhere/at/all"));
    }

    #[test]
    fn validate_rejects_conflict() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("link"), b"x", 0o644).unwrap();
        let op = CreateSymlink::builder(OperationId::new("s1").unwrap(), "link", "whatever").build();
        assert!(op.validate(&fs).is_err());
    }

    #[test]
    fn rollback_is_idempotent() {
        let fs = MemoryFs::new();
        let op = CreateSymlink::builder(OperationId::new("s1").unwrap(), "link", "target").build();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        op.rollback(&fs).unwrap();
        op.rollback(&fs).unwrap();
    }
}

use std::path::{Path, PathBuf};

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::Result;
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

/// Writes `content` to `path` with `mode`. Fails if `path` already
/// exists (§4.3).
#[derive(Debug, Clone)]
pub struct CreateFile {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    content: Vec<u8>,
    mode: u32,
}

impl CreateFile {
    pub fn builder(id: OperationId, path: impl Into<PathBuf>) -> CreateFileBuilder {
        CreateFileBuilder {
            id,
            dependencies: Vec::new(),
            path: path.into(),
            content: Vec::new(),
            mode: 0o644,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builder for [`CreateFile`]; produces an immutable operation.
pub struct CreateFileBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    content: Vec<u8>,
    mode: u32,
}

impl CreateFileBuilder {
    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> CreateFile {
        CreateFile {
            id: self.id,
            dependencies: self.dependencies,
            path: self.path,
            content: self.content,
            mode: self.mode,
        }
    }
}

impl Operation for CreateFile {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::CreateFile, self.path.clone())
            .with_detail("mode", DetailValue::U32(self.mode))
            .with_detail("content", DetailValue::Bytes(self.content.clone()))
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
        fs.write_file(&self.path, &self.content, self.mode)?;
        Ok(())
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        match fs.remove(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind == crate::error::FsErrorKind::NotFound => Ok(()),
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

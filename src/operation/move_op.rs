use std::io::Read;
use std::path::{Path, PathBuf};

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::{Error, FsErrorKind, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

/// Moves `src` to `dst`. Tries an atomic `rename` first; if the
/// adapter rejects it (e.g. a cross-device rename on a real
/// filesystem), falls back to copy-then-delete, cleaning up the
/// partially-written `dst` if the source-side delete then fails.
#[derive(Debug, Clone)]
pub struct Move {
    id: OperationId,
    dependencies: Vec<OperationId>,
    src: PathBuf,
    dst: PathBuf,
}

impl Move {
    pub fn builder(id: OperationId, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> MoveBuilder {
        MoveBuilder { id, dependencies: Vec::new(), src: src.into(), dst: dst.into() }
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    pub fn dst(&self) -> &Path {
        &self.dst
    }
}

pub struct MoveBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    src: PathBuf,
    dst: PathBuf,
}

impl MoveBuilder {
    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> Move {
        Move { id: self.id, dependencies: self.dependencies, src: self.src, dst: self.dst }
    }
}

impl Operation for Move {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::Move, self.dst.clone())
            .with_detail("src", DetailValue::Path(self.src.clone()))
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        vec![
            Prerequisite::SourceExists(self.src.clone()),
            Prerequisite::ParentDir(self.dst.clone()),
            Prerequisite::NoConflict(self.dst.clone()),
        ]
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        if self.src.as_os_str().is_empty() || self.dst.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }
        for pre in self.prerequisites() {
            pre.validate(fs)?;
        }
        Ok(())
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        if let Some(parent) = self.dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs.mkdir_all(parent, 0o755)?;
        }
        match fs.rename(&self.src, &self.dst) {
            Ok(()) => Ok(()),
            Err(_) => {
                let meta = fs.stat(&self.src)?;
                let mut content = Vec::new();
                fs.open(&self.src)?.read_to_end(&mut content)?;
                fs.write_file(&self.dst, &content, meta.mode)?;
                if let Err(delete_err) = fs.remove(&self.src) {
                    // Source couldn't be removed after copying: undo
                    // the partial copy so the move as a whole has not
                    // silently duplicated the file.
                    let _ = fs.remove(&self.dst);
                    return Err(delete_err.into());
                }
                Ok(())
            }
        }
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        match fs.rename(&self.dst, &self.src) {
            Ok(()) => Ok(()),
            Err(e) if e.kind == FsErrorKind::NotFound => Ok(()),
            Err(_) => {
                // dst may no longer be at a renameable location on
                // this adapter; fall back to copy-then-delete.
                let meta = fs.stat(&self.dst)?;
                let mut content = Vec::new();
                fs.open(&self.dst)?.read_to_end(&mut content)?;
                fs.write_file(&self.src, &content, meta.mode)?;
                fs.remove(&self.dst)?;
                Ok(())
            }
        }
    }

    fn reverse_ops(
        &self,
        _fs: &dyn FileSystem,
        _budget: &mut BackupBudget,
    ) -> Result<(Vec<Box<dyn Operation>>, BackupData)> {
        let reverse: Box<dyn Operation> = Box::new(
            Move::builder(
                OperationId::new(format!("reverse:move:{}", self.id))?,
                self.dst.clone(),
                self.src.clone(),
            )
            .build(),
        );
        Ok((vec![reverse], BackupData::none(self.id.clone(), self.dst.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;

    #[test]
    fn execute_renames_file() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("src.txt"), b"hi", 0o644).unwrap();
        let op = Move::builder(OperationId::new("m1").unwrap(), "src.txt", "dst.txt").build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("src.txt")).is_err());
        assert!(fs.stat(Path::new("dst.txt")).is_ok());
    }

    #[test]
    fn reverse_ops_moves_back() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("src.txt"), b"hi", 0o644).unwrap();
        let op = Move::builder(OperationId::new("m1").unwrap(), "src.txt", "dst.txt").build();
        let mut budget = BackupBudget::new(10.0);
        let (reverse, _) = op.reverse_ops(&fs, &mut budget).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        for r in &reverse {
            r.execute(&fs, &ExecutionContext::default()).unwrap();
        }
        assert!(fs.stat(Path::new("src.txt")).is_ok());
        assert!(fs.stat(Path::new("dst.txt")).is_err());
    }
}

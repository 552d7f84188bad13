use std::cell::RefCell;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::checksum::ChecksumRecord;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::{Error, FsErrorKind, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

/// Copies the regular file at `src` to `dst`, preserving mode.
/// Directory sources are out of scope and fail with `unsupported`.
#[derive(Debug, Clone)]
pub struct Copy {
    id: OperationId,
    dependencies: Vec<OperationId>,
    src: PathBuf,
    dst: PathBuf,
    verify_checksum: bool,
    /// Captured by `validate()`, read back by `execute()`: the checksum
    /// of `src` as it stood before execution, so execute can detect a
    /// source that changed out from under it. `Operation`'s methods all
    /// take `&self`, so the capture-then-read-back needs interior
    /// mutability.
    checksum: RefCell<Option<ChecksumRecord>>,
}

impl Copy {
    pub fn builder(id: OperationId, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> CopyBuilder {
        CopyBuilder { id, dependencies: Vec::new(), src: src.into(), dst: dst.into(), verify_checksum: false }
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    pub fn dst(&self) -> &Path {
        &self.dst
    }
}

pub struct CopyBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    src: PathBuf,
    dst: PathBuf,
    verify_checksum: bool,
}

impl CopyBuilder {
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> Copy {
        Copy {
            id: self.id,
            dependencies: self.dependencies,
            src: self.src,
            dst: self.dst,
            verify_checksum: self.verify_checksum,
            checksum: RefCell::new(None),
        }
    }
}

impl Operation for Copy {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::Copy, self.dst.clone())
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
        let meta = fs.stat(&self.src)?;
        if meta.is_dir {
            return Err(Error::Unsupported("copy of a directory source"));
        }
        if self.verify_checksum {
            let mut content = Vec::new();
            fs.open(&self.src)?.read_to_end(&mut content)?;
            let record = ChecksumRecord::compute(self.src.clone(), &content, meta.size, meta.modtime);
            *self.checksum.borrow_mut() = Some(record);
        }
        Ok(())
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        let meta = fs.stat(&self.src)?;
        let mut content = Vec::new();
        fs.open(&self.src)?.read_to_end(&mut content)?;
        if let Some(record) = self.checksum.borrow().as_ref() {
            record.verify(&content)?;
        }
        if let Some(parent) = self.dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs.mkdir_all(parent, 0o755)?;
        }
        fs.write_file(&self.dst, &content, meta.mode)?;
        Ok(())
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        match fs.remove(&self.dst) {
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
                self.dst.clone(),
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
    fn execute_copies_content_and_mode() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("src.txt"), b"hello", 0o640).unwrap();
        let op = Copy::builder(OperationId::new("c1").unwrap(), "src.txt", "dst.txt").build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        let meta = fs.stat(Path::new("dst.txt")).unwrap();
        assert_eq!(meta.mode, 0o640);
    }

    #[test]
    fn validate_rejects_directory_source() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("srcdir"), 0o755).unwrap();
        let op = Copy::builder(OperationId::new("c1").unwrap(), "srcdir", "dst.txt").build();
        assert!(matches!(op.validate(&fs), Err(Error::Unsupported(_))));
    }

    #[test]
    fn validate_rejects_missing_source() {
        let fs = MemoryFs::new();
        let op = Copy::builder(OperationId::new("c1").unwrap(), "missing.txt", "dst.txt").build();
        assert!(op.validate(&fs).is_err());
    }

    #[test]
    fn execute_detects_source_mutated_after_checksum_capture() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("src.txt"), b"hello", 0o640).unwrap();
        let op = Copy::builder(OperationId::new("c1").unwrap(), "src.txt", "dst.txt")
            .verify_checksum(true)
            .build();
        op.validate(&fs).unwrap();
        fs.write_file(Path::new("src.txt"), b"tampered", 0o640).unwrap();
        let err = op.execute(&fs, &ExecutionContext::default()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn execute_succeeds_when_source_unchanged_since_checksum_capture() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("src.txt"), b"hello", 0o640).unwrap();
        let op = Copy::builder(OperationId::new("c1").unwrap(), "src.txt", "dst.txt")
            .verify_checksum(true)
            .build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        let meta = fs.stat(Path::new("dst.txt")).unwrap();
        assert_eq!(meta.mode, 0o640);
    }
}

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use glob::Pattern;
use tracing::warn;

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::{Error, FsErrorKind, Result};
use crate::fs::{safe_extract_path, FileSystem};
use crate::id::OperationId;
use crate::operation::create_archive::ArchiveFormat;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

struct RawEntry {
    name: String,
    is_dir: bool,
    is_link: bool,
    mode: u32,
    content: Vec<u8>,
}

/// Extracts `archive_path` into `extract_path`, matching entries
/// against `patterns` (glob-only — §9's resolution of the substring
/// Open Question) when non-empty, refusing any entry whose cleaned
/// extraction path would escape `extract_path` (§4.3, P7).
#[derive(Debug, Clone)]
pub struct Unarchive {
    id: OperationId,
    dependencies: Vec<OperationId>,
    archive_path: PathBuf,
    extract_path: PathBuf,
    patterns: Vec<String>,
    overwrite: bool,
}

impl Unarchive {
    pub fn builder(id: OperationId, archive_path: impl Into<PathBuf>, extract_path: impl Into<PathBuf>) -> UnarchiveBuilder {
        UnarchiveBuilder {
            id,
            dependencies: Vec::new(),
            archive_path: archive_path.into(),
            extract_path: extract_path.into(),
            patterns: Vec::new(),
            overwrite: false,
        }
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn extract_path(&self) -> &Path {
        &self.extract_path
    }

    fn matches_patterns(&self, name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.patterns.iter().any(|p| Pattern::new(p).map(|pat| pat.matches(name)).unwrap_or(false))
    }
}

pub struct UnarchiveBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    archive_path: PathBuf,
    extract_path: PathBuf,
    patterns: Vec<String>,
    overwrite: bool,
}

impl UnarchiveBuilder {
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn depends_on(mut self, id: OperationId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn build(self) -> Unarchive {
        Unarchive {
            id: self.id,
            dependencies: self.dependencies,
            archive_path: self.archive_path,
            extract_path: self.extract_path,
            patterns: self.patterns,
            overwrite: self.overwrite,
        }
    }
}

impl Operation for Unarchive {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::Unarchive, self.extract_path.clone())
            .with_detail("archive_path", DetailValue::Path(self.archive_path.clone()))
            .with_detail("overwrite", DetailValue::Bool(self.overwrite))
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        vec![
            Prerequisite::SourceExists(self.archive_path.clone()),
            Prerequisite::ParentDir(self.extract_path.clone()),
        ]
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        if self.archive_path.as_os_str().is_empty() || self.extract_path.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }
        ArchiveFormat::from_path(&self.archive_path)?;
        for pattern in &self.patterns {
            Pattern::new(pattern).map_err(|e| Error::InvalidFormat(format!("invalid pattern '{pattern}': {e}")))?;
        }
        for pre in self.prerequisites() {
            pre.validate(fs)?;
        }
        Ok(())
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        let format = ArchiveFormat::from_path(&self.archive_path)?;
        let mut bytes = Vec::new();
        fs.open(&self.archive_path)?.read_to_end(&mut bytes)?;
        let entries = read_entries(format, &bytes)?;

        // First pass: reject the whole operation if any entry would
        // escape `extract_path`, before anything is written.
        let mut planned = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.is_dir || entry.is_link || !self.matches_patterns(&entry.name) {
                continue;
            }
            let target = safe_extract_path(&self.extract_path, &entry.name)
                .ok_or_else(|| Error::UnsafePath(entry.name.clone()))?;
            planned.push((target, entry));
        }

        for (target, entry) in planned {
            if let Some(parent) = target.parent() {
                fs.mkdir_all(parent, 0o755)?;
            }
            let no_conflict = fs.stat(&target).is_err();
            if self.overwrite || no_conflict {
                fs.write_file(&target, &entry.content, entry.mode)?;
            }
        }

        for entry in &entries {
            if entry.is_link {
                warn!(entry = %entry.name, "skipping symlink/hard-link entry during unarchive");
            }
        }
        Ok(())
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        match fs.remove_tree(&self.extract_path) {
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
        // Best-effort and destructive by design (§4.3): this deletes
        // `extract_path` wholesale rather than tracking exactly which
        // entries this run wrote.
        let reverse: Box<dyn Operation> = Box::new(
            super::delete::Delete::builder(
                OperationId::new(format!("reverse:delete:{}", self.id))?,
                self.extract_path.clone(),
            )
            .build(),
        );
        Ok((vec![reverse], BackupData::none(self.id.clone(), self.extract_path.clone())))
    }
}

fn read_entries(format: ArchiveFormat, bytes: &[u8]) -> Result<Vec<RawEntry>> {
    match format {
        ArchiveFormat::Tar => read_tar_entries(Cursor::new(bytes)),
        ArchiveFormat::TarGz => read_tar_entries(GzDecoder::new(Cursor::new(bytes))),
        ArchiveFormat::Zip => read_zip_entries(bytes),
    }
}

fn read_tar_entries<R: Read>(reader: R) -> Result<Vec<RawEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = entry.header().clone();
        let is_link = matches!(header.entry_type(), tar::EntryType::Symlink | tar::EntryType::Link);
        let is_dir = header.entry_type().is_dir();
        let name = entry.path()?.to_string_lossy().into_owned();
        let mode = header.mode().unwrap_or(0o644);
        let mut content = Vec::new();
        if !is_dir && !is_link {
            entry.read_to_end(&mut content)?;
        }
        out.push(RawEntry { name, is_dir, is_link, mode, content });
    }
    Ok(out)
}

fn read_zip_entries(bytes: &[u8]) -> Result<Vec<RawEntry>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_err)?;
        let name = file.name().to_string();
        let is_dir = file.is_dir();
        let mode = file.unix_mode().unwrap_or(0o644);
        let is_link = mode & 0o170000 == 0o120000;
        let mut content = Vec::new();
        if !is_dir && !is_link {
            file.read_to_end(&mut content)?;
        }
        out.push(RawEntry { name, is_dir, is_link, mode, content });
    }
    Ok(out)
}

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use crate::operation::create_archive::{ArchiveFormat as Fmt, CreateArchive};

    fn make_tar(fs: &MemoryFs) {
        fs.write_file(Path::new("a.txt"), b"hello", 0o644).unwrap();
        let op = CreateArchive::builder(OperationId::new("ar1").unwrap(), "out.tar", Fmt::Tar).source("a.txt").build();
        op.execute(fs, &ExecutionContext::default()).unwrap();
    }

    #[test]
    fn execute_extracts_tar_entries() {
        let fs = MemoryFs::new();
        make_tar(&fs);
        let op = Unarchive::builder(OperationId::new("u1").unwrap(), "out.tar", "extracted").build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("extracted/a.txt")).unwrap().is_file());
    }

    #[test]
    fn execute_respects_glob_patterns() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("keep.txt"), b"1", 0o644).unwrap();
        fs.write_file(Path::new("skip.log"), b"2", 0o644).unwrap();
        let op = CreateArchive::builder(OperationId::new("ar1").unwrap(), "out.tar", Fmt::Tar)
            .source("keep.txt")
            .source("skip.log")
            .build();
        op.execute(&fs, &ExecutionContext::default()).unwrap();

        let un = Unarchive::builder(OperationId::new("u1").unwrap(), "out.tar", "extracted")
            .pattern("*.txt")
            .build();
        un.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("extracted/keep.txt")).is_ok());
        assert!(fs.stat(Path::new("extracted/skip.log")).is_err());
    }

    #[test]
    fn validate_rejects_bad_extension() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("archive.rar"), b"x", 0o644).unwrap();
        let op = Unarchive::builder(OperationId::new("u1").unwrap(), "archive.rar", "extracted").build();
        assert!(op.validate(&fs).is_err());
    }
}

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::{DetailValue, OperationDescriptor, OperationKind};
use crate::error::{Error, Result};
use crate::fs::{walk_files, FileSystem};
use crate::id::OperationId;
use crate::operation::{ExecutionContext, Operation};
use crate::prerequisite::Prerequisite;

/// The three archive formats this crate knows how to write and read
/// (§3's `format ∈ {tar, tar.gz, zip}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Parse a format name as it would appear in a plan file or a
    /// `.tar`/`.tar.gz`/`.tgz`/`.zip` file extension. This is the
    /// `invalid_format` check site — constructing an [`ArchiveFormat`]
    /// directly in Rust code is already type-safe and cannot fail.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(ArchiveFormat::Tar),
            "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            "zip" => Ok(ArchiveFormat::Zip),
            other => Err(Error::InvalidFormat(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar") {
            Ok(ArchiveFormat::Tar)
        } else if name.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else {
            Err(Error::InvalidFormat(name))
        }
    }
}

/// Builds an archive at `path` from `sources` (each a regular file or
/// a directory walked pre-order) and writes it via `write_file`.
#[derive(Debug, Clone)]
pub struct CreateArchive {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    format: ArchiveFormat,
    sources: Vec<PathBuf>,
    mode: u32,
}

impl CreateArchive {
    pub fn builder(id: OperationId, path: impl Into<PathBuf>, format: ArchiveFormat) -> CreateArchiveBuilder {
        CreateArchiveBuilder { id, dependencies: Vec::new(), path: path.into(), format, sources: Vec::new(), mode: 0o644 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct CreateArchiveBuilder {
    id: OperationId,
    dependencies: Vec<OperationId>,
    path: PathBuf,
    format: ArchiveFormat,
    sources: Vec<PathBuf>,
    mode: u32,
}

impl CreateArchiveBuilder {
    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = PathBuf>) -> Self {
        self.sources.extend(sources);
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

    pub fn build(self) -> CreateArchive {
        CreateArchive {
            id: self.id,
            dependencies: self.dependencies,
            path: self.path,
            format: self.format,
            sources: self.sources,
            mode: self.mode,
        }
    }
}

impl Operation for CreateArchive {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn describe(&self) -> OperationDescriptor {
        OperationDescriptor::new(OperationKind::CreateArchive, self.path.clone())
            .with_detail("sources", DetailValue::PathList(self.sources.clone()))
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        let mut prereqs = vec![
            Prerequisite::ParentDir(self.path.clone()),
            Prerequisite::NoConflict(self.path.clone()),
        ];
        prereqs.extend(self.sources.iter().cloned().map(Prerequisite::SourceExists));
        prereqs
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::MissingSource(self.path.clone()));
        }
        for pre in self.prerequisites() {
            pre.validate(fs)?;
        }
        Ok(())
    }

    fn execute(&self, fs: &dyn FileSystem, _ctx: &ExecutionContext) -> Result<()> {
        let bytes = match self.format {
            ArchiveFormat::Tar => {
                let mut buf = Vec::new();
                {
                    let mut builder = tar::Builder::new(&mut buf);
                    for source in &self.sources {
                        append_source(&mut builder, fs, source)?;
                    }
                    builder.finish()?;
                }
                buf
            }
            ArchiveFormat::TarGz => {
                let mut buf = Vec::new();
                {
                    let encoder = GzEncoder::new(&mut buf, Compression::default());
                    let mut builder = tar::Builder::new(encoder);
                    for source in &self.sources {
                        append_source(&mut builder, fs, source)?;
                    }
                    let encoder = builder.into_inner()?;
                    encoder.finish()?;
                }
                buf
            }
            ArchiveFormat::Zip => {
                let mut buf = Vec::new();
                {
                    let cursor = Cursor::new(&mut buf);
                    let mut writer = zip::ZipWriter::new(cursor);
                    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
                    for source in &self.sources {
                        for (rel, content, mode) in archive_entries(fs, source)? {
                            let name = rel.to_string_lossy().replace('\\', "/");
                            writer
                                .start_file(name, options.unix_permissions(mode))
                                .map_err(zip_err)?;
                            writer.write_all(&content)?;
                        }
                    }
                    writer.finish().map_err(zip_err)?;
                }
                buf
            }
        };
        fs.write_file(&self.path, &bytes, self.mode)?;
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

/// Entries contributed by a single source: if `source` is a
/// directory, every file beneath it with its path relative to
/// `source`'s own name; if a file, just itself under its own name.
fn archive_entries(fs: &dyn FileSystem, source: &Path) -> Result<Vec<(PathBuf, Vec<u8>, u32)>> {
    let meta = fs.stat(source)?;
    let root_name = source.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    if meta.is_dir {
        Ok(walk_files(fs, source)?
            .into_iter()
            .map(|(rel, content, mode)| (root_name.join(rel), content, mode))
            .collect())
    } else {
        use std::io::Read;
        let mut content = Vec::new();
        fs.open(source)?.read_to_end(&mut content)?;
        Ok(vec![(root_name, content, meta.mode)])
    }
}

fn append_source<W: Write>(builder: &mut tar::Builder<W>, fs: &dyn FileSystem, source: &Path) -> Result<()> {
    for (rel, content, mode) in archive_entries(fs, source)? {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, rel, content.as_slice())?;
    }
    Ok(())
}

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;

    #[test]
    fn execute_writes_tar_archive_from_single_file() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("a.txt"), b"hi", 0o644).unwrap();
        let op = CreateArchive::builder(OperationId::new("ar1").unwrap(), "out.tar", ArchiveFormat::Tar)
            .source("a.txt")
            .build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        assert!(fs.stat(Path::new("out.tar")).unwrap().is_file());
    }

    #[test]
    fn execute_writes_zip_archive_from_directory() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("src/sub"), 0o755).unwrap();
        fs.write_file(Path::new("src/a.txt"), b"hi", 0o644).unwrap();
        fs.write_file(Path::new("src/sub/b.txt"), b"there", 0o644).unwrap();
        let op = CreateArchive::builder(OperationId::new("ar1").unwrap(), "out.zip", ArchiveFormat::Zip)
            .source("src")
            .build();
        op.validate(&fs).unwrap();
        op.execute(&fs, &ExecutionContext::default()).unwrap();
        let meta = fs.stat(Path::new("out.zip")).unwrap();
        assert!(meta.size > 0);
    }

    #[test]
    fn validate_rejects_empty_sources() {
        let fs = MemoryFs::new();
        let op = CreateArchive::builder(OperationId::new("ar1").unwrap(), "out.tar", ArchiveFormat::Tar).build();
        assert!(matches!(op.validate(&fs), Err(Error::MissingSource(_))));
    }

    #[test]
    fn format_parse_accepts_known_names_and_rejects_others() {
        assert_eq!(ArchiveFormat::parse("tar").unwrap(), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::parse("tar.gz").unwrap(), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::parse("zip").unwrap(), ArchiveFormat::Zip);
        assert!(ArchiveFormat::parse("rar").is_err());
    }
}

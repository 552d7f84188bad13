//! The plan file model (§6): a serde-derived representation of a batch
//! of operations, plus `into_pipeline` — the seam a CLI collaborator
//! calls after deserializing a plan, and the only contract this crate
//! has with the plan serializer named in §1 as an external collaborator.
//!
//! The JSON encoding itself is `serde_json`'s; this module commits to
//! JSON as *a* concrete serializer (matching the plan file format in
//! §6) without pretending to be the plan serializer collaborator —
//! it owns the data model, not a CLI or a file format negotiation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::OperationId;
use crate::operation::copy::Copy;
use crate::operation::create_archive::{ArchiveFormat, CreateArchive};
use crate::operation::create_directory::CreateDirectory;
use crate::operation::create_file::CreateFile;
use crate::operation::create_symlink::CreateSymlink;
use crate::operation::delete::Delete;
use crate::operation::move_op::Move;
use crate::operation::unarchive::Unarchive;
use crate::operation::Operation;
use crate::pipeline::Pipeline;

/// Top-level plan file (§6): metadata plus an ordered list of operation
/// specs. `operations` is a flat list; the pipeline built from it still
/// goes through dependency resolution, so list order here need not be
/// execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub metadata: PlanMetadata,
    pub operations: Vec<PlanOperationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub version: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One operation as it appears in a plan file: a `type` tag, the
/// caller-chosen `id`, explicit `dependencies`, and a free-form
/// `parameters` map whose shape depends on `type` (§6's "Parameter
/// conventions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOperationSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl PlanOperationSpec {
    fn required_str(&self, key: &str) -> Result<String> {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(Error::EmptyPath)
    }

    fn optional_str(&self, key: &str) -> Option<String> {
        self.parameters.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    /// Mode is encoded as an octal string (§6), e.g. `"644"`.
    fn mode(&self, default: u32) -> Result<u32> {
        match self.optional_str("mode") {
            Some(s) => u32::from_str_radix(&s, 8)
                .map_err(|_| Error::InvalidFormat(format!("mode '{s}' is not valid octal"))),
            None => Ok(default),
        }
    }

    /// `content` may be UTF-8 text or base64-encoded bytes; a
    /// `content_encoding: "base64"` parameter selects the latter, text
    /// is the default (§6 leaves the choice implementation-defined but
    /// requires it to be documented).
    fn content(&self) -> Result<Vec<u8>> {
        let Some(value) = self.parameters.get("content") else {
            return Ok(Vec::new());
        };
        let Some(text) = value.as_str() else {
            return Err(Error::InvalidFormat("content must be a string".to_string()));
        };
        if self.optional_str("content_encoding").as_deref() == Some("base64") {
            BASE64
                .decode(text)
                .map_err(|e| Error::InvalidFormat(format!("invalid base64 content: {e}")))
        } else {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn sources(&self) -> Vec<PathBuf> {
        self.parameters
            .get("sources")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    fn patterns(&self) -> Vec<String> {
        self.parameters
            .get("patterns")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn overwrite(&self) -> bool {
        self.parameters.get("overwrite").and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

impl PlanFile {
    /// Build a [`Pipeline`] from this plan's operations. This is the
    /// seam a CLI collaborator calls after parsing a plan file; the
    /// returned pipeline is unresolved (§4.4's `resolve()` has not run).
    pub fn into_pipeline(self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new();
        for spec in self.operations {
            pipeline.add(build_operation(spec)?)?;
        }
        Ok(pipeline)
    }
}

fn parse_dependencies(spec: &PlanOperationSpec) -> Result<Vec<OperationId>> {
    spec.dependencies.iter().map(|d| OperationId::new(d.clone())).collect()
}

fn build_operation(spec: PlanOperationSpec) -> Result<Box<dyn Operation>> {
    let id = OperationId::new(spec.id.clone())?;
    let dependencies = parse_dependencies(&spec)?;

    let op: Box<dyn Operation> = match spec.kind.as_str() {
        "create_file" => {
            let path = spec.required_str("path")?;
            let mut builder =
                CreateFile::builder(id, path).content(spec.content()?).mode(spec.mode(0o644)?);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "create_directory" => {
            let path = spec.required_str("path")?;
            let mut builder = CreateDirectory::builder(id, path).mode(spec.mode(0o755)?);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "create_symlink" => {
            let path = spec.required_str("path")?;
            let target = spec.required_str("target")?;
            let mut builder = CreateSymlink::builder(id, path, target);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "create_archive" => {
            let path = spec.required_str("path")?;
            let format_name = spec.optional_str("format").unwrap_or_default();
            let format = ArchiveFormat::parse(&format_name)
                .or_else(|_| ArchiveFormat::from_path(&PathBuf::from(&path)))?;
            let mut builder =
                CreateArchive::builder(id, path, format).sources(spec.sources()).mode(spec.mode(0o644)?);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "unarchive" => {
            let archive_path = spec.required_str("archive_path")?;
            let extract_path = spec.required_str("extract_path")?;
            let mut builder = Unarchive::builder(id, archive_path, extract_path).overwrite(spec.overwrite());
            for pattern in spec.patterns() {
                builder = builder.pattern(pattern);
            }
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "copy" => {
            let src = spec.required_str("src")?;
            let dst = spec.required_str("dst")?;
            let mut builder = Copy::builder(id, src, dst);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "move" => {
            let src = spec.required_str("src")?;
            let dst = spec.required_str("dst")?;
            let mut builder = Move::builder(id, src, dst);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        "delete" => {
            let path = spec.required_str("path")?;
            let mut builder = Delete::builder(id, path);
            for dep in dependencies {
                builder = builder.depends_on(dep);
            }
            Box::new(builder.build())
        }
        other => return Err(Error::InvalidFormat(format!("unknown operation type: {other}"))),
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> PlanFile {
        serde_json::from_str(
            r#"{
                "metadata": { "version": "1.0", "description": "demo", "created_at": "2024-01-01T00:00:00Z" },
                "operations": [
                    { "type": "create_directory", "id": "mkdir", "dependencies": [], "parameters": { "path": "out" } },
                    { "type": "create_file", "id": "f1", "dependencies": ["mkdir"], "parameters": { "path": "out/a.txt", "content": "hi", "mode": "644" } }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn into_pipeline_builds_operations_with_dependencies() {
        let plan = sample_plan();
        let pipeline = plan.into_pipeline().unwrap();
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn content_defaults_to_utf8_text() {
        use crate::executor::{Executor, ExecutorOptions};
        use crate::fs::memory::MemoryFs;
        use std::io::Read;
        use std::path::Path;

        let fs = MemoryFs::new();
        let plan = sample_plan();
        let pipeline = plan.into_pipeline().unwrap();
        let executor = Executor::new(&fs, ExecutorOptions::new().resolve_prerequisites(false));
        let result = executor.run(pipeline);
        assert!(result.is_success(), "{:?}", result.error());
        let mut content = Vec::new();
        fs.open(Path::new("out/a.txt")).unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hi");
    }

    #[test]
    fn base64_content_encoding_is_decoded() {
        let spec = PlanOperationSpec {
            kind: "create_file".to_string(),
            id: "f1".to_string(),
            dependencies: Vec::new(),
            parameters: BTreeMap::from([
                ("path".to_string(), serde_json::Value::String("a.txt".to_string())),
                ("content".to_string(), serde_json::Value::String("aGVsbG8=".to_string())),
                ("content_encoding".to_string(), serde_json::Value::String("base64".to_string())),
            ]),
        };
        assert_eq!(spec.content().unwrap(), b"hello");
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let spec = PlanOperationSpec {
            kind: "teleport".to_string(),
            id: "x".to_string(),
            dependencies: Vec::new(),
            parameters: BTreeMap::new(),
        };
        assert!(build_operation(spec).is_err());
    }
}

//! The prerequisite resolver (C6): expands a resolved pipeline so that
//! every declared `parent_dir` prerequisite is satisfied, either
//! already (against the starting filesystem state) or by a
//! synthesized `create_directory` inserted earlier in the sequence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backup::BackupData;
use crate::budget::BackupBudget;
use crate::descriptor::OperationDescriptor;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::create_directory::CreateDirectory;
use crate::operation::{ExecutionContext, Operation};
use crate::pipeline::Pipeline;
use crate::prerequisite::{Prerequisite, PrerequisiteKind};

/// Wraps an existing, already-built operation to attach extra
/// dependency edges without mutating it — operations are immutable
/// once built, so the resolver expresses "depend on this synthesized
/// mkdir too" as a decorator rather than a field mutation.
struct WithExtraDeps {
    inner: Box<dyn Operation>,
    combined_dependencies: Vec<OperationId>,
}

impl std::fmt::Debug for WithExtraDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithExtraDeps").field("inner", &self.inner).finish()
    }
}

impl Operation for WithExtraDeps {
    fn id(&self) -> &OperationId {
        self.inner.id()
    }

    fn describe(&self) -> OperationDescriptor {
        self.inner.describe()
    }

    fn dependencies(&self) -> &[OperationId] {
        &self.combined_dependencies
    }

    fn conflicts(&self) -> &[OperationId] {
        self.inner.conflicts()
    }

    fn prerequisites(&self) -> Vec<Prerequisite> {
        self.inner.prerequisites()
    }

    fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        self.inner.validate(fs)
    }

    fn execute(&self, fs: &dyn FileSystem, ctx: &ExecutionContext) -> Result<()> {
        self.inner.execute(fs, ctx)
    }

    fn rollback(&self, fs: &dyn FileSystem) -> Result<()> {
        self.inner.rollback(fs)
    }

    fn reverse_ops(
        &self,
        fs: &dyn FileSystem,
        budget: &mut BackupBudget,
    ) -> Result<(Vec<Box<dyn Operation>>, BackupData)> {
        self.inner.reverse_ops(fs, budget)
    }
}

/// Expand `pipeline` so every declared `parent_dir` prerequisite holds
/// at its operation's position, synthesizing `create_directory`
/// operations for missing ancestor chains. `pipeline` must already be
/// resolved. `no_conflict`/`source_exists` prerequisites are never
/// synthesized for — an unmet one fails resolution immediately with
/// the same typed error `validate` would have produced.
pub fn resolve_prerequisites(mut pipeline: Pipeline, fs: &dyn FileSystem) -> Result<Pipeline> {
    pipeline.resolve()?;

    let existing_ids: std::collections::HashSet<OperationId> = pipeline.id_index().keys().cloned().collect();
    let mut synth_chain: HashMap<PathBuf, OperationId> = HashMap::new();
    let mut synthesized: Vec<Box<dyn Operation>> = Vec::new();
    let mut extra_deps: HashMap<OperationId, Vec<OperationId>> = HashMap::new();

    let operations = pipeline.into_operations();
    for op in &operations {
        for pre in op.prerequisites() {
            if pre.kind() != PrerequisiteKind::ParentDir {
                // no_conflict / source_exists: checked by validate()
                // later; resolution itself never synthesizes for them.
                continue;
            }
            let path = pre.path();
            if pre.validate(fs).is_ok() {
                continue;
            }
            let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
                continue;
            };
            if let Some(mkdir_id) =
                ensure_directory_chain(parent, fs, &existing_ids, &mut synth_chain, &mut synthesized)
            {
                extra_deps.entry(op.id().clone()).or_default().push(mkdir_id);
            }
        }
    }

    let mut resolved = Pipeline::new();
    for synth in synthesized {
        resolved.add(synth)?;
    }
    for op in operations {
        match extra_deps.remove(op.id()) {
            None => resolved.add(op)?,
            Some(extra) => {
                let mut combined_dependencies = op.dependencies().to_vec();
                combined_dependencies.extend(extra);
                resolved.add(Box::new(WithExtraDeps { inner: op, combined_dependencies }))?;
            }
        }
    }
    resolved.resolve()?;
    Ok(resolved)
}

/// Ensure a `create_directory` chain exists (synthesized, if missing)
/// for `dir` and all of its ancestors, returning the ID of the
/// innermost synthesized operation that a consumer should depend on —
/// or `None` if `dir` already exists on `fs` and nothing needed
/// synthesizing.
fn ensure_directory_chain(
    dir: &Path,
    fs: &dyn FileSystem,
    existing_ids: &std::collections::HashSet<OperationId>,
    synth_chain: &mut HashMap<PathBuf, OperationId>,
    synthesized: &mut Vec<Box<dyn Operation>>,
) -> Option<OperationId> {
    if fs.stat(dir).map(|m| m.is_dir).unwrap_or(false) {
        return None;
    }
    if let Some(id) = synth_chain.get(dir) {
        return Some(id.clone());
    }

    let id = OperationId::synth_mkdir(dir);
    // Cycle guard: a real operation already owns this ID — it wins,
    // and its own prerequisites are covered by the main resolution
    // pass, so nothing further is synthesized under this path.
    if existing_ids.contains(&id) {
        return Some(id);
    }

    let parent_dep = dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .and_then(|parent| ensure_directory_chain(parent, fs, existing_ids, synth_chain, synthesized));

    let mut builder = CreateDirectory::builder(id.clone(), dir.to_path_buf());
    if let Some(parent_dep) = parent_dep {
        builder = builder.depends_on(parent_dep);
    }
    synthesized.push(Box::new(builder.build()));
    synth_chain.insert(dir.to_path_buf(), id.clone());
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use crate::operation::create_file::CreateFile;
    use std::path::Path;

    #[test]
    fn synthesizes_full_mkdir_chain_for_nested_create_file() {
        let fs = MemoryFs::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "a/b/c.txt").build()))
            .unwrap();
        pipeline.resolve().unwrap();
        let resolved = resolve_prerequisites(pipeline, &fs).unwrap();
        let ids: Vec<_> = resolved.operations().map(|op| op.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["synth:mkdir:a", "synth:mkdir:a/b", "f1"]);
    }

    #[test]
    fn does_not_synthesize_when_parent_already_exists() {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("a"), 0o755).unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "a/c.txt").build())).unwrap();
        pipeline.resolve().unwrap();
        let resolved = resolve_prerequisites(pipeline, &fs).unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn resolve_is_idempotent_and_does_not_re_synthesize() {
        let fs = MemoryFs::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "a/b.txt").build()))
            .unwrap();
        pipeline.resolve().unwrap();
        let once = resolve_prerequisites(pipeline, &fs).unwrap();
        assert_eq!(once.len(), 2);
    }
}

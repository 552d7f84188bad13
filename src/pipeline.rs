//! The pipeline (C5): an append-only collection of operations plus
//! dependency-ordered resolution.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::id::OperationId;
use crate::operation::Operation;

/// A batch of operations, resolved into a single dependency-honoring
/// linear order before it can run. Duplicate IDs are rejected at
/// add-time; `resolve()` is idempotent.
#[derive(Default)]
pub struct Pipeline {
    operations: Vec<Box<dyn Operation>>,
    ids: HashMap<OperationId, usize>,
    resolved: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("len", &self.operations.len())
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Append an operation. Rejects a duplicate ID against anything
    /// already in the pipeline.
    pub fn add(&mut self, op: Box<dyn Operation>) -> Result<()> {
        let id = op.id().clone();
        if self.ids.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        self.ids.insert(id, self.operations.len());
        self.operations.push(op);
        self.resolved = false;
        Ok(())
    }

    /// Compute a linear order honoring declared dependencies (Kahn's
    /// algorithm, stable on insertion order for ties). Idempotent:
    /// calling this again on an already-resolved pipeline is a no-op.
    pub fn resolve(&mut self) -> Result<()> {
        if self.resolved {
            return Ok(());
        }

        let n = self.operations.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, op) in self.operations.iter().enumerate() {
            for dep in op.dependencies() {
                let Some(&dep_idx) = self.ids.get(dep) else {
                    return Err(Error::MissingDependency(op.id().clone(), dep.clone()));
                };
                dependents[dep_idx].push(i);
                indegree[i] += 1;
            }
        }

        // BTreeSet keyed by original insertion index gives a
        // deterministic, insertion-order-stable tie-break among
        // simultaneously-ready nodes.
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(next);
            for &dependent in &dependents[next] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != n {
            let mut placed = vec![false; n];
            for &idx in &order {
                placed[idx] = true;
            }
            let unresolved: Vec<OperationId> = (0..n)
                .filter(|&i| !placed[i])
                .map(|i| self.operations[i].id().clone())
                .collect();
            return Err(Error::CycleDetected(unresolved));
        }

        let mut reordered = Vec::with_capacity(n);
        let mut taken = self.operations.drain(..).map(Some).collect::<Vec<_>>();
        for idx in order {
            reordered.push(taken[idx].take().expect("each index appears exactly once"));
        }
        self.operations = reordered;
        self.ids = self
            .operations
            .iter()
            .enumerate()
            .map(|(new_idx, op)| (op.id().clone(), new_idx))
            .collect();
        self.resolved = true;
        Ok(())
    }

    /// Iterate operations in resolved order (insertion order if not
    /// yet resolved).
    pub fn operations(&self) -> impl Iterator<Item = &dyn Operation> {
        self.operations.iter().map(|op| op.as_ref())
    }

    /// Validate every resolved operation in order against `fs`.
    /// Collects failures only up to (and including) the first one;
    /// the caller decides whether to treat this as fatal.
    pub fn validate(&self, fs: &dyn FileSystem) -> Result<()> {
        for op in self.operations() {
            op.validate(fs)?;
        }
        Ok(())
    }

    /// Consume the pipeline, returning its operations in current
    /// (resolved, if resolved) order.
    pub fn into_operations(self) -> Vec<Box<dyn Operation>> {
        self.operations
    }

    pub(crate) fn id_index(&self) -> &HashMap<OperationId, usize> {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use crate::operation::create_file::CreateFile;

    fn file_op(id: &str, path: &str, deps: &[&str]) -> Box<dyn Operation> {
        let mut builder = CreateFile::builder(OperationId::new(id).unwrap(), path);
        for dep in deps {
            builder = builder.depends_on(OperationId::new(*dep).unwrap());
        }
        Box::new(builder.build())
    }

    #[test]
    fn resolve_orders_by_dependency() {
        let mut pipeline = Pipeline::new();
        pipeline.add(file_op("b", "b.txt", &["a"])).unwrap();
        pipeline.add(file_op("a", "a.txt", &[])).unwrap();
        pipeline.resolve().unwrap();
        let ids: Vec<_> = pipeline.operations().map(|op| op.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut pipeline = Pipeline::new();
        pipeline.add(file_op("a", "a.txt", &[])).unwrap();
        pipeline.resolve().unwrap();
        pipeline.resolve().unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let mut pipeline = Pipeline::new();
        pipeline.add(file_op("a", "a.txt", &[])).unwrap();
        assert!(pipeline.add(file_op("a", "other.txt", &[])).is_err());
    }

    #[test]
    fn resolve_detects_cycles() {
        let mut pipeline = Pipeline::new();
        pipeline.add(file_op("a", "a.txt", &["b"])).unwrap();
        pipeline.add(file_op("b", "b.txt", &["a"])).unwrap();
        assert!(matches!(pipeline.resolve(), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn resolve_reports_missing_dependency() {
        let mut pipeline = Pipeline::new();
        pipeline.add(file_op("a", "a.txt", &["ghost"])).unwrap();
        assert!(matches!(pipeline.resolve(), Err(Error::MissingDependency(_, _))));
    }

    #[test]
    fn validate_runs_against_resolved_order() {
        let fs = MemoryFs::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(file_op("a", "a.txt", &[])).unwrap();
        pipeline.resolve().unwrap();
        pipeline.validate(&fs).unwrap();
    }
}

//! The executor (C7): validates, then runs, a resolved pipeline
//! against a filesystem adapter, optionally capturing reverse-ops for
//! a restorable run and publishing progress onto an event bus.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::budget::BackupBudget;
use crate::error::Error;
use crate::events::{
    Event, EventBus, EventPayload, TOPIC_BACKUP_REJECTED, TOPIC_COMPLETED, TOPIC_FAILED, TOPIC_STARTED,
};
use crate::fs::memory::MemoryFs;
use crate::fs::{DirEntry, FileSystem, Metadata};
use crate::operation::{ExecutionContext, Operation, OperationResult, OperationStatus};
use crate::pipeline::Pipeline;
use crate::resolver::resolve_prerequisites;

/// Run options, built the way the teacher's transaction options are:
/// a plain struct with chained `with_*` setters rather than a
/// constructor taking every field positionally.
#[derive(Clone)]
pub struct ExecutorOptions {
    restorable: bool,
    max_backup_mb: f64,
    dry_run: bool,
    resolve_prerequisites: bool,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            restorable: false,
            max_backup_mb: 0.0,
            dry_run: false,
            resolve_prerequisites: true,
            deadline: None,
            cancel: None,
        }
    }
}

impl ExecutorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restorable(mut self, restorable: bool) -> Self {
        self.restorable = restorable;
        self
    }

    pub fn max_backup_mb(mut self, max_backup_mb: f64) -> Self {
        self.max_backup_mb = max_backup_mb;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn resolve_prerequisites(mut self, resolve: bool) -> Self {
        self.resolve_prerequisites = resolve;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.load(Ordering::SeqCst)).unwrap_or(false)
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

/// The rollback closure built by a run: iterates operations that
/// executed successfully, in reverse order, calling each one's best-
/// effort `rollback(fs)`.
pub struct RollbackHandle<'a> {
    fs: &'a dyn FileSystem,
    executed_reverse: Vec<Box<dyn Operation>>,
}

impl<'a> RollbackHandle<'a> {
    fn empty(fs: &'a dyn FileSystem) -> Self {
        Self { fs, executed_reverse: Vec::new() }
    }

    /// Roll back every successfully-executed operation, most-recent
    /// first. Each operation's own `rollback` is idempotent against a
    /// state it has already undone, so calling this more than once is
    /// safe and a no-op after the first successful call.
    pub fn rollback(&self) -> Result<(), Error> {
        let mut per_op = std::collections::BTreeMap::new();
        for op in &self.executed_reverse {
            if let Err(e) = op.rollback(self.fs) {
                per_op.insert(op.id().clone(), e);
            }
        }
        if per_op.is_empty() {
            Ok(())
        } else {
            let original = Box::new(Error::PipelineFailed(per_op.len()));
            Err(Error::RollbackFailure { original, per_op })
        }
    }
}

/// The outcome of a run (§3's `Result`, renamed to avoid shadowing
/// `std::result::Result`).
pub struct RunResult<'a> {
    pub overall_success: bool,
    pub per_op: Vec<OperationResult>,
    pub total_duration: Duration,
    pub aggregated_errors: Vec<String>,
    pub rollback: RollbackHandle<'a>,
    pub restore_ops: Option<Vec<Box<dyn Operation>>>,
    pub budget: Option<BackupBudget>,
}

impl<'a> RunResult<'a> {
    pub fn is_success(&self) -> bool {
        self.overall_success
    }

    /// A human-readable summary of the first failure, if any.
    pub fn error(&self) -> Option<&str> {
        self.aggregated_errors.first().map(|s| s.as_str())
    }
}

/// Runs a pipeline against a filesystem adapter. Holds no state across
/// runs beyond its configuration.
pub struct Executor<'a> {
    fs: &'a dyn FileSystem,
    options: ExecutorOptions,
    events: Option<Arc<EventBus>>,
}

impl<'a> Executor<'a> {
    pub fn new(fs: &'a dyn FileSystem, options: ExecutorOptions) -> Self {
        Self { fs, options, events: None }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, topic: &str, payload: EventPayload) {
        if let Some(bus) = &self.events {
            bus.publish(Event { topic: topic.to_string(), payload });
        }
    }

    pub fn run(&self, pipeline: Pipeline) -> RunResult<'a> {
        let start = Instant::now();

        let pipeline = if self.options.resolve_prerequisites {
            match resolve_prerequisites(pipeline, self.fs) {
                Ok(p) => p,
                Err(e) => return self.early_exit(start, e),
            }
        } else {
            pipeline
        };

        let mut pipeline = pipeline;
        if let Err(e) = pipeline.resolve() {
            return self.early_exit(start, e);
        }

        let overlay;
        let fs: &dyn FileSystem = if self.options.dry_run {
            overlay = DryRunFs::new(self.fs);
            &overlay
        } else {
            self.fs
        };

        let ops = pipeline.into_operations();

        // Pre-validate the whole sequence before mutating anything real.
        // A later operation's prerequisites may only hold once earlier
        // operations in this same run have taken effect (I2), so this
        // walks the sequence against a throwaway overlay seeded from
        // `fs`, simulating each op's execution to advance that overlay's
        // state before validating the next one — not against `fs`
        // itself, which stays untouched until the real run below.
        let simulation = DryRunFs::new(fs);
        let sim_ctx = ExecutionContext { dry_run: true };
        let mut per_op = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            let outcome = op.validate(&simulation).and_then(|()| op.execute(&simulation, &sim_ctx));
            if let Err(e) = outcome {
                per_op.push(OperationResult {
                    op_id: op.id().clone(),
                    operation_ref: op.describe(),
                    status: OperationStatus::ValidationFailed,
                    error: Some(e),
                    duration: Duration::ZERO,
                    backup: None,
                });
                for skipped in &ops[i + 1..] {
                    per_op.push(skipped_result(skipped));
                }
                return RunResult {
                    overall_success: false,
                    per_op,
                    total_duration: start.elapsed(),
                    aggregated_errors: vec!["validation failed".to_string()],
                    rollback: RollbackHandle::empty(self.fs),
                    restore_ops: None,
                    budget: None,
                };
            }
        }

        let mut budget = BackupBudget::new(self.options.max_backup_mb);
        let mut aggregated_errors = Vec::new();
        let mut overall_success = true;
        let mut executed_reverse: Vec<Box<dyn Operation>> = Vec::new();
        let mut per_op_reverse: Vec<Vec<Box<dyn Operation>>> = Vec::new();
        let mut executed_ops: Vec<Box<dyn Operation>> = Vec::new();

        let ctx = ExecutionContext { dry_run: self.options.dry_run };
        let mut ops = ops.into_iter();
        let mut remaining_after_stop: Vec<Box<dyn Operation>> = Vec::new();

        while let Some(op) = ops.next() {
            if self.options.is_cancelled() || self.options.deadline_passed() {
                per_op.push(skipped_result(op.as_ref()));
                for skipped in ops.by_ref() {
                    per_op.push(skipped_result(skipped.as_ref()));
                }
                aggregated_errors.push(Error::Cancelled.to_string());
                overall_success = false;
                break;
            }

            self.publish(
                TOPIC_STARTED,
                EventPayload::new(op.id().clone(), op.describe().kind, op.describe().primary_path),
            );

            let mut backup = None;
            let mut pending_reverse_ops = None;
            if self.options.restorable {
                match op.reverse_ops(fs, &mut budget) {
                    Ok((reverse_ops, backup_data)) => {
                        if let Some(exceeded) = backup_data.rejected {
                            self.publish(
                                TOPIC_BACKUP_REJECTED,
                                EventPayload::new(op.id().clone(), op.describe().kind, op.describe().primary_path)
                                    .with_backup_rejected(exceeded.wanted_mb, exceeded.remaining_mb),
                            );
                        }
                        backup = Some(backup_data);
                        pending_reverse_ops = Some(reverse_ops);
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        self.publish(
                            TOPIC_FAILED,
                            EventPayload::new(op.id().clone(), op.describe().kind, op.describe().primary_path)
                                .with_error(msg.clone()),
                        );
                        per_op.push(OperationResult {
                            op_id: op.id().clone(),
                            operation_ref: op.describe(),
                            status: OperationStatus::Failed,
                            error: Some(e),
                            duration: Duration::ZERO,
                            backup: None,
                        });
                        aggregated_errors.push(msg);
                        overall_success = false;
                        remaining_after_stop = ops.collect();
                        break;
                    }
                }
            }

            let t0 = Instant::now();
            match op.execute(fs, &ctx) {
                Ok(()) => {
                    let duration = t0.elapsed();
                    self.publish(
                        TOPIC_COMPLETED,
                        EventPayload::new(op.id().clone(), op.describe().kind, op.describe().primary_path)
                            .with_duration(duration),
                    );
                    if let Some(reverse_ops) = pending_reverse_ops {
                        per_op_reverse.push(reverse_ops);
                    }
                    per_op.push(OperationResult {
                        op_id: op.id().clone(),
                        operation_ref: op.describe(),
                        status: OperationStatus::Success,
                        error: None,
                        duration,
                        backup,
                    });
                    executed_ops.push(op);
                }
                Err(e) => {
                    let duration = t0.elapsed();
                    let msg = e.to_string();
                    self.publish(
                        TOPIC_FAILED,
                        EventPayload::new(op.id().clone(), op.describe().kind, op.describe().primary_path)
                            .with_duration(duration)
                            .with_error(msg.clone()),
                    );
                    per_op.push(OperationResult {
                        op_id: op.id().clone(),
                        operation_ref: op.describe(),
                        status: OperationStatus::Failed,
                        error: Some(e),
                        duration,
                        backup,
                    });
                    aggregated_errors.push(msg);
                    overall_success = false;
                    remaining_after_stop = ops.collect();
                    break;
                }
            }
        }

        for skipped in &remaining_after_stop {
            per_op.push(skipped_result(skipped.as_ref()));
        }

        executed_reverse.extend(executed_ops.into_iter().rev());

        let restore_ops = if self.options.restorable {
            Some(per_op_reverse.into_iter().rev().flatten().collect())
        } else {
            None
        };

        RunResult {
            overall_success,
            per_op,
            total_duration: start.elapsed(),
            aggregated_errors,
            rollback: RollbackHandle { fs: self.fs, executed_reverse },
            restore_ops,
            budget: self.options.restorable.then_some(budget),
        }
    }

    fn early_exit(&self, start: Instant, e: Error) -> RunResult<'a> {
        RunResult {
            overall_success: false,
            per_op: Vec::new(),
            total_duration: start.elapsed(),
            aggregated_errors: vec![e.to_string()],
            rollback: RollbackHandle::empty(self.fs),
            restore_ops: None,
            budget: None,
        }
    }
}

fn skipped_result(op: &dyn Operation) -> OperationResult {
    OperationResult {
        op_id: op.id().clone(),
        operation_ref: op.describe(),
        status: OperationStatus::Skipped,
        error: None,
        duration: Duration::ZERO,
        backup: None,
    }
}

/// The dry-run adapter (§4.6): reads fall through to the real
/// filesystem unless overridden, writes land only in an in-memory
/// overlay, and removed paths are tombstoned so subsequent reads
/// report them as gone without ever touching the real filesystem.
struct DryRunFs<'a> {
    base: &'a dyn FileSystem,
    overlay: MemoryFs,
    removed: std::sync::Mutex<std::collections::HashSet<PathBuf>>,
}

impl<'a> DryRunFs<'a> {
    fn new(base: &'a dyn FileSystem) -> Self {
        Self { base, overlay: MemoryFs::new(), removed: std::sync::Mutex::new(std::collections::HashSet::new()) }
    }

    fn is_removed(&self, path: &Path) -> bool {
        let removed = self.removed.lock().expect("dry-run lock poisoned");
        path.ancestors().any(|ancestor| removed.contains(ancestor))
    }

    fn unmark_removed(&self, path: &Path) {
        let mut removed = self.removed.lock().expect("dry-run lock poisoned");
        removed.remove(path);
    }

    fn mark_removed(&self, path: &Path) {
        let mut removed = self.removed.lock().expect("dry-run lock poisoned");
        removed.insert(path.to_path_buf());
    }

    fn ensure_overlay_parent(&self, path: &Path) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = self.overlay.mkdir_all(parent, 0o755);
        }
    }
}

impl<'a> FileSystem for DryRunFs<'a> {
    fn open(&self, path: &Path) -> Result<Box<dyn std::io::Read + '_>, crate::error::FsError> {
        if self.is_removed(path) {
            return Err(crate::error::FsError::new(path, crate::error::FsErrorKind::NotFound));
        }
        match self.overlay.open(path) {
            Ok(r) => Ok(r),
            Err(_) => self.base.open(path),
        }
    }

    fn stat(&self, path: &Path) -> Result<Metadata, crate::error::FsError> {
        if self.is_removed(path) {
            return Err(crate::error::FsError::new(path, crate::error::FsErrorKind::NotFound));
        }
        match self.overlay.stat(path) {
            Ok(m) => Ok(m),
            Err(_) => self.base.stat(path),
        }
    }

    fn write_file(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<(), crate::error::FsError> {
        self.ensure_overlay_parent(path);
        self.overlay.write_file(path, bytes, mode)?;
        self.unmark_removed(path);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<(), crate::error::FsError> {
        self.ensure_overlay_parent(path);
        self.overlay.mkdir_all(path, mode)?;
        self.unmark_removed(path);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), crate::error::FsError> {
        let _ = self.overlay.remove(path);
        self.mark_removed(path);
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<(), crate::error::FsError> {
        let _ = self.overlay.remove_tree(path);
        self.mark_removed(path);
        Ok(())
    }

    fn symlink(&self, target: &Path, link_path: &Path) -> Result<(), crate::error::FsError> {
        self.ensure_overlay_parent(link_path);
        self.overlay.symlink(target, link_path)?;
        self.unmark_removed(link_path);
        Ok(())
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf, crate::error::FsError> {
        if self.is_removed(path) {
            return Err(crate::error::FsError::new(path, crate::error::FsErrorKind::NotFound));
        }
        match self.overlay.readlink(path) {
            Ok(t) => Ok(t),
            Err(_) => self.base.readlink(path),
        }
    }

    fn rename(&self, old: &Path, new: &Path) -> Result<(), crate::error::FsError> {
        let mut content = Vec::new();
        use std::io::Read;
        self.open(old)?.read_to_end(&mut content).map_err(|e| crate::error::FsError::from_io(old, e))?;
        let meta = self.stat(old)?;
        self.write_file(new, &content, meta.mode)?;
        self.remove(old)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, crate::error::FsError> {
        if self.is_removed(path) {
            return Err(crate::error::FsError::new(path, crate::error::FsErrorKind::NotFound));
        }
        match self.overlay.read_dir(path) {
            Ok(entries) => Ok(entries),
            Err(_) => self.base.read_dir(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::OperationId;
    use crate::operation::create_file::CreateFile;
    use crate::operation::delete::Delete;
    use std::path::Path;

    #[test]
    fn run_executes_resolved_order_and_emits_events() {
        let fs = MemoryFs::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "a/b.txt").content(b"hi".to_vec()).build()))
            .unwrap();
        let bus = Arc::new(EventBus::new());
        let starts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let starts2 = Arc::clone(&starts);
        bus.subscribe(TOPIC_STARTED, move |_| {
            starts2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        let executor = Executor::new(&fs, ExecutorOptions::new()).with_events(Arc::clone(&bus));
        let result = executor.run(pipeline);
        assert!(result.is_success());
        assert!(fs.stat(Path::new("a/b.txt")).is_ok());
        assert!(starts.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[test]
    fn run_stops_after_first_failure_and_skips_the_rest() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("conflict.txt"), b"already here", 0o644).unwrap();
        let mut pipeline = Pipeline::new();
        pipeline
            .add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "conflict.txt").build()))
            .unwrap();
        pipeline
            .add(Box::new(
                CreateFile::builder(OperationId::new("f2").unwrap(), "ok.txt")
                    .depends_on(OperationId::new("f1").unwrap())
                    .build(),
            ))
            .unwrap();
        let executor = Executor::new(&fs, ExecutorOptions::new().resolve_prerequisites(false));
        let result = executor.run(pipeline);
        assert!(!result.is_success());
        assert_eq!(result.per_op.len(), 2);
        assert_eq!(result.per_op[0].status, OperationStatus::ValidationFailed);
        assert_eq!(result.per_op[1].status, OperationStatus::Skipped);
    }

    #[test]
    fn restorable_run_produces_working_restore_ops() {
        let fs = MemoryFs::new();
        fs.write_file(Path::new("a.txt"), b"hello", 0o644).unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(Box::new(Delete::builder(OperationId::new("d1").unwrap(), "a.txt").build())).unwrap();
        let executor = Executor::new(&fs, ExecutorOptions::new().restorable(true).max_backup_mb(10.0));
        let result = executor.run(pipeline);
        assert!(result.is_success());
        assert!(fs.stat(Path::new("a.txt")).is_err());
        let restore_ops = result.restore_ops.expect("restorable run produces restore_ops");
        for op in &restore_ops {
            op.execute(&fs, &ExecutionContext::default()).unwrap();
        }
        assert!(fs.stat(Path::new("a.txt")).is_ok());
    }

    #[test]
    fn dry_run_does_not_touch_the_real_filesystem() {
        let fs = MemoryFs::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "new.txt").build())).unwrap();
        let executor = Executor::new(&fs, ExecutorOptions::new().dry_run(true));
        let result = executor.run(pipeline);
        assert!(result.is_success());
        assert!(fs.stat(Path::new("new.txt")).is_err());
    }

    #[test]
    fn rollback_closure_undoes_successful_create_and_is_idempotent() {
        let fs = MemoryFs::new();
        let mut pipeline = Pipeline::new();
        pipeline.add(Box::new(CreateFile::builder(OperationId::new("f1").unwrap(), "a.txt").build())).unwrap();
        let executor = Executor::new(&fs, ExecutorOptions::new());
        let result = executor.run(pipeline);
        assert!(result.is_success());
        assert!(fs.stat(Path::new("a.txt")).is_ok());
        result.rollback.rollback().unwrap();
        assert!(fs.stat(Path::new("a.txt")).is_err());
        result.rollback.rollback().unwrap();
    }
}

//! Backup data captured by the reverse-op engine (C8).

use std::path::PathBuf;
use std::time::SystemTime;

use crate::budget::BudgetExceeded;
use crate::id::OperationId;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// The kind of backup captured for an operation, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    None,
    File,
    DirectoryTree,
}

/// One entry in a `directory_tree` backup (§4.7): a directory or file
/// discovered while walking the pre-order tree, relative to the
/// deleted root.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeItem {
    pub relative_path: PathBuf,
    pub is_dir: bool,
    pub mode: u32,
    pub size: u64,
    pub content: Option<Vec<u8>>,
}

/// Content captured so a destructive operation can be undone (§3).
#[derive(Debug, Clone)]
pub struct BackupData {
    pub op_id: OperationId,
    pub kind: BackupKind,
    pub original_path: PathBuf,
    pub content: Option<Vec<u8>>,
    pub mode: Option<u32>,
    pub taken_at: SystemTime,
    pub size_mb: f64,
    /// For `directory_tree` backups: the walked entries, kept in the
    /// order §4.7 requires for reverse-op emission — directories
    /// before files, each group ordered by ascending depth then
    /// lexical path. Empty for `file`/`none` backups.
    pub metadata: Vec<TreeItem>,
    /// Set when a restorable run's budget rejected this backup
    /// (§4.3's "budget rejection" path, §7's advisory `backup_rejected`).
    /// `kind` is still `None` in that case; this carries the detail a
    /// caller or the executor's advisory event wants to report.
    pub rejected: Option<BudgetExceeded>,
}

impl BackupData {
    pub fn none(op_id: OperationId, original_path: PathBuf) -> Self {
        Self {
            op_id,
            kind: BackupKind::None,
            original_path,
            content: None,
            mode: None,
            taken_at: SystemTime::now(),
            size_mb: 0.0,
            metadata: Vec::new(),
            rejected: None,
        }
    }

    pub fn budget_rejected(op_id: OperationId, original_path: PathBuf, exceeded: BudgetExceeded) -> Self {
        Self { rejected: Some(exceeded), ..Self::none(op_id, original_path) }
    }

    pub fn file(op_id: OperationId, original_path: PathBuf, content: Vec<u8>, mode: u32) -> Self {
        let size_mb = content.len() as f64 / BYTES_PER_MB;
        Self {
            op_id,
            kind: BackupKind::File,
            original_path,
            content: Some(content),
            mode: Some(mode),
            taken_at: SystemTime::now(),
            size_mb,
            metadata: Vec::new(),
            rejected: None,
        }
    }

    pub fn directory_tree(
        op_id: OperationId,
        original_path: PathBuf,
        size_mb: f64,
        metadata: Vec<TreeItem>,
    ) -> Self {
        Self {
            op_id,
            kind: BackupKind::DirectoryTree,
            original_path,
            content: None,
            mode: None,
            taken_at: SystemTime::now(),
            size_mb,
            metadata,
            rejected: None,
        }
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// The per-entry budget constant charged for a directory entry in a
/// `directory_tree` backup (§4.7): small enough to be negligible for
/// normal trees, large enough to bound pathological entry counts.
pub const DIR_ENTRY_MB: f64 = 0.01;

/// Sort key for reverse-op emission order (§4.7): directories before
/// files, each group ordered by ascending depth then lexical path.
pub fn tree_restore_order(mut items: Vec<TreeItem>) -> Vec<TreeItem> {
    items.sort_by(|a, b| {
        let depth_a = a.relative_path.components().count();
        let depth_b = b.relative_path.components().count();
        (!a.is_dir, depth_a, &a.relative_path).cmp(&(!b.is_dir, depth_b, &b.relative_path))
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str, is_dir: bool) -> TreeItem {
        TreeItem { relative_path: PathBuf::from(path), is_dir, mode: 0o644, size: 0, content: None }
    }

    #[test]
    fn restore_order_puts_directories_before_files_by_depth() {
        let items = vec![
            item("sub/f2.txt", false),
            item("f1.txt", false),
            item("sub", true),
            item("", true),
        ];
        let ordered = tree_restore_order(items);
        let paths: Vec<_> = ordered.iter().map(|i| i.relative_path.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, vec!["", "sub", "f1.txt", "sub/f2.txt"]);
    }
}

//! Reverting logged renames and moves.
//!
//! Steps are planned from operation records read newest first, so replaying
//! them in order walks a file back through its move and then its rename.
//! Executing the plan is [`FileExecutor::undo`](super::FileExecutor::undo).

use std::path::PathBuf;

use serde_json::Value;

use crate::oplog::{OperationKind, OperationRecord};

/// One file to put back where it was before a logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoStep {
    /// Operation being reverted.
    pub operation: OperationKind,
    /// Where the operation left the file.
    pub current: PathBuf,
    /// Where the file was before the operation.
    pub original: PathBuf,
}

/// What an undo run did, or would do in a dry run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UndoReport {
    /// Original paths that were restored.
    pub restored: Vec<PathBuf>,
    /// Files that no longer exist where the log left them.
    pub missing: Vec<PathBuf>,
    /// Original paths that are occupied by another file.
    pub conflicts: Vec<PathBuf>,
    /// Files that could not be moved back, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl UndoReport {
    /// Number of steps that were not restored.
    pub fn skipped(&self) -> usize {
        self.missing.len() + self.conflicts.len() + self.failed.len()
    }
}

fn flag(record: &OperationRecord, key: &str) -> bool {
    record.details.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Turns operation records, newest first, into undo steps in replay order.
///
/// Only successful operations that touched the filesystem are reverted. Dry
/// runs and failures are skipped, and so is any operation a later undo
/// already reverted.
pub fn plan_undo(records: &[OperationRecord]) -> Vec<UndoStep> {
    let mut reverted: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut steps = Vec::new();

    for record in records {
        let Some(destination) = record.destination.as_ref() else {
            continue;
        };
        if !record.success || flag(record, "dry_run") || *destination == record.source {
            continue;
        }

        if flag(record, "undo") {
            reverted.push((record.source.clone(), destination.clone()));
            continue;
        }
        if let Some(index) = reverted
            .iter()
            .position(|(from, to)| from == destination && *to == record.source)
        {
            reverted.swap_remove(index);
            continue;
        }

        steps.push(UndoStep {
            operation: record.operation,
            current: destination.clone(),
            original: record.source.clone(),
        });
    }

    steps
}

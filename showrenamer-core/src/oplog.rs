//! Append-only record of every rename and move attempt.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Kind of filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Rename within the same directory.
    Rename,
    /// Move into the library.
    Move,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Rename => f.pad("rename"),
            OperationKind::Move => f.pad("move"),
        }
    }
}

/// One logged attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Rename or move.
    pub operation: OperationKind,
    /// Path before the operation.
    pub source: PathBuf,
    /// Intended path, if one was known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    /// Whether the file ended up at `destination`.
    pub success: bool,
    /// Free-form extras such as `error`, `dry_run` or `undo`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl OperationRecord {
    /// Record stamped with the current time.
    pub fn new(
        operation: OperationKind,
        source: impl Into<PathBuf>,
        destination: Option<PathBuf>,
        success: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            source: source.into(),
            destination,
            success,
            details: Value::Null,
        }
    }

    /// Replaces the details object.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// True when `path` is this record's source or destination.
    pub fn involves(&self, path: &Path) -> bool {
        self.source == path || self.destination.as_deref() == Some(path)
    }
}

/// Sink for operation records.
///
/// Recording never fails the caller; implementations log their own errors.
pub trait OperationLog: Send + Sync {
    /// Stores one record.
    fn record(&self, record: OperationRecord);
}

/// JSON Lines file, one record per line.
#[derive(Debug)]
pub struct JsonLinesOperationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesOperationLog {
    /// Log at `path`; the file and its folder are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &OperationRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    fn read_all(&self) -> io::Result<Vec<OperationRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping unreadable operation record"
                ),
            }
        }
        Ok(records)
    }

    /// Newest first, at most `limit` records.
    pub fn recent(&self, limit: usize) -> io::Result<Vec<OperationRecord>> {
        let mut records = self.read_all()?;
        newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    /// Every record where `path` was the source or the destination, newest first.
    pub fn for_file(&self, path: &Path) -> io::Result<Vec<OperationRecord>> {
        let mut records: Vec<_> = self
            .read_all()?
            .into_iter()
            .filter(|record| record.involves(path))
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    /// Records for `path` and every name it had before or after, following
    /// successful renames and moves in both directions. Newest first.
    pub fn lineage(&self, path: &Path) -> io::Result<Vec<OperationRecord>> {
        let records = self.read_all()?;

        let mut names = HashSet::from([path.to_path_buf()]);
        loop {
            let known = names.len();
            for record in records.iter().filter(|record| record.success) {
                let Some(destination) = &record.destination else {
                    continue;
                };
                if names.contains(&record.source) || names.contains(destination) {
                    names.insert(record.source.clone());
                    names.insert(destination.clone());
                }
            }
            if names.len() == known {
                break;
            }
        }

        let mut related: Vec<_> = records
            .into_iter()
            .filter(|record| {
                names.contains(&record.source)
                    || record.destination.as_ref().is_some_and(|dest| names.contains(dest))
            })
            .collect();
        newest_first(&mut related);
        Ok(related)
    }
}

impl OperationLog for JsonLinesOperationLog {
    fn record(&self, record: OperationRecord) {
        if let Err(err) = self.append(&record) {
            warn!(
                path = %self.path.display(),
                operation = %record.operation,
                error = %err,
                "failed to append operation record"
            );
        }
    }
}

/// Latest timestamp first; records with equal timestamps keep reverse
/// append order.
fn newest_first(records: &mut [OperationRecord]) {
    records.reverse();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// In-memory log for one-shot runs and tests.
#[derive(Debug, Default)]
pub struct MemoryOperationLog {
    records: Mutex<Vec<OperationRecord>>,
}

impl MemoryOperationLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn records(&self) -> Vec<OperationRecord> {
        self.records.lock().clone()
    }
}

impl OperationLog for MemoryOperationLog {
    fn record(&self, record: OperationRecord) {
        self.records.lock().push(record);
    }
}

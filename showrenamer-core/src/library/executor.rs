//! Renames and moves episode files, recording every attempt.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use super::show_directory::ShowDirectoryResolver;
use super::undo::{UndoReport, UndoStep};
use crate::error::ExecutorError;
use crate::oplog::{OperationKind, OperationLog, OperationRecord};

/// How a file reached its library folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Same-filesystem rename.
    Renamed,
    /// Copy, size check, delete. `source_removed` is false when the copy
    /// landed but the original could not be deleted.
    Copied { source_removed: bool },
    /// Dry run; nothing was touched.
    Planned,
}

/// Result of a successful [`FileExecutor::relocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Final path inside the library.
    pub destination: PathBuf,
    /// How the file got there.
    pub method: MoveMethod,
}

/// Performs renames and library moves, logging each attempt.
pub struct FileExecutor {
    resolver: RwLock<Arc<ShowDirectoryResolver>>,
    log: Arc<dyn OperationLog>,
    dry_run: bool,
}

impl std::fmt::Debug for FileExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileExecutor")
            .field("resolver", &*self.resolver.read())
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl FileExecutor {
    /// Executor filing into `resolver`'s library; `dry_run` only records.
    pub fn new(resolver: ShowDirectoryResolver, log: Arc<dyn OperationLog>, dry_run: bool) -> Self {
        Self {
            resolver: RwLock::new(Arc::new(resolver)),
            log,
            dry_run,
        }
    }

    /// True when files are never touched.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Swaps in a resolver built from fresh library settings.
    pub fn set_resolver(&self, resolver: ShowDirectoryResolver) {
        *self.resolver.write() = Arc::new(resolver);
    }

    /// Current resolver snapshot.
    pub fn resolver(&self) -> Arc<ShowDirectoryResolver> {
        self.resolver.read().clone()
    }

    /// Renames `path` within its directory.
    ///
    /// An unchanged name is a successful no-op. Refuses to replace a different
    /// file that already carries `new_name`.
    pub fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf, ExecutorError> {
        let target = match path.parent() {
            Some(parent) => parent.join(new_name),
            None => PathBuf::from(new_name),
        };
        if target == path {
            debug!(path = %path.display(), "file already has its canonical name");
            return Ok(target);
        }

        if self.dry_run {
            info!(from = %path.display(), to = %target.display(), "dry run: would rename");
            self.record(OperationKind::Rename, path, &target, true, json!({"dry_run": true}));
            return Ok(target);
        }

        if target.symlink_metadata().is_ok() && !same_file(path, &target) {
            self.record(
                OperationKind::Rename,
                path,
                &target,
                false,
                json!({"error": "destination exists"}),
            );
            return Err(ExecutorError::DestinationExists(target));
        }

        match std::fs::rename(path, &target) {
            Ok(()) => {
                info!(from = %path.display(), to = %target.display(), "renamed");
                self.record(OperationKind::Rename, path, &target, true, serde_json::Value::Null);
                Ok(target)
            }
            Err(err) => {
                self.record(
                    OperationKind::Rename,
                    path,
                    &target,
                    false,
                    json!({"error": err.to_string()}),
                );
                Err(ExecutorError::io("rename", path, err))
            }
        }
    }

    /// Moves `source` into the library folder for `show`/`season`.
    pub fn relocate(&self, source: &Path, show: &str, season: u32) -> Result<Relocation, ExecutorError> {
        self.relocate_with(source, show, season, |from, to| std::fs::rename(from, to), |from, to| {
            std::fs::copy(from, to)
        })
    }

    fn relocate_with<R, C>(
        &self,
        source: &Path,
        show: &str,
        season: u32,
        rename: R,
        copy: C,
    ) -> Result<Relocation, ExecutorError>
    where
        R: FnOnce(&Path, &Path) -> io::Result<()>,
        C: FnOnce(&Path, &Path) -> io::Result<u64>,
    {
        let resolver = self.resolver();
        let target_dir = match resolver.target_directory(show, season, !self.dry_run) {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                self.record_failure(source, None, json!({"error": "no show directory", "show": show}));
                return Err(ExecutorError::NoShowDirectory {
                    show: show.to_string(),
                });
            }
            Err(err) => {
                self.record_failure(source, None, json!({"error": err.to_string(), "show": show}));
                return Err(err);
            }
        };

        let file_name = source
            .file_name()
            .ok_or_else(|| ExecutorError::io("move", source, io::ErrorKind::InvalidInput.into()))?;
        let destination = target_dir.join(file_name);

        if destination.symlink_metadata().is_ok() {
            warn!(destination = %destination.display(), "destination already exists; not moving");
            self.record_failure(
                source,
                Some(&destination),
                json!({"error": "destination exists"}),
            );
            return Err(ExecutorError::DestinationExists(destination));
        }

        if self.dry_run {
            info!(from = %source.display(), to = %destination.display(), "dry run: would move");
            self.record(OperationKind::Move, source, &destination, true, json!({"dry_run": true}));
            return Ok(Relocation {
                destination,
                method: MoveMethod::Planned,
            });
        }

        match move_file_with(source, &destination, rename, copy) {
            Ok(method) => {
                info!(from = %source.display(), to = %destination.display(), ?method, "moved");
                let details = match method {
                    MoveMethod::Copied { source_removed } => {
                        json!({"cross_device": true, "source_removed": source_removed})
                    }
                    _ => serde_json::Value::Null,
                };
                self.record(OperationKind::Move, source, &destination, true, details);
                Ok(Relocation {
                    destination,
                    method,
                })
            }
            Err(err) => {
                self.record_failure(source, Some(&destination), json!({"error": err.to_string()}));
                Err(err)
            }
        }
    }

    /// Moves files back to where the logged operations found them.
    ///
    /// Steps run in order. A file that is gone is skipped, and an occupied
    /// original path is never overwritten. Each attempt is logged with
    /// `"undo": true` so a later run does not revert it again.
    pub fn undo(&self, steps: &[UndoStep]) -> UndoReport {
        let mut report = UndoReport::default();
        // Dry runs track where files would be so chained steps resolve.
        let mut planned = HashSet::new();
        let mut vacated = HashSet::new();

        for step in steps {
            if !present(&step.current, &planned, &vacated) {
                warn!(path = %step.current.display(), "file no longer exists; nothing to restore");
                report.missing.push(step.current.clone());
                continue;
            }
            if present(&step.original, &planned, &vacated) {
                warn!(path = %step.original.display(), "original path is taken; not restoring");
                self.record(
                    step.operation,
                    &step.current,
                    &step.original,
                    false,
                    json!({"undo": true, "error": "destination exists"}),
                );
                report.conflicts.push(step.original.clone());
                continue;
            }

            if self.dry_run {
                info!(from = %step.current.display(), to = %step.original.display(), "dry run: would restore");
                self.record(
                    step.operation,
                    &step.current,
                    &step.original,
                    true,
                    json!({"undo": true, "dry_run": true}),
                );
                planned.remove(&step.current);
                vacated.insert(step.current.clone());
                vacated.remove(&step.original);
                planned.insert(step.original.clone());
                report.restored.push(step.original.clone());
                continue;
            }

            match restore(step) {
                Ok(method) => {
                    info!(from = %step.current.display(), to = %step.original.display(), ?method, "restored");
                    self.record(step.operation, &step.current, &step.original, true, json!({"undo": true}));
                    report.restored.push(step.original.clone());
                }
                Err(err) => {
                    warn!(path = %step.current.display(), error = %err, "restore failed");
                    self.record(
                        step.operation,
                        &step.current,
                        &step.original,
                        false,
                        json!({"undo": true, "error": err.to_string()}),
                    );
                    report.failed.push((step.current.clone(), err.to_string()));
                }
            }
        }

        report
    }

    fn record(
        &self,
        kind: OperationKind,
        source: &Path,
        destination: &Path,
        success: bool,
        details: serde_json::Value,
    ) {
        self.log.record(
            OperationRecord::new(kind, source, Some(destination.to_path_buf()), success)
                .with_details(details),
        );
    }

    fn record_failure(&self, source: &Path, destination: Option<&Path>, details: serde_json::Value) {
        self.log.record(
            OperationRecord::new(
                OperationKind::Move,
                source,
                destination.map(Path::to_path_buf),
                false,
            )
            .with_details(details),
        );
    }
}

fn present(path: &Path, planned: &HashSet<PathBuf>, vacated: &HashSet<PathBuf>) -> bool {
    planned.contains(path) || (!vacated.contains(path) && path.symlink_metadata().is_ok())
}

fn restore(step: &UndoStep) -> Result<MoveMethod, ExecutorError> {
    if let Some(parent) = step.original.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| ExecutorError::ParentUnavailable {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    move_file_with(
        &step.current,
        &step.original,
        |from, to| std::fs::rename(from, to),
        |from, to| std::fs::copy(from, to),
    )
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Renames `src` to `dst`, falling back to copy + verify + delete when the
/// rename crosses filesystems.
pub(crate) fn move_file_with<R, C>(
    src: &Path,
    dst: &Path,
    rename: R,
    copy: C,
) -> Result<MoveMethod, ExecutorError>
where
    R: FnOnce(&Path, &Path) -> io::Result<()>,
    C: FnOnce(&Path, &Path) -> io::Result<u64>,
{
    match rename(src, dst) {
        Ok(()) => Ok(MoveMethod::Renamed),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            debug!(from = %src.display(), to = %dst.display(), "rename crosses filesystems; copying");
            copy_across(src, dst, copy)
        }
        Err(err) => Err(ExecutorError::io("move", src, err)),
    }
}

fn copy_across<C>(src: &Path, dst: &Path, copy: C) -> Result<MoveMethod, ExecutorError>
where
    C: FnOnce(&Path, &Path) -> io::Result<u64>,
{
    let expected = std::fs::metadata(src)
        .map_err(|err| ExecutorError::io("stat", src, err))?
        .len();

    if let Err(err) = copy(src, dst) {
        let _ = std::fs::remove_file(dst);
        return Err(ExecutorError::io("copy", src, err));
    }

    let actual = match std::fs::metadata(dst) {
        Ok(meta) => meta.len(),
        Err(err) => {
            let _ = std::fs::remove_file(dst);
            return Err(ExecutorError::io("stat", dst, err));
        }
    };
    if actual != expected {
        let _ = std::fs::remove_file(dst);
        return Err(ExecutorError::SizeMismatch {
            destination: dst.to_path_buf(),
            expected,
            actual,
        });
    }

    match std::fs::remove_file(src) {
        Ok(()) => Ok(MoveMethod::Copied {
            source_removed: true,
        }),
        Err(err) => {
            warn!(path = %src.display(), error = %err, "copied file but could not remove the original");
            Ok(MoveMethod::Copied {
                source_removed: false,
            })
        }
    }
}

//! Filesystem change coalescing for the watch directories.
//!
//! `notify` delivers raw events on its own thread straight into
//! [`FileCoalescer`], which only touches in-memory state. A single worker task
//! owned by [`WatchService`] wakes every poll interval, hands out a batch once
//! the watched tree has been quiet for the stability period, checks that each
//! file has stopped growing and pushes it through the [`FileProcessor`].
//! Files that could not be finished are kept in a retry map and attempted
//! again after the retry interval.

pub mod stability;
pub mod state;

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{WatchConfig, is_video_file};
use crate::error::{Result, WatchError};
use crate::pipeline::{FileProcessor, ProcessOutcome};
use crate::tv_parser::is_canonical_name;

pub use stability::{SizeCheck, sample_sizes};
pub use state::{CoalescerState, PendingFile};

/// What a raw notify event means for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// Appeared or was written to; (re)start its stability window.
    Touched(PathBuf),
    /// No longer at this path.
    Gone(PathBuf),
}

/// Maps a notify event to per-path signals.
///
/// Only video files produce [`ChangeSignal::Touched`]. Rename events that
/// carry both paths yield `Gone` for the source and `Touched` for the target.
pub fn classify_event(event: &Event, extensions: &[String]) -> Vec<ChangeSignal> {
    let touched = |path: &PathBuf| {
        is_video_file(path, extensions).then(|| ChangeSignal::Touched(path.clone()))
    };

    match &event.kind {
        EventKind::Create(_)
        | EventKind::Modify(
            ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any | ModifyKind::Other,
        )
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().filter_map(touched).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut signals = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                signals.push(ChangeSignal::Gone(from.clone()));
            }
            if let Some(to) = event.paths.get(1).and_then(touched) {
                signals.push(to);
            }
            signals
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|path| ChangeSignal::Gone(path.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|path| {
                if path.exists() {
                    touched(path)
                } else {
                    Some(ChangeSignal::Gone(path.clone()))
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Every video file below `roots`, recursively.
pub fn collect_video_files(roots: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if is_video_file(entry.path(), extensions) {
                        files.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(root = %root.display(), error = %err, "error walking directory"),
            }
        }
    }
    files
}

/// Counts from the initial scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Queued for the full pipeline.
    pub changed: usize,
    /// Already canonically named; queued for an immediate move attempt.
    pub move_only: usize,
}

/// Counts from one worker cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Files handed to the processor this cycle.
    pub flushed: usize,
    /// Files that finished.
    pub completed: usize,
    /// Files left for a retry.
    pub deferred: usize,
    /// Files whose processing returned an error.
    pub failed: usize,
    /// Files still growing; kept for the next cycle.
    pub still_changing: usize,
    /// Files that disappeared before processing.
    pub vanished: usize,
    /// Retry attempts made this cycle.
    pub retried: usize,
}

/// Batches filesystem changes and hands stable files to a [`FileProcessor`].
pub struct FileCoalescer {
    state: Mutex<CoalescerState>,
    processor: Arc<dyn FileProcessor>,
    config: WatchConfig,
    video_extensions: Vec<String>,
}

impl fmt::Debug for FileCoalescer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FileCoalescer")
            .field("config", &self.config)
            .field("changed", &state.changed_len())
            .field("pending", &state.pending_len())
            .finish_non_exhaustive()
    }
}

impl FileCoalescer {
    /// Coalescer with empty state.
    pub fn new(
        processor: Arc<dyn FileProcessor>,
        config: WatchConfig,
        video_extensions: Vec<String>,
    ) -> Self {
        Self {
            state: Mutex::new(CoalescerState::new(Instant::now())),
            processor,
            config,
            video_extensions,
        }
    }

    /// Timing configuration.
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Entry point for the notify callback.
    pub fn handle_event(&self, event: &Event) {
        let signals = classify_event(event, &self.video_extensions);
        if signals.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        for signal in signals {
            match signal {
                ChangeSignal::Touched(path) => {
                    debug!(path = %path.display(), "file changed");
                    state.record_change(path, now);
                }
                ChangeSignal::Gone(path) => {
                    debug!(path = %path.display(), "file gone");
                    state.record_removal(&path);
                }
            }
        }
    }

    /// Records a change to `path` if it is a video file.
    pub fn note_change(&self, path: PathBuf) {
        if is_video_file(&path, &self.video_extensions) {
            self.state.lock().record_change(path, Instant::now());
        }
    }

    /// Forgets `path` entirely.
    pub fn note_removal(&self, path: &Path) {
        self.state.lock().record_removal(path);
    }

    /// Queues every video file already present below `roots`.
    pub fn seed(&self, roots: &[PathBuf]) -> SeedSummary {
        let files = collect_video_files(roots, &self.video_extensions);
        let now = Instant::now();
        let mut summary = SeedSummary::default();

        let mut state = self.state.lock();
        for path in files {
            let canonical = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_canonical_name);
            if canonical {
                state.seed_pending(path);
                summary.move_only += 1;
            } else {
                state.record_change(path, now);
                summary.changed += 1;
            }
        }
        summary
    }

    /// Files waiting for the next batch.
    pub fn changed_len(&self) -> usize {
        self.state.lock().changed_len()
    }

    /// Files waiting for a retry.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending_len()
    }

    /// True when `path` waits for a retry.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.state.lock().is_pending(path)
    }

    /// One wake of the worker: purge, maybe flush a batch, run due retries.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();
        self.purge_vanished();

        let batch = self
            .state
            .lock()
            .take_ready_batch(Instant::now(), self.config.stability_period());
        if let Some(batch) = batch {
            self.process_batch(batch, &mut summary).await;
        }

        self.process_retries(&mut summary).await;
        summary
    }

    fn purge_vanished(&self) {
        let snapshot = self.state.lock().changed_snapshot();
        let gone: Vec<_> = snapshot
            .into_iter()
            .filter(|(path, _)| !path.exists())
            .collect();
        if gone.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for (path, stamp) in gone {
            if state.complete(&path, stamp) {
                debug!(path = %path.display(), "dropping vanished file");
            }
        }
    }

    async fn process_batch(&self, batch: Vec<(PathBuf, Instant)>, summary: &mut CycleSummary) {
        summary.flushed = batch.len();
        debug!(files = batch.len(), "processing batch");

        let paths: Vec<PathBuf> = batch.iter().map(|(path, _)| path.clone()).collect();
        let checks = sample_sizes(&paths, self.config.size_check_interval()).await;

        for ((path, stamp), check) in batch.into_iter().zip(checks) {
            match check {
                SizeCheck::Missing => {
                    self.state.lock().complete(&path, stamp);
                    summary.vanished += 1;
                }
                SizeCheck::Changing => {
                    debug!(path = %path.display(), "file still growing; deferring");
                    summary.still_changing += 1;
                }
                SizeCheck::Stable => {
                    let result = self.processor.process(&path).await;
                    self.settle(&path, Some(stamp), result, summary);
                }
            }
        }
    }

    async fn process_retries(&self, summary: &mut CycleSummary) {
        let due = self
            .state
            .lock()
            .due_retries(Instant::now(), self.config.retry_interval());

        for path in due {
            if !path.exists() {
                debug!(path = %path.display(), "retry target vanished");
                self.state.lock().clear_retry(&path);
                continue;
            }
            summary.retried += 1;
            let result = self.processor.process(&path).await;
            self.settle(&path, None, result, summary);
        }
    }

    /// Records the outcome of one attempt. `stamp` is set for changed-set
    /// entries and `None` for retries.
    fn settle(
        &self,
        path: &Path,
        stamp: Option<Instant>,
        result: Result<ProcessOutcome>,
        summary: &mut CycleSummary,
    ) {
        let now = Instant::now();
        let mut state = self.state.lock();
        match stamp {
            Some(stamp) => {
                state.complete(path, stamp);
            }
            None => state.clear_retry(path),
        }

        match result {
            Ok(ProcessOutcome::Completed { path: done }) => {
                debug!(from = %path.display(), to = %done.display(), "file completed");
                summary.completed += 1;
            }
            Ok(ProcessOutcome::Ignored | ProcessOutcome::Vanished) => {}
            Ok(ProcessOutcome::Deferred {
                path: current,
                reason,
            }) => {
                info!(path = %current.display(), %reason, "file deferred for retry");
                state.defer_retry(current, now);
                summary.deferred += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "processing failed; will retry");
                state.defer_retry(path.to_path_buf(), now);
                summary.failed += 1;
            }
        }
    }
}

/// Owns the notify watchers and the worker task.
pub struct WatchService {
    coalescer: Arc<FileCoalescer>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    watchers: Vec<RecommendedWatcher>,
    roots: Vec<PathBuf>,
}

impl fmt::Debug for WatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchService")
            .field("roots", &self.roots)
            .field("watcher_count", &self.watchers.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("coalescer", &self.coalescer)
            .finish()
    }
}

impl WatchService {
    /// Attaches recursive watchers to `roots`, queues existing files and
    /// starts the worker. Must be called from within a Tokio runtime.
    pub fn start(coalescer: Arc<FileCoalescer>, roots: Vec<PathBuf>) -> std::result::Result<Self, WatchError> {
        let roots = resolve_roots(roots);
        let watchers = init_watchers(&roots, &coalescer)?;

        let seeded = coalescer.seed(&roots);
        info!(
            roots = roots.len(),
            changed = seeded.changed,
            move_only = seeded.move_only,
            "watching for new episodes"
        );

        let cancel = CancellationToken::new();
        let worker = spawn_worker(Arc::clone(&coalescer), cancel.clone());

        Ok(Self {
            coalescer,
            cancel,
            worker: Some(worker),
            watchers,
            roots,
        })
    }

    /// Shared coalescer.
    pub fn coalescer(&self) -> &Arc<FileCoalescer> {
        &self.coalescer
    }

    /// Watched roots after resolution.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stops the worker, waiting at most the configured shutdown timeout for
    /// an in-flight cycle, then detaches the watchers.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        if let Some(mut worker) = self.worker.take() {
            match timeout(self.coalescer.config().shutdown_timeout(), &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "watch worker failed"),
                Err(_) => {
                    warn!("watch worker did not stop in time; aborting");
                    worker.abort();
                }
            }
        }

        // Dropping the watchers stops notify streams.
        self.watchers.clear();
        info!("watch service stopped");
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_worker(coalescer: Arc<FileCoalescer>, cancel: CancellationToken) -> JoinHandle<()> {
    let poll = coalescer.config().poll_interval();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(poll) => {}
            }

            let summary = coalescer.run_cycle().await;
            if summary != CycleSummary::default() {
                debug!(?summary, "watch cycle finished");
            }
        }
    })
}

fn resolve_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    roots
        .into_iter()
        .map(|path| if path.is_absolute() { path } else { cwd.join(path) })
        .collect()
}

fn init_watchers(
    roots: &[PathBuf],
    coalescer: &Arc<FileCoalescer>,
) -> std::result::Result<Vec<RecommendedWatcher>, WatchError> {
    let mut watchers = Vec::with_capacity(roots.len());
    for root in roots {
        let handler = Arc::clone(coalescer);
        let root_label = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => handler.handle_event(&event),
                Err(err) => error!(root = %root_label.display(), error = %err, "file watcher error"),
            },
            NotifyConfig::default(),
        )
        .map_err(WatchError::WatcherCreation)?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchPath {
                path: root.clone(),
                source,
            })?;
        watchers.push(watcher);
    }
    Ok(watchers)
}

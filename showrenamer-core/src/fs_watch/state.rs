//! Bookkeeping for changed files and pending retries.
//!
//! Everything here is synchronous and takes the current [`Instant`] as an
//! argument so the timing rules can be exercised without sleeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A file that failed and waits for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFile {
    /// `None` means due immediately.
    pub last_attempt: Option<Instant>,
}

/// Changed files and retry queue of a coalescer.
#[derive(Debug)]
pub struct CoalescerState {
    changed: HashMap<PathBuf, Instant>,
    pending: HashMap<PathBuf, PendingFile>,
    last_change: Option<Instant>,
    last_flush: Instant,
}

impl CoalescerState {
    /// Empty state; `now` counts as the last flush.
    pub fn new(now: Instant) -> Self {
        Self {
            changed: HashMap::new(),
            pending: HashMap::new(),
            last_change: None,
            last_flush: now,
        }
    }

    /// Create, modify or rename-destination on a video file.
    pub fn record_change(&mut self, path: PathBuf, now: Instant) {
        self.pending.remove(&path);
        self.changed.insert(path, now);
        self.last_change = Some(now);
    }

    /// Delete or rename-source: the path is no longer tracked anywhere.
    pub fn record_removal(&mut self, path: &Path) {
        self.changed.remove(path);
        self.pending.remove(path);
    }

    /// Queues a file for an immediate attempt outside the changed-set.
    pub fn seed_pending(&mut self, path: PathBuf) {
        if !self.changed.contains_key(&path) {
            self.pending.insert(path, PendingFile { last_attempt: None });
        }
    }

    /// Changed files with their last event time.
    pub fn changed_snapshot(&self) -> Vec<(PathBuf, Instant)> {
        self.changed
            .iter()
            .map(|(path, stamp)| (path.clone(), *stamp))
            .collect()
    }

    /// Snapshot of the changed-set if it is due for processing.
    ///
    /// Due when nothing has changed for `stability`, or when no batch has been
    /// handed out for `stability` even though events keep arriving. The flush
    /// clock also advances while the set is empty, so a burst that starts
    /// after a long idle period still waits a full period.
    pub fn take_ready_batch(&mut self, now: Instant, stability: Duration) -> Option<Vec<(PathBuf, Instant)>> {
        if self.changed.is_empty() {
            self.last_flush = now;
            return None;
        }

        let quiet = self
            .last_change
            .is_none_or(|changed| now.saturating_duration_since(changed) >= stability);
        let starving = now.saturating_duration_since(self.last_flush) >= stability;
        if !(quiet || starving) {
            return None;
        }

        self.last_flush = now;
        Some(self.changed_snapshot())
    }

    /// Drops `path` from the changed-set unless a newer event re-stamped it.
    pub fn complete(&mut self, path: &Path, stamp: Instant) -> bool {
        if self.changed.get(path) == Some(&stamp) {
            self.changed.remove(path);
            true
        } else {
            false
        }
    }

    /// Schedules `path` for a retry after a failed attempt at `now`.
    ///
    /// Ignored while the path sits in the changed-set; it will be processed
    /// from there.
    pub fn defer_retry(&mut self, path: PathBuf, now: Instant) {
        if self.changed.contains_key(&path) {
            return;
        }
        self.pending.insert(path, PendingFile { last_attempt: Some(now) });
    }

    /// Drops `path` from the retry queue.
    pub fn clear_retry(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Pending files whose last attempt is at least `interval` old.
    pub fn due_retries(&self, now: Instant, interval: Duration) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, entry)| {
                entry
                    .last_attempt
                    .is_none_or(|at| now.saturating_duration_since(at) >= interval)
            })
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();
        due
    }

    /// True when `path` waits for the next batch.
    pub fn is_changed(&self, path: &Path) -> bool {
        self.changed.contains_key(path)
    }

    /// True when `path` waits for a retry.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Retry entry for `path`.
    pub fn pending_entry(&self, path: &Path) -> Option<PendingFile> {
        self.pending.get(path).copied()
    }

    /// Number of changed files.
    pub fn changed_len(&self) -> usize {
        self.changed.len()
    }

    /// Number of pending retries.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

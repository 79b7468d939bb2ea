//! Two-sample size check for files that may still be written.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of sampling a file's size twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    /// Same size both times.
    Stable,
    /// Still being written; leave it for a later cycle.
    Changing,
    /// Gone before or between samples.
    Missing,
}

impl SizeCheck {
    /// Classifies two size samples; `None` means the file was missing.
    pub fn from_samples(first: Option<u64>, second: Option<u64>) -> Self {
        match (first, second) {
            (Some(a), Some(b)) if a == b => SizeCheck::Stable,
            (Some(_), Some(_)) => SizeCheck::Changing,
            _ => SizeCheck::Missing,
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

/// Samples every path, waits `interval` once, and samples again.
pub async fn sample_sizes(paths: &[PathBuf], interval: Duration) -> Vec<SizeCheck> {
    let first: Vec<Option<u64>> = paths.iter().map(|path| file_size(path)).collect();
    tokio::time::sleep(interval).await;
    paths
        .iter()
        .zip(first)
        .map(|(path, before)| SizeCheck::from_samples(before, file_size(path)))
        .collect()
}

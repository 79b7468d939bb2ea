use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use showrenamer_core::config::default_video_file_extensions_vec;
use showrenamer_core::{
    DeferReason, FileCoalescer, FileProcessor, ProcessOutcome, Result, WatchConfig, WatchService,
};
use tempfile::TempDir;

/// Records every path it sees; defers anything whose name contains "defer".
#[derive(Default)]
struct RecordingProcessor {
    seen: Mutex<Vec<PathBuf>>,
}

impl RecordingProcessor {
    fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl FileProcessor for RecordingProcessor {
    async fn process(&self, path: &Path) -> Result<ProcessOutcome> {
        self.seen.lock().push(path.to_path_buf());
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.contains("defer") {
            return Ok(ProcessOutcome::Deferred {
                path: path.to_path_buf(),
                reason: DeferReason::NoSeriesMatch,
            });
        }
        Ok(ProcessOutcome::Completed {
            path: path.to_path_buf(),
        })
    }
}

fn fast_config() -> WatchConfig {
    WatchConfig {
        stability_period_secs: 1,
        retry_interval_secs: 3600,
        poll_interval_ms: 20,
        size_check_interval_ms: 10,
        shutdown_timeout_secs: 5,
    }
}

fn coalescer(processor: Arc<RecordingProcessor>) -> FileCoalescer {
    FileCoalescer::new(processor, fast_config(), default_video_file_extensions_vec())
}

fn write(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"frames").unwrap();
    path
}

#[tokio::test]
async fn burst_of_changes_is_processed_once_quiet() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(RecordingProcessor::default());
    let coalescer = coalescer(processor.clone());

    for i in 1..=5 {
        coalescer.note_change(write(dir.path(), &format!("show.s01e0{i}.mkv")));
    }
    coalescer.note_change(write(dir.path(), "cover.jpg"));
    assert_eq!(coalescer.changed_len(), 5);

    let early = coalescer.run_cycle().await;
    assert_eq!(early.flushed, 0);
    assert!(processor.seen().is_empty());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let summary = coalescer.run_cycle().await;
    assert_eq!(summary.flushed, 5);
    assert_eq!(summary.completed, 5);
    assert_eq!(coalescer.changed_len(), 0);
    assert_eq!(processor.seen().len(), 5);
}

#[tokio::test]
async fn deferred_files_wait_for_retry_interval() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(RecordingProcessor::default());
    let coalescer = coalescer(processor.clone());

    let stuck = write(dir.path(), "defer.me.s01e01.mkv");
    coalescer.note_change(stuck.clone());
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let summary = coalescer.run_cycle().await;
    assert_eq!(summary.deferred, 1);
    assert!(coalescer.is_pending(&stuck));

    // Retry interval is an hour; nothing is attempted again yet.
    let again = coalescer.run_cycle().await;
    assert_eq!(again.retried, 0);
    assert_eq!(processor.seen().len(), 1);
}

#[tokio::test]
async fn removed_file_is_forgotten() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(RecordingProcessor::default());
    let coalescer = coalescer(processor.clone());

    let path = write(dir.path(), "show.s02e01.mkv");
    coalescer.note_change(path.clone());
    std::fs::remove_file(&path).unwrap();

    let summary = coalescer.run_cycle().await;
    assert_eq!(summary, Default::default());
    assert_eq!(coalescer.changed_len(), 0);
    assert!(processor.seen().is_empty());
}

#[tokio::test]
async fn seeding_routes_canonical_names_to_retry_queue() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("incoming");
    std::fs::create_dir(&nested).unwrap();
    let processor = Arc::new(RecordingProcessor::default());
    let coalescer = coalescer(processor.clone());

    let filed = write(dir.path(), "Show - S01E01 - Pilot.mkv");
    write(&nested, "show.s01e02.mkv");
    write(&nested, "readme.txt");

    let seeded = coalescer.seed(&[dir.path().to_path_buf()]);
    assert_eq!((seeded.changed, seeded.move_only), (1, 1));
    assert!(coalescer.is_pending(&filed));

    // Canonical files are attempted straight away, the rest waits.
    let summary = coalescer.run_cycle().await;
    assert_eq!((summary.retried, summary.flushed), (1, 0));
    assert_eq!(processor.seen(), vec![filed]);
}

#[tokio::test]
async fn service_processes_existing_files_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(RecordingProcessor::default());
    let filed = write(dir.path(), "Show - S03E04 - Finale.mkv");

    let service = WatchService::start(
        Arc::new(coalescer(processor.clone())),
        vec![dir.path().to_path_buf()],
    )
    .unwrap();
    assert_eq!(service.roots().len(), 1);

    let mut waited = Duration::ZERO;
    while processor.seen().is_empty() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    assert_eq!(processor.seen(), vec![filed]);
    assert_eq!(service.coalescer().pending_len(), 0);
    service.shutdown().await;
}

#[tokio::test]
async fn service_picks_up_files_created_after_start() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(RecordingProcessor::default());

    let service = WatchService::start(
        Arc::new(coalescer(processor.clone())),
        vec![dir.path().to_path_buf()],
    )
    .unwrap();
    assert!(processor.seen().is_empty());

    write(dir.path(), "show.s05e06.mkv");
    write(dir.path(), "show.s05e06.nfo");

    let mut waited = Duration::ZERO;
    while processor.seen().is_empty() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    // Let any trailing events for the same file drain.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let seen = processor.seen();
    assert_eq!(seen.len(), 1, "processed {seen:?}");
    assert_eq!(seen[0].file_name().and_then(|n| n.to_str()), Some("show.s05e06.mkv"));
    assert!(!service.coalescer().is_pending(&seen[0]));
    service.shutdown().await;
}

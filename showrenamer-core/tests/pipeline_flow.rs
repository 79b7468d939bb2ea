use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use showrenamer_core::{
    CatalogClient, CatalogError, EpisodeRecord, FileExecutor, FileProcessor, MemoryOperationLog,
    MetadataCache, NamePatternConfig, OperatingMode, Pipeline, ProcessOutcome, SeriesMatcher,
    SeriesNameMapping, SeriesRecord, ShowDirectories, ShowDirectoryResolver,
    oplog::OperationKind,
};
use tempfile::TempDir;

/// Catalog that knows a single show and counts its calls.
#[derive(Default)]
struct FakeCatalog {
    searches: AtomicUsize,
    episode_fetches: AtomicUsize,
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn search_series(&self, query: &str) -> Result<Vec<SeriesRecord>, CatalogError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !query.contains("dexter") && !query.contains("Dexter") {
            return Ok(Vec::new());
        }
        Ok(vec![
            SeriesRecord {
                id: 79349,
                name: "Dexter".into(),
                localized_name: None,
                year: Some("2006".into()),
            },
            SeriesRecord {
                id: 414006,
                name: "Dexter: New Blood".into(),
                localized_name: None,
                year: Some("2021".into()),
            },
        ])
    }

    async fn episodes(&self, series_id: u64) -> Result<Vec<EpisodeRecord>, CatalogError> {
        self.episode_fetches.fetch_add(1, Ordering::SeqCst);
        Ok((1..=12)
            .map(|number| EpisodeRecord {
                series_id,
                season_number: 1,
                episode_number: number,
                name: Some(format!("Episode {number}")),
                localized_name: (number == 1).then(|| "Dexter (Pilot)".to_string()),
            })
            .collect())
    }
}

struct Harness {
    state: TempDir,
    inbox: TempDir,
    library: TempDir,
    catalog: Arc<FakeCatalog>,
    log: Arc<MemoryOperationLog>,
}

impl Harness {
    fn new() -> Self {
        let library = TempDir::new().unwrap();
        std::fs::create_dir_all(library.path().join("Dexter").join("Season 01")).unwrap();
        Self {
            state: TempDir::new().unwrap(),
            inbox: TempDir::new().unwrap(),
            library,
            catalog: Arc::new(FakeCatalog::default()),
            log: Arc::new(MemoryOperationLog::new()),
        }
    }

    fn pipeline(&self, mode: OperatingMode) -> Pipeline {
        let cache =
            Arc::new(MetadataCache::open(self.state.path().join("show_cache.json"), 7).unwrap());
        let matcher = SeriesMatcher::new(self.catalog.clone(), cache, "deu");
        let resolver = ShowDirectoryResolver::new(&ShowDirectories {
            base_directories: vec![self.library.path().to_path_buf()],
        });
        let executor = Arc::new(FileExecutor::new(resolver, self.log.clone(), mode.is_dry_run()));
        Pipeline::new(
            Arc::new(NamePatternConfig::default()),
            Arc::new(SeriesNameMapping::default()),
            matcher,
            executor,
            mode,
        )
    }

    fn drop_file(&self, name: &str) -> PathBuf {
        let path = self.inbox.path().join(name);
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        path
    }

    fn season(&self, folder: &str) -> PathBuf {
        self.library.path().join("Dexter").join(folder)
    }
}

fn completed_path(outcome: ProcessOutcome) -> PathBuf {
    match outcome {
        ProcessOutcome::Completed { path } => path,
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn release_names_end_up_in_padded_season_folder() {
    let h = Harness::new();
    let pipeline = h.pipeline(OperatingMode::Normal);

    let pilot = h.drop_file("dexter.s01e01.720p.bluray.x264.mkv");
    let second = h.drop_file("dexter.s01e02.mkv");

    let first = completed_path(pipeline.process(&pilot).await.unwrap());
    assert_eq!(first, h.season("Season 01").join("Dexter - S01E01 - Dexter (Pilot).mkv"));

    let next = completed_path(pipeline.process(&second).await.unwrap());
    assert_eq!(next, h.season("Season 01").join("Dexter - S01E02 - Episode 2.mkv"));

    // Second file reused both cached lookups.
    assert_eq!(h.catalog.searches.load(Ordering::SeqCst), 1);
    assert_eq!(h.catalog.episode_fetches.load(Ordering::SeqCst), 1);

    let kinds: Vec<_> = h.log.records().iter().map(|r| r.operation).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Rename,
            OperationKind::Move,
            OperationKind::Rename,
            OperationKind::Move
        ]
    );
}

#[tokio::test]
async fn processing_a_filed_episode_again_is_a_noop_move() {
    let h = Harness::new();
    let pipeline = h.pipeline(OperatingMode::RenameOnly);
    let file = h.drop_file("dexter.s01e03.mkv");

    let renamed = completed_path(pipeline.process(&file).await.unwrap());
    let again = completed_path(pipeline.process(&renamed).await.unwrap());
    assert_eq!(renamed, again);
    assert!(renamed.exists());
}

#[tokio::test]
async fn missing_show_folder_defers_with_renamed_path() {
    let h = Harness::new();
    std::fs::remove_dir_all(h.library.path().join("Dexter")).unwrap();
    let pipeline = h.pipeline(OperatingMode::Normal);
    let file = h.drop_file("dexter.s01e04.mkv");

    match pipeline.process(&file).await.unwrap() {
        ProcessOutcome::Deferred { path, reason } => {
            assert_eq!(path, h.inbox.path().join("Dexter - S01E04 - Episode 4.mkv"));
            assert_eq!(reason, showrenamer_core::DeferReason::NoLibraryFolder);
            assert!(path.exists());
        }
        other => panic!("expected deferral, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_episode_is_deferred_untouched() {
    let h = Harness::new();
    let pipeline = h.pipeline(OperatingMode::Normal);
    let file = h.drop_file("dexter.s09e01.mkv");

    let outcome = pipeline.process(&file).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Deferred {
            path: file.clone(),
            reason: showrenamer_core::DeferReason::NoEpisodeMatch,
        }
    );
    assert!(file.exists());
    assert!(h.log.records().is_empty());
}

#[tokio::test]
async fn dry_run_records_without_touching_files() {
    let h = Harness::new();
    let pipeline = h.pipeline(OperatingMode::DryRun);
    let file = h.drop_file("dexter.s01e05.mkv");

    let planned = completed_path(pipeline.process(&file).await.unwrap());
    assert_eq!(planned, h.season("Season 01").join("Dexter - S01E05 - Episode 5.mkv"));
    assert!(file.exists());
    assert!(!Path::new(&planned).exists());
    assert_eq!(h.log.records().len(), 2);
}

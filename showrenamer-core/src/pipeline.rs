//! Per-file processing: parse, match, rename, relocate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{
    ConfigObserver, ConfigUpdate, NamePatternConfig, OperatingMode, SeriesNameMapping,
    default_video_file_extensions_vec, is_video_file,
};
use crate::error::{ExecutorError, Result};
use crate::library::{FileExecutor, ShowDirectoryResolver, compute_new_name};
use crate::matcher::SeriesMatcher;
use crate::tv_parser::{PatternEngine, parse_canonical};

/// Why a file was left for a later attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// No configured pattern matched the file name.
    NoPatternMatch,
    /// No catalog series scored high enough or it was rejected.
    NoSeriesMatch,
    /// The series has no such episode.
    NoEpisodeMatch,
    /// Catalog data produced an empty name.
    UnnamableEpisode,
    /// The show has no library folder.
    NoLibraryFolder,
    /// The target name is taken.
    DestinationExists,
    /// The move failed for another reason.
    RelocationFailed(String),
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::NoPatternMatch => f.write_str("no file name pattern matched"),
            DeferReason::NoSeriesMatch => f.write_str("no matching series in catalog"),
            DeferReason::NoEpisodeMatch => f.write_str("episode not found in catalog"),
            DeferReason::UnnamableEpisode => f.write_str("catalog data does not yield a file name"),
            DeferReason::NoLibraryFolder => f.write_str("no library folder for show"),
            DeferReason::DestinationExists => f.write_str("destination already exists"),
            DeferReason::RelocationFailed(err) => write!(f, "move failed: {err}"),
        }
    }
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing left to do; `path` is where the file ended up.
    Completed { path: PathBuf },
    /// Retry later. `path` is the file's current location, which differs from
    /// the input when the rename succeeded but the move did not.
    Deferred { path: PathBuf, reason: DeferReason },
    /// The file disappeared before it could be handled.
    Vanished,
    /// Not a video file.
    Ignored,
}

impl ProcessOutcome {
    /// True for [`ProcessOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed { .. })
    }
}

/// Something that can take a file through the rename pipeline.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(&self, path: &Path) -> Result<ProcessOutcome>;
}

/// Parse, match, rename and move for one file.
pub struct Pipeline {
    patterns: RwLock<Arc<NamePatternConfig>>,
    mapping: RwLock<Arc<SeriesNameMapping>>,
    engine: RwLock<Arc<PatternEngine>>,
    matcher: SeriesMatcher,
    executor: Arc<FileExecutor>,
    mode: OperatingMode,
    video_extensions: Vec<String>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("mode", &self.mode)
            .field("matcher", &self.matcher)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline over the given config snapshots and components.
    pub fn new(
        patterns: Arc<NamePatternConfig>,
        mapping: Arc<SeriesNameMapping>,
        matcher: SeriesMatcher,
        executor: Arc<FileExecutor>,
        mode: OperatingMode,
    ) -> Self {
        let engine = Arc::new(PatternEngine::new(&patterns, mapping.clone()));
        Self {
            patterns: RwLock::new(patterns),
            mapping: RwLock::new(mapping),
            engine: RwLock::new(engine),
            matcher,
            executor,
            mode,
            video_extensions: default_video_file_extensions_vec(),
        }
    }

    /// Replaces the video extension allow-list.
    pub fn with_video_extensions(mut self, extensions: Vec<String>) -> Self {
        self.video_extensions = extensions;
        self
    }

    /// How far the pipeline goes.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Extensions treated as video files.
    pub fn video_extensions(&self) -> &[String] {
        &self.video_extensions
    }

    fn engine(&self) -> Arc<PatternEngine> {
        self.engine.read().clone()
    }

    fn rebuild_engine(&self) {
        let patterns = self.patterns.read().clone();
        let mapping = self.mapping.read().clone();
        let engine = PatternEngine::new(&patterns, mapping);
        info!(patterns = engine.pattern_count(), "file name patterns reloaded");
        *self.engine.write() = Arc::new(engine);
    }

    async fn rename(&self, path: &Path, new_name: String) -> Result<std::result::Result<PathBuf, ExecutorError>> {
        let executor = self.executor.clone();
        let path = path.to_path_buf();
        Ok(tokio::task::spawn_blocking(move || executor.rename(&path, &new_name)).await?)
    }

    /// Moves into the library; move failures become a deferral of `path`.
    async fn relocate(&self, path: PathBuf, show: String, season: u32) -> Result<ProcessOutcome> {
        let executor = self.executor.clone();
        let source = path.clone();
        let moved = tokio::task::spawn_blocking(move || executor.relocate(&source, &show, season)).await?;

        Ok(match moved {
            Ok(relocation) => ProcessOutcome::Completed {
                path: relocation.destination,
            },
            Err(err) => {
                let reason = match err {
                    ExecutorError::NoShowDirectory { .. } => DeferReason::NoLibraryFolder,
                    ExecutorError::DestinationExists(_) => DeferReason::DestinationExists,
                    other => {
                        warn!(path = %path.display(), error = %other, "move into library failed");
                        DeferReason::RelocationFailed(other.to_string())
                    }
                };
                ProcessOutcome::Deferred { path, reason }
            }
        })
    }

    async fn process_canonical(&self, path: &Path, show: String, season: u32) -> Result<ProcessOutcome> {
        if !self.mode.relocates() {
            return Ok(ProcessOutcome::Completed {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), %show, season, "canonical name; move only");
        self.relocate(path.to_path_buf(), show, season).await
    }
}

#[async_trait]
impl FileProcessor for Pipeline {
    async fn process(&self, path: &Path) -> Result<ProcessOutcome> {
        if !is_video_file(path, &self.video_extensions) {
            return Ok(ProcessOutcome::Ignored);
        }
        if !path.exists() {
            debug!(path = %path.display(), "file vanished before processing");
            return Ok(ProcessOutcome::Vanished);
        }
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return Ok(ProcessOutcome::Ignored);
        };

        if let Some(canonical) = parse_canonical(file_name) {
            return self
                .process_canonical(path, canonical.show, canonical.season)
                .await;
        }

        let deferred = |reason: DeferReason| -> Result<ProcessOutcome> {
            debug!(path = %path.display(), %reason, "deferring file");
            Ok(ProcessOutcome::Deferred {
                path: path.to_path_buf(),
                reason,
            })
        };

        let Some(parsed) = self.engine().parse(file_name) else {
            return deferred(DeferReason::NoPatternMatch);
        };
        let Some(series) = self.matcher.resolve_series(&parsed.show).await? else {
            return deferred(DeferReason::NoSeriesMatch);
        };
        let Some(episode) = self
            .matcher
            .resolve_episode(series.id, parsed.season, parsed.episode)
            .await?
        else {
            return deferred(DeferReason::NoEpisodeMatch);
        };
        let Some(new_name) = compute_new_name(path, &series, &episode) else {
            return deferred(DeferReason::UnnamableEpisode);
        };

        let renamed = match self.rename(path, new_name).await? {
            Ok(renamed) => renamed,
            Err(ExecutorError::DestinationExists(_)) => {
                return deferred(DeferReason::DestinationExists);
            }
            Err(err) => return Err(err.into()),
        };

        if !self.mode.relocates() {
            return Ok(ProcessOutcome::Completed { path: renamed });
        }
        let show = crate::library::sanitize_component(series.display_name());
        self.relocate(renamed, show, episode.season_number).await
    }
}

impl ConfigObserver for Pipeline {
    fn on_config_changed(&self, update: &ConfigUpdate) {
        match update {
            ConfigUpdate::Patterns(patterns) => {
                *self.patterns.write() = patterns.clone();
                self.rebuild_engine();
            }
            ConfigUpdate::Mapping(mapping) => {
                *self.mapping.write() = mapping.clone();
                self.rebuild_engine();
            }
            ConfigUpdate::ShowDirectories(dirs) => {
                self.executor.set_resolver(ShowDirectoryResolver::new(dirs));
                info!(bases = dirs.base_directories.len(), "library folders reloaded");
            }
        }
    }
}

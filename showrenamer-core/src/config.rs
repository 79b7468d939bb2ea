//! Configuration documents consumed by the pipeline.
//!
//! Persistence and hot-reload live in `showrenamer-config`; this module only
//! defines the shapes, their defaults, and the observer seam that lets a reload
//! swap fresh snapshots into running components.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Extensions (lowercase, without dot) treated as video files.
pub const DEFAULT_VIDEO_FILE_EXTENSIONS: &[&str] = &[
    "mkv", "avi", "mp4", "m4v", "mov", "wmv", "flv", "mpg", "mpeg", "m2ts",
];

/// [`DEFAULT_VIDEO_FILE_EXTENSIONS`] as owned strings.
pub fn default_video_file_extensions_vec() -> Vec<String> {
    DEFAULT_VIDEO_FILE_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

/// Case-insensitive extension check against an allow-list.
pub fn is_video_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions.iter().any(|allowed| allowed.trim_start_matches('.') == ext)
        })
        .unwrap_or(false)
}

/// How far the pipeline is allowed to go once a file has been identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    /// Compute and record intended actions, touch nothing.
    DryRun,
    /// Rename in place, never relocate.
    RenameOnly,
    /// Rename, then move into the library tree.
    #[default]
    Normal,
}

impl OperatingMode {
    /// True when nothing may be touched.
    pub fn is_dry_run(self) -> bool {
        matches!(self, OperatingMode::DryRun)
    }

    /// True when renamed files are moved into the library.
    pub fn relocates(self) -> bool {
        !matches!(self, OperatingMode::RenameOnly)
    }
}

/// Separator replacement toggles applied to extracted show names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Replacements {
    /// Turn `.` into spaces.
    pub dots_to_spaces: bool,
    /// Turn `_` into spaces.
    pub underscores_to_spaces: bool,
    /// Turn `-` into spaces.
    pub dashes_to_spaces: bool,
}

impl Default for Replacements {
    fn default() -> Self {
        Self {
            dots_to_spaces: true,
            underscores_to_spaces: true,
            dashes_to_spaces: true,
        }
    }
}

/// Ordered filename patterns plus the cleanup rules for extracted names.
///
/// `patterns` is a priority list: the first regex that matches the lowercased
/// stem wins, so the most specific patterns belong at the top. A pattern with
/// three capture groups yields `(show, season, episode)`; one with two groups
/// yields `(season, episode)` and the show is whatever precedes the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamePatternConfig {
    /// Filename regexes, most specific first.
    pub patterns: Vec<String>,
    /// Regexes (or plain literals, when an entry is not a valid regex) stripped
    /// from the candidate show name, longest entry first.
    pub strings_to_remove: Vec<String>,
    /// Separator replacements.
    pub replacements: Replacements,
    /// Older config files split removal rules into prefixes and suffixes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,
    /// Older name for trailing removal rules.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suffixes: Vec<String>,
}

impl NamePatternConfig {
    /// Every removal rule regardless of which field it was declared in.
    pub fn removal_rules(&self) -> impl Iterator<Item = &str> {
        self.strings_to_remove
            .iter()
            .chain(self.prefixes.iter())
            .chain(self.suffixes.iter())
            .map(String::as_str)
    }
}

impl Default for NamePatternConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                r"^(.*?)\s*-\s*s(\d{1,2})e(\d{1,2})\s*-".to_string(),
                r"^(.*?)\s*-\s*s(\d{1,2})e(\d{1,2})$".to_string(),
                r"[._-]s(\d{1,2})e(\d{1,2})".to_string(),
            ],
            strings_to_remove: vec![
                r"^\d{1,4}[a-z]{1,3}[-.]".to_string(),
                r"[-.](?:sd|hd|720p|1080p|2160p|x264|x265|aac|dtshd|bluray)\b".to_string(),
                r"[-.](?:web|webrip|web-dl|hdtv|proper|internal)\b".to_string(),
            ],
            replacements: Replacements::default(),
            prefixes: Vec::new(),
            suffixes: Vec::new(),
        }
    }
}

/// Overrides for extracted names the catalog cannot fuzzy-match on its own
/// (abbreviations, alternate titles).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesNameMapping(pub BTreeMap<String, String>);

impl SeriesNameMapping {
    /// Exact key first, then the lowercased key.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .or_else(|| self.0.get(&name.to_lowercase()))
            .map(String::as_str)
    }

    /// True when no overrides are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SeriesNameMapping {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert("dexteros".to_string(), "Dexter: Original Sin".to_string());
        map.insert("ncis".to_string(), "Navy CIS".to_string());
        Self(map)
    }
}

/// Library roots that hold one folder per show.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowDirectories {
    /// Folders scanned for show folders, in priority order.
    pub base_directories: Vec<PathBuf>,
}

/// Coalescer timing knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet time (no events on any watched file) before a batch is flushed.
    pub stability_period_secs: u64,
    /// Minimum delay before a failed file is attempted again.
    pub retry_interval_secs: u64,
    /// Wake cadence of the background loop.
    pub poll_interval_ms: u64,
    /// Gap between the two size samples taken before processing a file.
    pub size_check_interval_ms: u64,
    /// Upper bound on how long shutdown waits for an in-flight cycle.
    pub shutdown_timeout_secs: u64,
}

impl WatchConfig {
    /// [`Self::stability_period_secs`] as a `Duration`.
    pub fn stability_period(&self) -> Duration {
        Duration::from_secs(self.stability_period_secs)
    }

    /// [`Self::retry_interval_secs`] as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// [`Self::poll_interval_ms`] as a `Duration`, at least 1 ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// [`Self::size_check_interval_ms`] as a `Duration`.
    pub fn size_check_interval(&self) -> Duration {
        Duration::from_millis(self.size_check_interval_ms)
    }

    /// [`Self::shutdown_timeout_secs`] as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stability_period_secs: 30,
            retry_interval_secs: 24 * 60 * 60,
            poll_interval_ms: 1_000,
            size_check_interval_ms: 1_000,
            shutdown_timeout_secs: 10,
        }
    }
}

/// TheTVDB v4 API root.
pub const DEFAULT_CATALOG_BASE_URL: &str = "https://api4.thetvdb.com/v4";

/// Runtime settings that are not part of the hot-reloadable documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenamerSettings {
    /// Days before a cached catalog response expires.
    pub cache_ttl_days: u32,
    /// Catalog translation language used for localized names.
    pub language: String,
    /// Minimum fuzzy score (0-100) for a series match to be accepted.
    pub match_threshold: u8,
    /// Catalog API root.
    pub catalog_base_url: String,
    /// Extensions treated as video files.
    pub video_extensions: Vec<String>,
    /// Coalescer timings.
    pub watch: WatchConfig,
}

impl Default for RenamerSettings {
    fn default() -> Self {
        Self {
            cache_ttl_days: 7,
            language: "deu".to_string(),
            match_threshold: 50,
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            video_extensions: default_video_file_extensions_vec(),
            watch: WatchConfig::default(),
        }
    }
}

/// Which reloadable document changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKind {
    /// `name_patterns.json`.
    Patterns,
    /// `series_mapping.json`.
    Mapping,
    /// `show_directories.json`.
    ShowDirectories,
}

/// A freshly swapped-in snapshot of one document.
#[derive(Debug, Clone)]
pub enum ConfigUpdate {
    /// New pattern config.
    Patterns(Arc<NamePatternConfig>),
    /// New series mapping.
    Mapping(Arc<SeriesNameMapping>),
    /// New library directories.
    ShowDirectories(Arc<ShowDirectories>),
}

impl ConfigUpdate {
    /// Which document this update carries.
    pub fn kind(&self) -> ConfigKind {
        match self {
            ConfigUpdate::Patterns(_) => ConfigKind::Patterns,
            ConfigUpdate::Mapping(_) => ConfigKind::Mapping,
            ConfigUpdate::ShowDirectories(_) => ConfigKind::ShowDirectories,
        }
    }
}

/// Receives config snapshots after they have been swapped in.
///
/// Called synchronously from the reload thread; implementations should only
/// rebuild and swap their own derived state.
pub trait ConfigObserver: Send + Sync {
    fn on_config_changed(&self, update: &ConfigUpdate);
}

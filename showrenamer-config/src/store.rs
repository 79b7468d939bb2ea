//! The three hot-reloadable JSON documents and their on-disk layout.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use showrenamer_core::{
    ConfigKind, ConfigUpdate, NamePatternConfig, SeriesNameMapping, ShowDirectories,
};
use tracing::{info, warn};

/// Ordered filename patterns and cleanup rules.
pub const PATTERNS_FILE: &str = "name_patterns.json";
/// Extracted name to catalog name overrides.
pub const MAPPING_FILE: &str = "series_mapping.json";
/// Library base directories.
pub const SHOW_DIRECTORIES_FILE: &str = "show_directories.json";
/// Startup-only runtime settings.
pub const SETTINGS_FILE: &str = "settings.toml";
/// Cached catalog responses.
pub const CACHE_FILE: &str = "show_cache.json";
/// JSON Lines operation log, relative to the config directory.
pub const OPERATION_LOG_FILE: &str = "logs/file_operations.jsonl";

/// Which document lives in `file_name`, if any.
pub fn kind_for_file(file_name: &str) -> Option<ConfigKind> {
    match file_name {
        PATTERNS_FILE => Some(ConfigKind::Patterns),
        MAPPING_FILE => Some(ConfigKind::Mapping),
        SHOW_DIRECTORIES_FILE => Some(ConfigKind::ShowDirectories),
        _ => None,
    }
}

fn file_for_kind(kind: ConfigKind) -> &'static str {
    match kind {
        ConfigKind::Patterns => PATTERNS_FILE,
        ConfigKind::Mapping => MAPPING_FILE,
        ConfigKind::ShowDirectories => SHOW_DIRECTORIES_FILE,
    }
}

/// Current snapshots of the reloadable documents in one config directory.
///
/// Each document is held as an `Arc` behind its own lock; readers clone the
/// `Arc` and never see a half-applied update.
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    patterns: RwLock<Arc<NamePatternConfig>>,
    mapping: RwLock<Arc<SeriesNameMapping>>,
    show_directories: RwLock<Arc<ShowDirectories>>,
}

impl ConfigStore {
    /// Loads every document from `dir`, writing defaults for missing ones.
    ///
    /// A document that exists but does not parse is left untouched on disk and
    /// its defaults are used until it is fixed.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;

        let patterns = load_or_create(&dir.join(PATTERNS_FILE))?;
        let mapping = load_or_create(&dir.join(MAPPING_FILE))?;
        let show_directories = load_or_create(&dir.join(SHOW_DIRECTORIES_FILE))?;

        Ok(Self {
            dir,
            patterns: RwLock::new(Arc::new(patterns)),
            mapping: RwLock::new(Arc::new(mapping)),
            show_directories: RwLock::new(Arc::new(show_directories)),
        })
    }

    /// Config directory root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `kind`.
    pub fn path_for(&self, kind: ConfigKind) -> PathBuf {
        self.dir.join(file_for_kind(kind))
    }

    /// Path of `settings.toml`.
    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    /// Path of the metadata cache.
    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }

    /// Path of the operation log.
    pub fn operation_log_path(&self) -> PathBuf {
        self.dir.join(OPERATION_LOG_FILE)
    }

    /// Current pattern snapshot.
    pub fn patterns(&self) -> Arc<NamePatternConfig> {
        self.patterns.read().clone()
    }

    /// Current series mapping snapshot.
    pub fn mapping(&self) -> Arc<SeriesNameMapping> {
        self.mapping.read().clone()
    }

    /// Current library directories snapshot.
    pub fn show_directories(&self) -> Arc<ShowDirectories> {
        self.show_directories.read().clone()
    }

    /// Current snapshot of `kind`, wrapped for observers.
    pub fn snapshot(&self, kind: ConfigKind) -> ConfigUpdate {
        match kind {
            ConfigKind::Patterns => ConfigUpdate::Patterns(self.patterns()),
            ConfigKind::Mapping => ConfigUpdate::Mapping(self.mapping()),
            ConfigKind::ShowDirectories => ConfigUpdate::ShowDirectories(self.show_directories()),
        }
    }

    /// Re-reads one document and swaps it in.
    ///
    /// On a read or parse failure the previous snapshot stays in place and the
    /// error is returned.
    pub fn reload(&self, kind: ConfigKind) -> anyhow::Result<ConfigUpdate> {
        let path = self.path_for(kind);
        let update = match kind {
            ConfigKind::Patterns => {
                let next = Arc::new(read_document::<NamePatternConfig>(&path)?);
                *self.patterns.write() = next.clone();
                ConfigUpdate::Patterns(next)
            }
            ConfigKind::Mapping => {
                let next = Arc::new(read_document::<SeriesNameMapping>(&path)?);
                *self.mapping.write() = next.clone();
                ConfigUpdate::Mapping(next)
            }
            ConfigKind::ShowDirectories => {
                let next = Arc::new(read_document::<ShowDirectories>(&path)?);
                *self.show_directories.write() = next.clone();
                ConfigUpdate::ShowDirectories(next)
            }
        };
        info!(file = %path.display(), "configuration reloaded");
        Ok(update)
    }

    /// Writes the patterns document and swaps it in.
    pub fn save_patterns(&self, patterns: NamePatternConfig) -> anyhow::Result<()> {
        write_document(&self.path_for(ConfigKind::Patterns), &patterns)?;
        *self.patterns.write() = Arc::new(patterns);
        Ok(())
    }

    /// Writes the series mapping and swaps it in.
    pub fn save_mapping(&self, mapping: SeriesNameMapping) -> anyhow::Result<()> {
        write_document(&self.path_for(ConfigKind::Mapping), &mapping)?;
        *self.mapping.write() = Arc::new(mapping);
        Ok(())
    }

    /// Writes the library directories and swaps them in.
    pub fn save_show_directories(&self, dirs: ShowDirectories) -> anyhow::Result<()> {
        write_document(&self.path_for(ConfigKind::ShowDirectories), &dirs)?;
        *self.show_directories.write() = Arc::new(dirs);
        Ok(())
    }
}

fn load_or_create<T>(path: &Path) -> anyhow::Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    if !path.exists() {
        let defaults = T::default();
        write_document(path, &defaults)?;
        info!(file = %path.display(), "created default configuration");
        return Ok(defaults);
    }

    match read_document(path) {
        Ok(doc) => Ok(doc),
        Err(err) => {
            warn!(file = %path.display(), error = %err, "invalid configuration; using defaults");
            Ok(T::default())
        }
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;
    serde_json::from_str(&contents).map_err(|err| anyhow!("invalid config {}: {err}", path.display()))
}

/// Pretty JSON, written to a sibling temp file and renamed into place so the
/// reload watcher never reads a partial document.
pub(crate) fn write_document<T: Serialize>(path: &Path, doc: &T) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("config path {} has no parent", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let mut body = serde_json::to_string_pretty(doc).context("failed to serialize config")?;
    body.push('\n');

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(body.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| anyhow!("failed to replace {}: {}", path.display(), err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path().join("nested")).unwrap();

        for file in [PATTERNS_FILE, MAPPING_FILE, SHOW_DIRECTORIES_FILE] {
            assert!(store.dir().join(file).is_file(), "{file} missing");
        }
        assert_eq!(*store.patterns(), NamePatternConfig::default());
        assert_eq!(store.mapping().lookup("NCIS"), Some("Navy CIS"));
    }

    #[test]
    fn existing_documents_are_loaded() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SHOW_DIRECTORIES_FILE),
            r#"{"base_directories": ["/srv/tv"]}"#,
        )
        .unwrap();

        let store = ConfigStore::open(dir.path()).unwrap();
        assert_eq!(store.show_directories().base_directories, vec![PathBuf::from("/srv/tv")]);
    }

    #[test]
    fn broken_document_falls_back_without_overwriting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MAPPING_FILE);
        fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::open(dir.path()).unwrap();
        assert_eq!(*store.mapping(), SeriesNameMapping::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        let before = store.patterns();

        fs::write(store.path_for(ConfigKind::Patterns), "[1, 2").unwrap();
        assert!(store.reload(ConfigKind::Patterns).is_err());
        assert!(Arc::ptr_eq(&before, &store.patterns()));
    }

    #[test]
    fn reload_swaps_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        fs::write(store.path_for(ConfigKind::Mapping), r#"{"got": "Game of Thrones"}"#).unwrap();
        let update = store.reload(ConfigKind::Mapping).unwrap();
        assert_eq!(update.kind(), ConfigKind::Mapping);
        assert_eq!(store.mapping().lookup("got"), Some("Game of Thrones"));
        assert_eq!(store.mapping().lookup("ncis"), None);
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        store
            .save_show_directories(ShowDirectories {
                base_directories: vec![PathBuf::from("/mnt/series")],
            })
            .unwrap();

        let reopened = ConfigStore::open(dir.path()).unwrap();
        assert_eq!(*reopened.show_directories(), *store.show_directories());
    }

    #[test]
    fn file_names_map_to_kinds() {
        assert_eq!(kind_for_file("name_patterns.json"), Some(ConfigKind::Patterns));
        assert_eq!(kind_for_file("show_directories.json"), Some(ConfigKind::ShowDirectories));
        assert_eq!(kind_for_file("show_cache.json"), None);
        assert_eq!(kind_for_file(SETTINGS_FILE), None);
    }
}

//! Persistent key/value cache for catalog responses.
//!
//! The whole cache is a single pretty-printed JSON object on disk. Each value
//! is stored next to the time it was written; entries older than the TTL are
//! invisible to readers and are dropped the next time the document is loaded
//! or saved. Documents written by older versions stored bare values without a
//! timestamp; those are still readable and never expire.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CacheError;

/// One stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheSlot {
    /// Written with the time it was stored.
    Stamped { data: Value, timestamp: String },
    /// Bare value from older cache files; never expires.
    Legacy(Value),
}

impl CacheSlot {
    fn stamped(data: Value, now: DateTime<Utc>) -> Self {
        CacheSlot::Stamped {
            data,
            timestamp: now.to_rfc3339(),
        }
    }

    fn data(&self) -> &Value {
        match self {
            CacheSlot::Stamped { data, .. } => data,
            CacheSlot::Legacy(data) => data,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self {
            CacheSlot::Legacy(_) => false,
            CacheSlot::Stamped { timestamp, .. } => match parse_timestamp(timestamp) {
                Some(written) => now.signed_duration_since(written) > ttl,
                None => true,
            },
        }
    }
}

/// Accepts RFC 3339 as well as naive ISO-8601 timestamps in local time.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// TTL cache backed by a JSON file.
#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
    ttl: Duration,
    entries: Mutex<BTreeMap<String, CacheSlot>>,
}

impl MetadataCache {
    /// Loads the cache document at `path`, dropping expired entries.
    ///
    /// A missing file yields an empty cache. A document that cannot be parsed
    /// is logged and replaced by an empty cache on the next write.
    pub fn open(path: impl Into<PathBuf>, ttl_days: u32) -> Result<Self, CacheError> {
        let path = path.into();
        let ttl = Duration::days(i64::from(ttl_days));

        let mut entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, CacheSlot>>(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cache document is unreadable; starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let before = entries.len();
        purge_expired(&mut entries, Utc::now(), ttl);
        debug!(
            path = %path.display(),
            entries = entries.len(),
            purged = before - entries.len(),
            "cache loaded"
        );

        Ok(Self {
            path,
            ttl,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lookup as of now; expired entries read as absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now())
    }

    /// Lookup as of `now`; expired entries read as absent.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let entries = self.entries.lock();
        let slot = entries.get(key)?;
        if slot.is_expired(now, self.ttl) {
            return None;
        }
        Some(slot.data().clone())
    }

    /// Stores `value` stamped with the current time and persists the cache.
    pub fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.set_at(key, value, Utc::now())
    }

    /// Stores `value` stamped with `now` and persists the cache.
    pub fn set_at(&self, key: &str, value: Value, now: DateTime<Utc>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), CacheSlot::stamped(value, now));
        purge_expired(&mut entries, now, self.ttl);
        self.persist(&entries)
    }

    /// Removes every entry and persists the empty document.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries)
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn persist(&self, entries: &BTreeMap<String, CacheSlot>) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let bytes = serde_json::to_vec_pretty(entries)?;
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|source| CacheError::Persist {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

fn purge_expired(entries: &mut BTreeMap<String, CacheSlot>, now: DateTime<Utc>, ttl: Duration) {
    entries.retain(|_, slot| !slot.is_expired(now, ttl));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> MetadataCache {
        MetadataCache::open(dir.path().join("show_cache.json"), 7).unwrap()
    }

    #[test]
    fn entries_expire_after_ttl() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let written = Utc::now();

        cache
            .set_at("series_dexter", json!({"id": 79349}), written)
            .unwrap();

        assert_eq!(
            cache.get_at("series_dexter", written + Duration::days(6)),
            Some(json!({"id": 79349}))
        );
        assert_eq!(cache.get_at("series_dexter", written + Duration::days(8)), None);
    }

    #[test]
    fn legacy_entries_never_expire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("show_cache.json");
        std::fs::write(&path, r#"{"series_old": {"id": 1, "name": "Old Show"}}"#).unwrap();

        let cache = MetadataCache::open(&path, 7).unwrap();
        let far_future = Utc::now() + Duration::days(3650);
        assert_eq!(
            cache.get_at("series_old", far_future),
            Some(json!({"id": 1, "name": "Old Show"}))
        );
    }

    #[test]
    fn expired_and_unparseable_entries_are_purged_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("show_cache.json");
        let stale = (Utc::now() - Duration::days(30)).to_rfc3339();
        let fresh = Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        let doc = json!({
            "stale": {"data": 1, "timestamp": stale},
            "fresh": {"data": 2, "timestamp": fresh},
            "garbled": {"data": 3, "timestamp": "yesterday-ish"},
        });
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let cache = MetadataCache::open(&path, 7).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
        assert_eq!(cache.get("garbled"), None);
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        cache_in(&dir)
            .set("episodes_42", json!([{"seasonNumber": 1, "number": 2}]))
            .unwrap();

        let reopened = cache_in(&dir);
        assert_eq!(
            reopened.get("episodes_42"),
            Some(json!([{"seasonNumber": 1, "number": 2}]))
        );
    }

    #[test]
    fn corrupt_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("show_cache.json");
        std::fs::write(&path, b"{not json").unwrap();

        let cache = MetadataCache::open(&path, 7).unwrap();
        assert!(cache.is_empty());
        cache.set("k", json!("v")).unwrap();
        assert_eq!(cache_in(&dir).get("k"), Some(json!("v")));
    }

    #[test]
    fn clear_empties_the_document() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.set("a", json!(1)).unwrap();
        cache.clear().unwrap();
        assert!(cache_in(&dir).is_empty());
    }
}

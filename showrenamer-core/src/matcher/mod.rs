//! Resolution of extracted show names and episode numbers to catalog records.
//!
//! Both lookups go through [`MetadataCache`] first. A series match is only
//! cached once it has cleared the score threshold and, when a
//! [`MatchConfirmer`] is installed, been confirmed.

pub mod score;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::catalog::{CatalogClient, EpisodeRecord, SeriesRecord};
use crate::error::Result;

pub use score::similarity;

/// Minimum score for a series match without confirmation.
pub const DEFAULT_MATCH_THRESHOLD: u8 = 50;

/// Asks a human whether a fuzzy series match is the right one.
#[async_trait]
pub trait MatchConfirmer: Send + Sync {
    async fn confirm(&self, candidate: &str, series: &SeriesRecord) -> bool;
}

/// Picks the best-scoring record; earlier records win ties.
///
/// A record scores the better of its primary and localized name.
pub fn best_match<'a>(candidate: &str, results: &'a [SeriesRecord]) -> Option<(&'a SeriesRecord, u8)> {
    let mut best: Option<(&SeriesRecord, u8)> = None;
    for record in results {
        let primary = similarity(candidate, &record.name);
        let localized = record
            .localized_name
            .as_deref()
            .map_or(0, |name| similarity(candidate, name));
        let score = primary.max(localized);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((record, score));
        }
    }
    best
}

/// Finds catalog series and episodes for parsed file names, through the cache.
pub struct SeriesMatcher {
    catalog: Arc<dyn CatalogClient>,
    cache: Arc<MetadataCache>,
    confirmer: Option<Arc<dyn MatchConfirmer>>,
    language: String,
    threshold: u8,
}

impl std::fmt::Debug for SeriesMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesMatcher")
            .field("language", &self.language)
            .field("threshold", &self.threshold)
            .field("interactive", &self.confirmer.is_some())
            .finish_non_exhaustive()
    }
}

impl SeriesMatcher {
    /// Matcher with the default threshold and no confirmer.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        cache: Arc<MetadataCache>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            cache,
            confirmer: None,
            language: language.into(),
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    /// Sets the match threshold, capped at 100.
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold.min(100);
        self
    }

    /// Asks `confirmer` before accepting a fuzzy match.
    pub fn with_confirmer(mut self, confirmer: Arc<dyn MatchConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Resolves an extracted show name to a catalog series.
    ///
    /// `Ok(None)` when the catalog has nothing close enough or the match was
    /// rejected interactively.
    pub async fn resolve_series(&self, candidate: &str) -> Result<Option<SeriesRecord>> {
        let key = format!("series_{candidate}");
        if let Some(record) = self
            .cache
            .get(&key)
            .and_then(|value| SeriesRecord::from_catalog_value(&value, &self.language))
        {
            debug!(candidate, series_id = record.id, "series cache hit");
            return Ok(Some(record));
        }

        let results = self.catalog.search_series(candidate).await?;
        let Some((best, score)) = best_match(candidate, &results) else {
            debug!(candidate, "catalog search returned nothing");
            return Ok(None);
        };

        if score < self.threshold {
            debug!(
                candidate,
                best = %best.name,
                score,
                threshold = self.threshold,
                "best series match below threshold"
            );
            return Ok(None);
        }

        if let Some(confirmer) = &self.confirmer
            && !confirmer.confirm(candidate, best).await
        {
            info!(candidate, series = %best.name, "series match rejected");
            return Ok(None);
        }

        info!(candidate, series = %best.name, series_id = best.id, score, "series matched");
        self.store(&key, best);
        Ok(Some(best.clone()))
    }

    /// Looks up one episode of a series.
    ///
    /// The cached list is refreshed from the catalog at most once per call:
    /// when no list is cached, when the requested episode is missing from it,
    /// or when the cached entry carries no name.
    pub async fn resolve_episode(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<Option<EpisodeRecord>> {
        let key = format!("episodes_{series_id}");
        let cached = self
            .cache
            .get(&key)
            .and_then(|value| EpisodeRecord::list_from_value(series_id, &value, &self.language));

        match cached.as_deref().map(|list| find_episode(list, season, episode)) {
            Some(Some(found)) if found.has_name() => return Ok(Some(found.clone())),
            Some(Some(_)) => debug!(series_id, season, episode, "cached episode has no name; refreshing"),
            Some(None) => debug!(series_id, season, episode, "episode not in cached list; refreshing"),
            None => debug!(series_id, "no cached episode list"),
        }

        let fresh = self.catalog.episodes(series_id).await?;
        self.store(&key, &fresh);
        Ok(find_episode(&fresh, season, episode).cloned())
    }

    fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let stored = serde_json::to_value(value)
            .map_err(crate::error::CacheError::from)
            .and_then(|value| self.cache.set(key, value));
        if let Err(err) = stored {
            warn!(key, error = %err, "failed to write metadata cache");
        }
    }
}

fn find_episode(list: &[EpisodeRecord], season: u32, episode: u32) -> Option<&EpisodeRecord> {
    list.iter().find(|record| record.is(season, episode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockCatalogClient;
    use crate::error::CatalogError;
    use mockall::predicate::eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn series(id: u64, name: &str, localized: Option<&str>) -> SeriesRecord {
        SeriesRecord {
            id,
            name: name.to_string(),
            localized_name: localized.map(str::to_string),
            year: None,
        }
    }

    fn episode(season: u32, number: u32, name: Option<&str>) -> EpisodeRecord {
        EpisodeRecord {
            series_id: 1,
            season_number: season,
            episode_number: number,
            name: name.map(str::to_string),
            localized_name: None,
        }
    }

    fn cache(dir: &TempDir) -> Arc<MetadataCache> {
        Arc::new(MetadataCache::open(dir.path().join("cache.json"), 7).unwrap())
    }

    struct Answer(bool);

    #[async_trait]
    impl MatchConfirmer for Answer {
        async fn confirm(&self, _candidate: &str, _series: &SeriesRecord) -> bool {
            self.0
        }
    }

    #[test]
    fn first_record_wins_ties_and_localized_name_counts() {
        let results = vec![
            series(1, "Lost", None),
            series(2, "Lost", None),
            series(3, "Something Else", Some("Haus des Geldes")),
        ];
        let (best, score) = best_match("lost", &results).unwrap();
        assert_eq!((best.id, score), (1, 100));

        let (best, _) = best_match("haus des geldes", &results).unwrap();
        assert_eq!(best.id, 3);
        assert!(best_match("lost", &[]).is_none());
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_search_series()
            .withf(|query| query == "dexter")
            .times(1)
            .returning(|_| Ok(vec![series(79349, "Dexter", None)]));

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache(&dir), "deu");
        let first = matcher.resolve_series("dexter").await.unwrap();
        let second = matcher.resolve_series("dexter").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().id, 79349);
    }

    #[tokio::test]
    async fn weak_match_is_rejected_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_search_series()
            .times(1)
            .returning(|_| Ok(vec![series(5, "Completely Unrelated", None)]));

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache.clone(), "deu");
        assert_eq!(matcher.resolve_series("dexter").await.unwrap(), None);
        assert!(cache.get("series_dexter").is_none());
    }

    #[tokio::test]
    async fn declined_confirmation_yields_none() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_search_series()
            .returning(|_| Ok(vec![series(79349, "Dexter", None)]));

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache.clone(), "deu")
            .with_confirmer(Arc::new(Answer(false)));
        assert_eq!(matcher.resolve_series("dexter").await.unwrap(), None);
        assert!(cache.get("series_dexter").is_none());
    }

    #[tokio::test]
    async fn catalog_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_search_series()
            .returning(|_| Err(CatalogError::Login("denied".into())));

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache(&dir), "deu");
        assert!(matcher.resolve_series("dexter").await.is_err());
    }

    #[tokio::test]
    async fn nameless_cached_episode_forces_refresh() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache
            .set("episodes_1", json!([{"seasonNumber": 1, "number": 2}]))
            .unwrap();

        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_episodes()
            .with(eq(1u64))
            .times(1)
            .returning(|_| Ok(vec![episode(1, 2, Some("Crocodile"))]));

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache.clone(), "deu");
        let found = matcher.resolve_episode(1, 1, 2).await.unwrap().unwrap();
        assert_eq!(found.display_name(), Some("Crocodile"));

        // Refreshed list is now cached, so no further catalog call happens.
        let again = matcher.resolve_episode(1, 1, 2).await.unwrap();
        assert_eq!(again, Some(found));
    }

    #[tokio::test]
    async fn named_cached_episode_skips_catalog() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache
            .set("episodes_1", json!([{"seasonNumber": 1, "number": 1, "name": "Pilot"}]))
            .unwrap();

        let mut catalog = MockCatalogClient::new();
        catalog.expect_episodes().times(0);

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache, "deu");
        let found = matcher.resolve_episode(1, 1, 1).await.unwrap().unwrap();
        assert_eq!(found.display_name(), Some("Pilot"));
    }

    #[tokio::test]
    async fn missing_episode_refreshes_once() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache
            .set("episodes_1", json!([{"seasonNumber": 1, "number": 1, "name": "Pilot"}]))
            .unwrap();

        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_episodes()
            .times(1)
            .returning(|_| Ok(vec![episode(1, 1, Some("Pilot"))]));

        let matcher = SeriesMatcher::new(Arc::new(catalog), cache, "deu");
        assert_eq!(matcher.resolve_episode(1, 4, 9).await.unwrap(), None);
    }
}

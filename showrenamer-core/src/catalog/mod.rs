//! Remote episode catalog.
//!
//! [`CatalogClient`] is the seam the matcher talks to; [`tvdb::TvdbClient`] is
//! the production implementation. Both catalog responses and cached documents
//! pass through the same normalization functions so the rest of the pipeline
//! only ever sees [`SeriesRecord`] and [`EpisodeRecord`].

pub mod tvdb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CatalogError;

pub use tvdb::TvdbClient;

/// A catalog series, or a search summary of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRecord {
    /// Catalog id.
    pub id: u64,
    /// Primary name.
    pub name: String,
    /// Name in the configured language, if translated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_name: Option<String>,
    /// First-aired year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl SeriesRecord {
    /// Builds a record from a catalog search hit or a cached document.
    ///
    /// Accepts the current camelCase shape as well as raw search payloads
    /// (`tvdb_id`, `series-<n>` ids, `translations` keyed by language).
    pub fn from_catalog_value(value: &Value, language: &str) -> Option<Self> {
        let obj = value.as_object()?;
        let id = obj
            .get("tvdb_id")
            .and_then(value_as_u64)
            .or_else(|| obj.get("id").and_then(value_as_u64))?;
        let name = obj.get("name").and_then(non_empty_str)?.to_string();
        let localized_name = localized_from(obj, language);
        let year = obj.get("year").and_then(|year| match year {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Some(Self {
            id,
            name,
            localized_name,
            year,
        })
    }

    /// Localized name when the catalog has one, else the primary name.
    pub fn display_name(&self) -> &str {
        self.localized_name.as_deref().unwrap_or(&self.name)
    }
}

/// One episode of a series with canonical numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRecord {
    /// Catalog id of the series.
    pub series_id: u64,
    /// Season number; 0 is specials.
    pub season_number: u32,
    /// Episode number within the season.
    #[serde(rename = "number")]
    pub episode_number: u32,
    /// Primary episode title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Title in the configured language, if translated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_name: Option<String>,
}

impl EpisodeRecord {
    /// Builds a record from a catalog episode or a cached document.
    ///
    /// Entries without a season or episode number yield `None`.
    pub fn from_catalog_value(series_id: u64, value: &Value, language: &str) -> Option<Self> {
        let obj = value.as_object()?;
        let season_number = obj.get("seasonNumber").and_then(value_as_u32)?;
        let episode_number = obj
            .get("number")
            .and_then(value_as_u32)
            .or_else(|| obj.get("episodeNumber").and_then(value_as_u32))?;
        let series_id = obj
            .get("seriesId")
            .and_then(value_as_u64)
            .unwrap_or(series_id);

        Some(Self {
            series_id,
            season_number,
            episode_number,
            name: obj.get("name").and_then(non_empty_str).map(str::to_string),
            localized_name: localized_from(obj, language),
        })
    }

    /// Normalizes a whole episode list, dropping unusable entries.
    pub fn list_from_value(series_id: u64, value: &Value, language: &str) -> Option<Vec<Self>> {
        let items = value.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| Self::from_catalog_value(series_id, item, language))
                .collect(),
        )
    }

    /// True when some title is known.
    pub fn has_name(&self) -> bool {
        self.localized_name.is_some() || self.name.is_some()
    }

    /// Localized title when present, else the primary one.
    pub fn display_name(&self) -> Option<&str> {
        self.localized_name.as_deref().or(self.name.as_deref())
    }

    /// True for season `season`, episode `episode`.
    pub fn is(&self, season: u32, episode: u32) -> bool {
        self.season_number == season && self.episode_number == episode
    }
}

/// Reduces catalog ids such as `series-81189` to the numeric id.
pub fn parse_series_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.strip_prefix("series-").unwrap_or(raw).parse().ok()
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_series_id(s),
        _ => None,
    }
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn localized_from(obj: &serde_json::Map<String, Value>, language: &str) -> Option<String> {
    obj.get("localizedName")
        .and_then(non_empty_str)
        .or_else(|| {
            obj.get("translations")
                .and_then(|t| t.get(language))
                .and_then(non_empty_str)
        })
        .map(str::to_string)
}

/// Read access to the remote catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Series whose names resemble `query`; empty when nothing matched.
    async fn search_series(&self, query: &str) -> Result<Vec<SeriesRecord>, CatalogError>;

    /// Every episode of the series across all pages.
    async fn episodes(&self, series_id: u64) -> Result<Vec<EpisodeRecord>, CatalogError>;
}

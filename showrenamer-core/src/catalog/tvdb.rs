//! TheTVDB v4 client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

use super::{CatalogClient, EpisodeRecord, SeriesRecord};
use crate::error::CatalogError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_EPISODE_PAGES: u32 = 200;

/// TheTVDB v4 client.
///
/// The bearer token is requested on first use and kept for the lifetime of
/// the client.
pub struct TvdbClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Zeroizing<String>,
    language: String,
    token: OnceCell<Zeroizing<String>>,
}

impl fmt::Debug for TvdbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TvdbClient")
            .field("base_url", &self.base_url.as_str())
            .field("language", &self.language)
            .field("authenticated", &self.token.initialized())
            .finish_non_exhaustive()
    }
}

impl TvdbClient {
    /// Client for `base_url`. Logs in lazily on the first request.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        language: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url)?,
            api_key: Zeroizing::new(api_key.into()),
            language: language.into(),
            token: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn token(&self) -> Result<&str, CatalogError> {
        let token = self.token.get_or_try_init(|| self.login()).await?;
        Ok(token.as_str())
    }

    async fn login(&self) -> Result<Zeroizing<String>, CatalogError> {
        let url = self.endpoint("login")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "apikey": self.api_key.as_str() }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Login(format!("status {status}")));
        }
        let body: Value = response.json().await?;
        let token = token_from_login(&body)?;
        debug!("catalog session established");
        Ok(token)
    }

    async fn get_json(&self, url: Url) -> Result<Value, CatalogError> {
        let token = self.token().await?;
        let endpoint = url.path().to_string();
        let response = self.http.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Response {
                endpoint,
                message: format!("status {status}"),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CatalogClient for TvdbClient {
    async fn search_series(&self, query: &str) -> Result<Vec<SeriesRecord>, CatalogError> {
        let mut url = self.endpoint("search")?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("type", "series");

        let body = self.get_json(url).await?;
        let results = series_from_search(&body, &self.language);
        debug!(query, results = results.len(), "catalog search");
        Ok(results)
    }

    async fn episodes(&self, series_id: u64) -> Result<Vec<EpisodeRecord>, CatalogError> {
        let path = format!("series/{series_id}/episodes/default/{}", self.language);
        let mut episodes = Vec::new();

        for page in 0..MAX_EPISODE_PAGES {
            let mut url = self.endpoint(&path)?;
            url.query_pairs_mut().append_pair("page", &page.to_string());

            let body = self.get_json(url).await?;
            let (batch, has_next) = episode_page(series_id, &body, &self.language)?;
            episodes.extend(batch);
            if !has_next {
                debug!(series_id, episodes = episodes.len(), pages = page + 1, "episodes fetched");
                return Ok(episodes);
            }
        }

        warn!(series_id, "episode listing exceeded page limit; result truncated");
        Ok(episodes)
    }
}

fn normalize_base(raw: &str) -> Result<Url, CatalogError> {
    Ok(Url::parse(&format!("{}/", raw.trim_end_matches('/')))?)
}

fn token_from_login(body: &Value) -> Result<Zeroizing<String>, CatalogError> {
    body.pointer("/data/token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(|token| Zeroizing::new(token.to_string()))
        .ok_or_else(|| CatalogError::Login("response carried no token".to_string()))
}

fn series_from_search(body: &Value, language: &str) -> Vec<SeriesRecord> {
    body.get("data")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| SeriesRecord::from_catalog_value(hit, language))
                .collect()
        })
        .unwrap_or_default()
}

fn episode_page(
    series_id: u64,
    body: &Value,
    language: &str,
) -> Result<(Vec<EpisodeRecord>, bool), CatalogError> {
    let episodes = body.pointer("/data/episodes").ok_or_else(|| CatalogError::Response {
        endpoint: format!("series/{series_id}/episodes"),
        message: "missing data.episodes".to_string(),
    })?;
    let batch = EpisodeRecord::list_from_value(series_id, episodes, language).unwrap_or_default();
    let has_next = body
        .pointer("/links/next")
        .is_some_and(|next| !next.is_null() && next.as_str() != Some(""));
    Ok((batch, has_next))
}

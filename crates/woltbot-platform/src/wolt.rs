//! Wolt restaurant API client.
//!
//! Two endpoints are used:
//! - `GET {base}/v3/venues/slug/{slug}` for a venue's live state
//! - `GET {base}/v1/pages/search?q=..&lat=..&lon=..` for name lookup
//!
//! Response parsing lives in pure functions so it can be tested without HTTP.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use woltbot_core::{
    config::WoltConfig,
    error::{PlatformError, WoltbotError},
    model::{Observation, VenueMatch},
    traits::PlatformClient,
};

/// Search section name Wolt returns when nothing matched.
const NO_CONTENT_SECTION: &str = "no-content";

/// Client for Wolt's public restaurant API.
pub struct WoltClient {
    client: reqwest::Client,
    base_url: String,
    lat: f64,
    lon: f64,
}

impl WoltClient {
    /// Create from config values.
    pub fn from_config(config: &WoltConfig) -> Result<Self, WoltbotError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| WoltbotError::Config(format!("wolt: failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            lat: config.lat,
            lon: config.lon,
        })
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, PlatformError> {
        debug!("wolt: GET {url}");
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| PlatformError::Unreachable(format!("wolt request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .text()
                .await
                .map_err(|e| PlatformError::Unreachable(format!("wolt: failed to read body: {e}")));
        }
        Err(status_error(status, &resp, url))
    }
}

#[async_trait]
impl PlatformClient for WoltClient {
    fn name(&self) -> &str {
        "wolt"
    }

    async fn fetch_state(&self, slug: &str) -> Result<Observation, PlatformError> {
        let url = format!("{}/v3/venues/slug/{slug}", self.base_url);
        let body = self.get(&url, &[]).await.map_err(|e| match e {
            PlatformError::NotFound(_) => PlatformError::NotFound(slug.to_string()),
            other => other,
        })?;
        parse_venue(&body, slug)
    }

    async fn search(&self, query: &str) -> Result<Vec<VenueMatch>, PlatformError> {
        let url = format!("{}/v1/pages/search", self.base_url);
        let params = [
            ("q", query.to_string()),
            ("lat", self.lat.to_string()),
            ("lon", self.lon.to_string()),
        ];
        let body = self.get(&url, &params).await?;
        parse_search(&body)
    }
}

/// Map a non-success HTTP status to a platform error.
fn status_error(status: StatusCode, resp: &Response, url: &str) -> PlatformError {
    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited {
            retry_after: resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        },
        other => PlatformError::Unreachable(format!("wolt returned {other}")),
    }
}

/// `Retry-After` in its delta-seconds form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[derive(Deserialize)]
struct VenueResponse {
    #[serde(default)]
    results: Vec<VenueResult>,
}

#[derive(Deserialize)]
struct VenueResult {
    #[serde(default)]
    name: Value,
    online: bool,
    delivery_specs: DeliverySpecs,
    #[serde(default)]
    estimate: Option<u32>,
}

#[derive(Deserialize)]
struct DeliverySpecs {
    delivery_enabled: bool,
}

/// Parse a venue response into an observation stamped now.
///
/// Wolt answers an unknown slug with an empty `results` list rather than 404
/// on some deployments, so both mean not found.
pub fn parse_venue(body: &str, slug: &str) -> Result<Observation, PlatformError> {
    let parsed: VenueResponse = serde_json::from_str(body)
        .map_err(|e| PlatformError::Malformed(format!("venue {slug}: {e}")))?;
    let venue = parsed
        .results
        .into_iter()
        .next()
        .ok_or_else(|| PlatformError::NotFound(slug.to_string()))?;

    Ok(Observation {
        slug: slug.to_string(),
        name: venue_name(&venue.name).unwrap_or_else(|| slug.to_string()),
        online: venue.online,
        delivery_enabled: venue.delivery_specs.delivery_enabled,
        estimate_minutes: venue.estimate,
        observed_at: Utc::now(),
    })
}

/// Venue names come either as a plain string or as a list of
/// `{lang, value}` translations; the first translation wins.
fn venue_name(name: &Value) -> Option<String> {
    match name {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items
            .iter()
            .filter_map(|t| t.get("value").and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    sections: Vec<SearchSection>,
}

#[derive(Deserialize)]
struct SearchSection {
    #[serde(default)]
    name: String,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    venue: Option<SearchVenue>,
}

#[derive(Deserialize)]
struct SearchVenue {
    slug: String,
}

/// Parse a search response. Only the first section carries venue results.
pub fn parse_search(body: &str) -> Result<Vec<VenueMatch>, PlatformError> {
    let parsed: SearchResponse = serde_json::from_str(body)
        .map_err(|e| PlatformError::Malformed(format!("search: {e}")))?;

    let Some(section) = parsed.sections.into_iter().next() else {
        return Ok(Vec::new());
    };
    if section.name == NO_CONTENT_SECTION {
        return Ok(Vec::new());
    }

    Ok(section
        .items
        .into_iter()
        .filter_map(|item| {
            let venue = item.venue?;
            let name = if item.title.is_empty() {
                venue.slug.clone()
            } else {
                item.title
            };
            Some(VenueMatch {
                name,
                slug: venue.slug,
            })
        })
        .collect())
}

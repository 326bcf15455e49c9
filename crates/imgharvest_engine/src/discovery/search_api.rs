use engine_logging::{engine_info, engine_warn};
use imgharvest_core::{is_http_url, url_basename, Candidate};
use scraper::{Html, Selector};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{release_batch, CandidateSink, Discovery, DiscoveryReport};
use crate::fetch::Fetcher;
use crate::ScrapeError;

#[derive(Debug, Clone)]
pub struct SearchApiSettings {
    pub endpoint: String,
}

impl Default for SearchApiSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://www.bing.com/images/search".to_string(),
        }
    }
}

/// One result of the search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub thumbnail: Option<String>,
    pub name: String,
}

/// Reads result anchors (`a.iusc`) and their `m` JSON metadata. Entries
/// without a full-size http(s) URL are dropped; at most `limit` are kept.
pub fn parse_search_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let Some(anchor_sel) = Selector::parse("a.iusc").ok() else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for anchor in document.select(&anchor_sel) {
        if hits.len() >= limit {
            break;
        }
        let Some(meta) = anchor
            .value()
            .attr("m")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        else {
            continue;
        };
        let Some(url) = meta.get("murl").and_then(Value::as_str) else {
            continue;
        };
        if !is_http_url(url) {
            continue;
        }

        let thumbnail = meta
            .get("turl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                anchor
                    .value()
                    .attr("mad")
                    .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                    .and_then(|mad| mad.get("turl").and_then(Value::as_str).map(str::to_string))
            });

        hits.push(SearchHit {
            url: url.to_string(),
            thumbnail,
            name: url_basename(url),
        });
    }
    hits
}

/// Search-endpoint URL for `query`; the request asks for one page.
pub fn search_url(endpoint: &str, query: &str) -> Result<Url, ScrapeError> {
    Url::parse_with_params(
        endpoint,
        &[
            ("q", query),
            ("form", "HDRSC2"),
            ("first", "0"),
            ("tsc", "ImageBasicHover"),
        ],
    )
    .map_err(|err| ScrapeError::Setup(format!("invalid search endpoint {endpoint}: {err}")))
}

/// Single-request strategy: fetch one results page and emit its hits.
pub struct SearchApiDiscovery<'a> {
    fetcher: &'a dyn Fetcher,
    settings: &'a SearchApiSettings,
    query: String,
    limit: usize,
}

impl<'a> SearchApiDiscovery<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        settings: &'a SearchApiSettings,
        query: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            fetcher,
            settings,
            query: query.into(),
            limit,
        }
    }

    /// Origin of the endpoint with a trailing slash, sent as the referrer.
    fn referrer(&self, endpoint: &Url) -> String {
        format!("{}/", endpoint.origin().ascii_serialization())
    }
}

#[async_trait::async_trait]
impl Discovery for SearchApiDiscovery<'_> {
    async fn discover(
        &self,
        sink: &mut dyn CandidateSink,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport, ScrapeError> {
        let mut report = DiscoveryReport::default();
        if cancel.is_cancelled() {
            return Ok(report);
        }

        let url = search_url(&self.settings.endpoint, &self.query)?;
        engine_info!("Querying {}", url);
        let page = self
            .fetcher
            .fetch_page(url.as_str())
            .await
            .map_err(|err| ScrapeError::Discovery(format!("search request failed: {err}")))?;

        let hits = parse_search_results(&page.html, self.limit);
        if hits.is_empty() {
            engine_warn!("No results parsed for {:?}", self.query);
        }
        let referrer = self.referrer(&url);
        let candidates = hits
            .into_iter()
            .map(|hit| Candidate::new(hit.url, referrer.clone()).with_name(hit.name))
            .collect();
        release_batch(candidates, sink, &mut report).await;
        Ok(report)
    }
}

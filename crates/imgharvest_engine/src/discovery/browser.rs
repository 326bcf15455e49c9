use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use imgharvest_core::{is_data_image_uri, is_http_url, url_basename, Candidate, ResolutionWindow};
use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;

use super::{CandidateSink, Discovery, DiscoveryReport};
use crate::browser::{
    first_attribute, first_matching, wait_for_first_match, wait_until_true, BrowserDriver,
    DriverError, ElementId,
};
use crate::filename::data_uri_filename;
use crate::ScrapeError;

/// Result-card containers, most specific first.
pub const CARD_SELECTORS: &[&str] = &[
    "div.isv-r.PNCib.MSM1fd.BUooTd",
    "div.isv-r.PNCib.MSM1fd",
    "div.isv-r",
    "div.q1MG4e",
    "div.F0uyec",
];

/// Attributes identifying a card, checked on the card then on its anchor.
pub const CARD_KEY_ATTRIBUTES: &[&str] = &["data-id", "data-ri", "jsname", "data-ved"];

/// Preview-pane image selectors, in priority order.
pub const FULL_RES_SELECTORS: &[&str] = &[
    "img.n3VNCb",
    "img.sFlh5c",
    "img.pT0Scc",
    "img.iPVvYb",
    "img.r48jcc",
    "img.gy84bd",
];

pub const LOAD_MORE_SELECTOR: &str = ".mye4qd";

const CONSENT_SCRIPT: &str = "(() => { \
    const labels = ['I agree', 'Accept all']; \
    for (const b of document.querySelectorAll('button')) { \
        const text = (b.innerText || b.textContent || '').trim(); \
        if (labels.includes(text)) { b.click(); return true; } \
    } \
    return false; })()";

static PAYLOAD_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(r#"\["(https?://[^"]+\.(?:jpg|jpeg|png|gif|webp))"(?:,|\])"#)
        .case_insensitive(true)
        .build()
        .ok()
});

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Query is appended URL-encoded.
    pub search_url: String,
    /// Hosts whose images are never candidates (thumbnails, sprites).
    pub host_domains: Vec<String>,
    pub consent_wait: Duration,
    pub full_res_wait: Duration,
    pub poll_interval: Duration,
    pub card_settle: Duration,
    pub scroll_pause: Duration,
    pub empty_page_pause: Duration,
    pub load_more_pause: Duration,
    pub empty_page_scroll: i64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            search_url: "https://www.google.com/search?tbm=isch&hl=en&q=".to_string(),
            host_domains: vec![
                "google.com".to_string(),
                "gstatic.com".to_string(),
                "googleusercontent.com".to_string(),
            ],
            consent_wait: Duration::from_secs(3),
            full_res_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            card_settle: Duration::from_millis(100),
            scroll_pause: Duration::from_millis(200),
            empty_page_pause: Duration::from_millis(500),
            load_more_pause: Duration::from_millis(500),
            empty_page_scroll: 600,
        }
    }
}

/// True when `url` is served from one of `domains` or their subdomains.
pub fn is_host_owned(url: &str, domains: &[String]) -> bool {
    match url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
        Some(host) => domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}"))),
        None => domains.iter().any(|d| url.contains(d.as_str())),
    }
}

/// External image URLs embedded in the page's script payload, in order of
/// first appearance.
pub fn scan_page_payload(source: &str, domains: &[String]) -> Vec<String> {
    let Some(pattern) = PAYLOAD_URL.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    pattern
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|url| !is_host_owned(url, domains))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

enum CardOutcome {
    /// A candidate was queued, or the card pointed at a known image.
    Resolved,
    Missed,
    AlreadyProcessed,
}

enum Lookup {
    Found { url: String, name: String },
    Known,
    NotFound,
}

#[derive(Default)]
struct BrowseState {
    collected: usize,
    misses: u32,
    last_height: u64,
    processed: HashSet<String>,
    queued: HashSet<String>,
    report: DiscoveryReport,
}

/// Interactive strategy: opens each result card and collects the
/// full-resolution image it reveals. Candidates stream to the sink as they
/// are found.
pub struct BrowserSearchDiscovery<'a> {
    driver: &'a dyn BrowserDriver,
    settings: &'a BrowserSettings,
    query: String,
    limit: usize,
    window: ResolutionWindow,
    max_missed: u32,
}

impl<'a> BrowserSearchDiscovery<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        settings: &'a BrowserSettings,
        query: impl Into<String>,
        limit: usize,
        window: ResolutionWindow,
        max_missed: u32,
    ) -> Self {
        Self {
            driver,
            settings,
            query: query.into(),
            limit,
            window,
            max_missed: max_missed.max(1),
        }
    }

    fn results_url(&self) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(self.query.as_bytes()).collect();
        format!("{}{}", self.settings.search_url, encoded)
    }

    async fn dismiss_consent(&self) {
        let clicked = wait_until_true(
            self.driver,
            CONSENT_SCRIPT,
            self.settings.consent_wait,
            self.settings.poll_interval,
        )
        .await;
        if clicked {
            engine_debug!("Dismissed consent dialog");
        }
    }

    async fn card_key(&self, card: ElementId) -> (String, ElementId) {
        if let Some(key) = first_attribute(self.driver, card, CARD_KEY_ATTRIBUTES).await {
            return (key, card);
        }
        if let Ok(Some(anchor)) = self.driver.closest(card, "a").await {
            if let Some(key) = first_attribute(self.driver, anchor, CARD_KEY_ATTRIBUTES).await {
                return (key, anchor);
            }
        }
        (format!("element-{}", card.0), card)
    }

    async fn thumbnail_of(&self, card: ElementId) -> Option<String> {
        let images = self.driver.find_within(card, "img").await.ok()?;
        let first = *images.first()?;
        first_attribute(self.driver, first, &["src", "data-src"]).await
    }

    async fn process_card(
        &self,
        card: ElementId,
        state: &mut BrowseState,
        sink: &mut dyn CandidateSink,
    ) -> Result<CardOutcome, DriverError> {
        let (key, target) = self.card_key(card).await;
        if !state.processed.insert(key.clone()) {
            return Ok(CardOutcome::AlreadyProcessed);
        }
        let thumbnail = self.thumbnail_of(card).await;

        self.driver.scroll_into_view(card).await?;
        tokio::time::sleep(self.settings.card_settle).await;
        if let Err(err) = self.driver.click(target).await {
            engine_debug!("Direct click on card {} failed ({}); using script click", key, err);
            self.driver.script_click(target).await?;
        }

        match self.lookup_image(&key, thumbnail.as_deref(), state, sink).await {
            Lookup::Found { url, name } => {
                let referrer = self.driver.current_url().await.unwrap_or_else(|_| self.results_url());
                state.collected += 1;
                state.queued.insert(url.clone());
                state.report.emitted += 1;
                engine_debug!("Card {} -> {}", key, url);
                sink.accept(Candidate::new(url, referrer).with_name(name)).await;
                Ok(CardOutcome::Resolved)
            }
            Lookup::Known => Ok(CardOutcome::Resolved),
            Lookup::NotFound => Ok(CardOutcome::Missed),
        }
    }

    fn is_taken(&self, url: &str, state: &BrowseState, sink: &dyn CandidateSink) -> bool {
        state.queued.contains(url) || sink.is_known(url)
    }

    /// Full-resolution preview, then other external page images, then the
    /// page payload, then the thumbnail.
    async fn lookup_image(
        &self,
        key: &str,
        thumbnail: Option<&str>,
        state: &BrowseState,
        sink: &dyn CandidateSink,
    ) -> Lookup {
        let mut images = Vec::new();
        for el in wait_for_first_match(
            self.driver,
            FULL_RES_SELECTORS,
            self.settings.full_res_wait,
            self.settings.poll_interval,
        )
        .await
        {
            if let Ok(Some(src)) = self.driver.attribute(el, "src").await {
                if is_http_url(&src) || is_data_image_uri(&src) {
                    images.push((el, src));
                }
            }
        }
        if images.is_empty() {
            images = self.external_images(thumbnail).await;
        }

        for (el, src) in images {
            if let Ok(Some((width, height))) = self.driver.natural_size(el).await {
                if !self.window.accepts(width, height) {
                    engine_debug!("Rejected {} at {}x{}", src, width, height);
                    continue;
                }
            }
            if self.is_taken(&src, state, sink) {
                return Lookup::Known;
            }
            let name = if is_data_image_uri(&src) {
                data_uri_filename(&src)
            } else {
                url_basename(&src)
            };
            return Lookup::Found { url: src, name };
        }

        if let Ok(source) = self.driver.page_source().await {
            let payload = scan_page_payload(&source, &self.settings.host_domains);
            if let Some(url) = payload.into_iter().find(|u| !self.is_taken(u, state, sink)) {
                let mut name = url_basename(&url);
                if name.is_empty() {
                    name = format!("google_img_{}.jpg", state.collected);
                }
                return Lookup::Found { url, name };
            }
        }

        match thumbnail {
            Some(thumb) if self.is_taken(thumb, state, sink) => Lookup::Known,
            Some(thumb) => Lookup::Found {
                url: thumb.to_string(),
                name: format!("thumbnail_{key}.jpg"),
            },
            None => Lookup::NotFound,
        }
    }

    async fn external_images(&self, thumbnail: Option<&str>) -> Vec<(ElementId, String)> {
        let Ok(all) = self.driver.find_elements("img").await else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for el in all {
            let Ok(Some(src)) = self.driver.attribute(el, "src").await else {
                continue;
            };
            if !is_http_url(&src)
                || is_host_owned(&src, &self.settings.host_domains)
                || Some(src.as_str()) == thumbnail
            {
                continue;
            }
            found.push((el, src));
        }
        found
    }

    async fn advance_scroll(&self, state: &mut BrowseState) {
        if let Err(err) = self.driver.scroll_to_bottom().await {
            engine_debug!("Scroll failed: {}", err);
        }
        tokio::time::sleep(self.settings.scroll_pause).await;

        let height = self.driver.scroll_height().await.unwrap_or(state.last_height);
        if height == state.last_height {
            self.click_load_more().await;
            state.misses += 1;
        } else {
            state.last_height = height;
        }
    }

    async fn click_load_more(&self) {
        let Ok(buttons) = self.driver.find_elements(LOAD_MORE_SELECTOR).await else {
            return;
        };
        if let Some(&button) = buttons.first() {
            if self.driver.script_click(button).await.is_ok() {
                engine_debug!("Requested more results");
                tokio::time::sleep(self.settings.load_more_pause).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Discovery for BrowserSearchDiscovery<'_> {
    async fn discover(
        &self,
        sink: &mut dyn CandidateSink,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport, ScrapeError> {
        let url = self.results_url();
        engine_info!("Opening {}", url);
        self.driver
            .navigate(&url)
            .await
            .map_err(|err| ScrapeError::Discovery(format!("could not open results page: {err}")))?;
        self.dismiss_consent().await;

        let mut state = BrowseState::default();
        while state.collected < self.limit && state.misses < self.max_missed {
            if cancel.is_cancelled() {
                engine_info!("Browser discovery cancelled after {} candidates", state.collected);
                break;
            }

            let cards = first_matching(self.driver, CARD_SELECTORS).await;
            if cards.is_empty() {
                state.misses += 1;
                tokio::time::sleep(self.settings.empty_page_pause).await;
                if let Err(err) = self.driver.scroll_by(self.settings.empty_page_scroll).await {
                    engine_debug!("Scroll failed: {}", err);
                }
                continue;
            }

            for card in cards {
                if cancel.is_cancelled()
                    || state.collected >= self.limit
                    || state.misses >= self.max_missed
                {
                    break;
                }
                match self.process_card(card, &mut state, sink).await {
                    Ok(CardOutcome::Resolved) => state.misses = 0,
                    Ok(CardOutcome::Missed) => state.misses += 1,
                    Ok(CardOutcome::AlreadyProcessed) => {}
                    Err(err) => {
                        engine_warn!("Could not open result card: {}", err);
                        state.report.errors.push(format!("Result card error: {err}"));
                        state.misses += 1;
                    }
                }
            }

            if state.collected < self.limit && !cancel.is_cancelled() {
                self.advance_scroll(&mut state).await;
            }
        }

        engine_info!(
            "Browser discovery finished with {} candidates ({} consecutive misses)",
            state.collected,
            state.misses
        );
        Ok(state.report)
    }
}

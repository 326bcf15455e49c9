use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use imgharvest_core::{is_data_image_uri, normalize_seed_url, url_basename, Candidate};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{release_batch, CandidateSink, Discovery, DiscoveryReport};
use crate::browser::{BrowserDriver, DriverError, ElementId};
use crate::ScrapeError;

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Scroll-to-bottom passes per page, to trigger lazy loading.
    pub scroll_passes: u32,
    pub scroll_pause: Duration,
    /// Links whose path contains one of these words are not followed.
    pub denied_path_words: Vec<String>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            scroll_passes: 3,
            scroll_pause: Duration::from_secs(1),
            denied_path_words: ["login", "signup", "signin", "register", "help", "about", "policy"]
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }
}

/// Picks an image reference: `src`, then `data-src`, then `data-original`,
/// then the last `srcset` entry.
pub fn image_source(
    src: Option<&str>,
    data_src: Option<&str>,
    data_original: Option<&str>,
    srcset: Option<&str>,
) -> Option<String> {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|v| !v.is_empty())
    }
    non_empty(src)
        .or_else(|| non_empty(data_src))
        .or_else(|| non_empty(data_original))
        .map(str::to_string)
        .or_else(|| {
            let last = non_empty(srcset)?.rsplit(',').next()?.trim();
            let url = last.split_whitespace().next()?;
            Some(url.to_string())
        })
}

/// Absolute http(s) URL for `raw` relative to `page`, or the data URI itself.
pub fn resolve_image_url(raw: &str, page: &Url) -> Option<String> {
    if is_data_image_uri(raw) {
        return Some(raw.to_string());
    }
    let resolved = page.join(raw).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// The link to enqueue for `href`, if it stays on the seed's host and port
/// and avoids denied paths. Fragments are dropped.
pub fn follow_link(href: &str, page: &Url, seed: &Url, denied_words: &[String]) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut link = page.join(href).ok()?;
    if !matches!(link.scheme(), "http" | "https") {
        return None;
    }
    if link.host_str() != seed.host_str() || link.port() != seed.port() {
        return None;
    }
    let path = link.path().to_ascii_lowercase();
    if denied_words.iter().any(|word| path.contains(word.as_str())) {
        return None;
    }
    link.set_fragment(None);
    Some(link.to_string())
}

/// Breadth-first same-domain crawl. Images are pooled by URL and released
/// in sorted order once the traversal ends.
pub struct CrawlDiscovery<'a> {
    driver: &'a dyn BrowserDriver,
    settings: &'a CrawlSettings,
    seed: String,
    max_depth: u32,
}

struct Traversal {
    queue: VecDeque<(String, u32)>,
    visited: HashSet<String>,
    pool: BTreeMap<String, Candidate>,
}

impl<'a> CrawlDiscovery<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        settings: &'a CrawlSettings,
        seed: impl AsRef<str>,
        max_depth: u32,
    ) -> Self {
        Self {
            driver,
            settings,
            seed: normalize_seed_url(seed.as_ref()),
            max_depth,
        }
    }

    /// Elements can go stale mid-page; a failed read counts as absent.
    async fn attr(&self, element: ElementId, name: &str) -> Option<String> {
        self.driver.attribute(element, name).await.ok().flatten()
    }

    async fn visit(
        &self,
        page: &str,
        depth: u32,
        seed: &Url,
        walk: &mut Traversal,
        cancel: &CancellationToken,
    ) -> Result<(), DriverError> {
        let page_url = Url::parse(page).map_err(|err| DriverError::new(err.to_string()))?;
        self.driver.navigate(page).await?;

        let mut last_height = self.driver.scroll_height().await.unwrap_or(0);
        for _ in 0..self.settings.scroll_passes {
            if cancel.is_cancelled() {
                break;
            }
            self.driver.scroll_to_bottom().await?;
            tokio::time::sleep(self.settings.scroll_pause).await;
            let height = self.driver.scroll_height().await.unwrap_or(last_height);
            if height == last_height {
                break;
            }
            last_height = height;
        }

        let mut found = 0usize;
        for img in self.driver.find_elements("img").await? {
            let src = self.attr(img, "src").await;
            let data_src = self.attr(img, "data-src").await;
            let data_original = self.attr(img, "data-original").await;
            let srcset = self.attr(img, "srcset").await;
            let Some(url) = image_source(
                src.as_deref(),
                data_src.as_deref(),
                data_original.as_deref(),
                srcset.as_deref(),
            )
            .and_then(|raw| resolve_image_url(&raw, &page_url)) else {
                continue;
            };

            walk.pool.entry(url.clone()).or_insert_with(|| {
                found += 1;
                let candidate = Candidate::new(url.as_str(), page).at_depth(depth);
                if is_data_image_uri(&url) {
                    candidate
                } else {
                    candidate.with_name(url_basename(&url))
                }
            });
        }
        engine_debug!("{} new images on {}", found, page);

        if depth < self.max_depth {
            for anchor in self.driver.find_elements("a[href]").await? {
                let Some(href) = self.attr(anchor, "href").await else {
                    continue;
                };
                if let Some(link) =
                    follow_link(&href, &page_url, seed, &self.settings.denied_path_words)
                {
                    if !walk.visited.contains(&link) {
                        walk.queue.push_back((link, depth + 1));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Discovery for CrawlDiscovery<'_> {
    async fn discover(
        &self,
        sink: &mut dyn CandidateSink,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport, ScrapeError> {
        let seed = Url::parse(&self.seed)
            .map_err(|err| ScrapeError::Discovery(format!("invalid seed url {}: {err}", self.seed)))?;

        let mut report = DiscoveryReport::default();
        let mut walk = Traversal {
            queue: VecDeque::from([(seed.to_string(), 0)]),
            visited: HashSet::new(),
            pool: BTreeMap::new(),
        };

        while let Some((page, depth)) = walk.queue.pop_front() {
            if cancel.is_cancelled() {
                engine_info!("Crawl cancelled with {} pages visited", walk.visited.len());
                break;
            }
            if !walk.visited.insert(page.clone()) {
                continue;
            }
            engine_info!("Crawling {} (depth {})", page, depth);
            if let Err(err) = self.visit(&page, depth, &seed, &mut walk, cancel).await {
                engine_warn!("Crawl error {}: {}", page, err);
                report.errors.push(format!("Crawl error {page}: {err}"));
            }
        }

        engine_info!(
            "Crawl visited {} pages and found {} images",
            walk.visited.len(),
            walk.pool.len()
        );
        let candidates = std::mem::take(&mut walk.pool).into_values().collect();
        release_batch(candidates, sink, &mut report).await;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_chain_prefers_src() {
        assert_eq!(
            image_source(Some("a.jpg"), Some("b.jpg"), None, None).as_deref(),
            Some("a.jpg")
        );
        assert_eq!(
            image_source(Some(" "), None, Some("c.jpg"), None).as_deref(),
            Some("c.jpg")
        );
        assert_eq!(
            image_source(None, None, None, Some("s.jpg 1x, m.jpg 2x, l.jpg 3x")).as_deref(),
            Some("l.jpg")
        );
        assert_eq!(image_source(None, None, None, None), None);
    }

    #[test]
    fn relative_sources_resolve_against_page() {
        let page = Url::parse("https://example.com/gallery/index.html").unwrap();
        assert_eq!(
            resolve_image_url("../img/a.png", &page).as_deref(),
            Some("https://example.com/img/a.png")
        );
        assert_eq!(resolve_image_url("ftp://example.com/a.png", &page), None);
        assert!(resolve_image_url("data:image/gif;base64,R0lG", &page).is_some());
    }

    #[test]
    fn links_stay_on_seed_host() {
        let seed = Url::parse("https://example.com/").unwrap();
        let denied = CrawlSettings::default().denied_path_words;
        assert_eq!(
            follow_link("/photos#top", &seed, &seed, &denied).as_deref(),
            Some("https://example.com/photos")
        );
        assert_eq!(follow_link("https://other.org/x", &seed, &seed, &denied), None);
        assert_eq!(follow_link("https://example.com:8443/x", &seed, &seed, &denied), None);
        assert_eq!(follow_link("/Account/Login", &seed, &seed, &denied), None);
        assert_eq!(follow_link("mailto:me@example.com", &seed, &seed, &denied), None);
    }
}

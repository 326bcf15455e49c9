//! Discovery strategies. Each one turns a query or seed into image
//! candidates and hands them to a [`CandidateSink`] in discovery order.
mod browser;
mod crawl;
mod search_api;

pub use browser::{
    is_host_owned, scan_page_payload, BrowserSearchDiscovery, BrowserSettings, CARD_KEY_ATTRIBUTES,
    CARD_SELECTORS, FULL_RES_SELECTORS, LOAD_MORE_SELECTOR,
};
pub use crawl::{follow_link, image_source, resolve_image_url, CrawlDiscovery, CrawlSettings};
pub use search_api::{parse_search_results, SearchApiDiscovery, SearchApiSettings, SearchHit};

use imgharvest_core::Candidate;
use tokio_util::sync::CancellationToken;

use crate::ScrapeError;

/// Consumer side of a discovery run.
#[async_trait::async_trait]
pub trait CandidateSink: Send + Sync {
    /// True when `url` is already in the destination's ledger.
    fn is_known(&self, url: &str) -> bool;

    async fn accept(&mut self, candidate: Candidate);
}

/// Per-item problems noticed while discovering; never fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub emitted: usize,
    pub errors: Vec<String>,
}

#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    /// Runs the strategy to completion or cancellation. An `Err` means the
    /// backend itself was unusable.
    async fn discover(
        &self,
        sink: &mut dyn CandidateSink,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport, ScrapeError>;
}

/// Hands a finished list to `sink` in order.
pub(crate) async fn release_batch(
    candidates: Vec<Candidate>,
    sink: &mut dyn CandidateSink,
    report: &mut DiscoveryReport,
) {
    for candidate in candidates {
        report.emitted += 1;
        sink.accept(candidate).await;
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::urls::normalize_seed_url;

/// Which discovery strategy drives a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// One page of search-endpoint HTML results.
    SearchApi,
    /// Interactive search results driven through a browser.
    Browser,
    /// Same-domain crawl from a seed URL.
    Crawl,
}

impl SourceKind {
    /// Engine label used in results and synthesized filenames.
    pub fn engine_name(self) -> &'static str {
        match self {
            SourceKind::SearchApi => "bing",
            SourceKind::Browser => "google",
            SourceKind::Crawl => "custom",
        }
    }

    /// Subdirectory of the output directory holding this engine's downloads.
    pub fn directory_name(self) -> &'static str {
        match self {
            SourceKind::SearchApi => "bing",
            SourceKind::Browser => "google",
            SourceKind::Crawl => "custom_url",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bing" | "search_api" | "search-api" => Some(SourceKind::SearchApi),
            "google" | "browser" => Some(SourceKind::Browser),
            "custom" | "crawl" | "url" | "custom_url" => Some(SourceKind::Crawl),
            _ => None,
        }
    }
}

/// Accepted natural-size window; a zero bound leaves that side open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionWindow {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl ResolutionWindow {
    pub fn new(min: (u32, u32), max: (u32, u32)) -> Self {
        Self {
            min_width: min.0,
            min_height: min.1,
            max_width: max.0,
            max_height: max.1,
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn accepts(&self, width: u32, height: u32) -> bool {
        if self.min_width > 0 && width < self.min_width {
            return false;
        }
        if self.min_height > 0 && height < self.min_height {
            return false;
        }
        if self.max_width > 0 && width > self.max_width {
            return false;
        }
        if self.max_height > 0 && height > self.max_height {
            return false;
        }
        true
    }
}

/// Per-run knobs shared by every source of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    /// Images requested per source. Must be positive.
    pub limit: usize,
    pub keep_filenames: bool,
    pub convert_webp: bool,
    /// JPEG quality for re-encoding; 0 leaves quality untouched.
    pub compression_quality: u8,
    /// Maximum width after resizing; 0 disables the bound.
    pub resize_width: u32,
    /// Maximum height after resizing; 0 disables the bound.
    pub resize_height: u32,
    /// Only applied by the browser strategy.
    pub resolution: ResolutionWindow,
    /// Consecutive misses tolerated by the browser strategy.
    pub max_missed: u32,
    /// Link depth followed by the crawl strategy; 0 visits only the seed.
    pub crawl_depth: u32,
    pub output_dir: PathBuf,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            keep_filenames: false,
            convert_webp: false,
            compression_quality: 0,
            resize_width: 0,
            resize_height: 0,
            resolution: ResolutionWindow::new((0, 0), (1920, 1080)),
            max_missed: 10,
            crawl_depth: 0,
            output_dir: PathBuf::from("downloads"),
        }
    }
}

impl ScrapeOptions {
    pub fn wants_compression(&self) -> bool {
        self.compression_quality > 0 || self.resize_width > 0 || self.resize_height > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("enter a search query or URL to continue")]
    EmptyQuery,
    #[error("images per engine must be a positive integer")]
    NonPositiveLimit,
    #[error("choose at least one source")]
    NoSources,
    #[error("invalid seed url {0}")]
    InvalidSeedUrl(String),
}

/// A full scrape request as built by a front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    /// Search query, or the seed URL for crawl sources.
    pub query: String,
    pub sources: Vec<SourceKind>,
    pub options: ScrapeOptions,
}

impl ScrapeRequest {
    pub fn new(query: impl Into<String>, sources: Vec<SourceKind>, options: ScrapeOptions) -> Self {
        Self {
            query: query.into(),
            sources,
            options,
        }
    }

    /// Rejects invalid input and returns the request with a trimmed query,
    /// duplicate sources collapsed (first occurrence wins) and option
    /// bounds sanitized.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        self.query = self.query.trim().to_string();
        if self.query.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        if self.options.limit == 0 {
            return Err(ValidationError::NonPositiveLimit);
        }

        let mut unique = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            if !unique.contains(&source) {
                unique.push(source);
            }
        }
        if unique.is_empty() {
            return Err(ValidationError::NoSources);
        }
        self.sources = unique;

        if self.sources.contains(&SourceKind::Crawl) {
            let seed = normalize_seed_url(&self.query);
            let has_host = url::Url::parse(&seed)
                .ok()
                .and_then(|u| u.host_str().map(|h| !h.is_empty()))
                .unwrap_or(false);
            if !has_host {
                return Err(ValidationError::InvalidSeedUrl(self.query));
            }
        }

        self.options.compression_quality = self.options.compression_quality.min(100);
        self.options.max_missed = self.options.max_missed.max(1);
        Ok(self)
    }
}

use std::path::{Path, PathBuf};

/// A discovered image reference awaiting download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute http(s) URL or a `data:image/...;base64,` URI.
    pub url: String,
    /// Original filename hint, unsanitized.
    pub suggested_name: Option<String>,
    /// Page the image was found on; sent as `Referer` when downloading.
    pub referrer_page: String,
    pub discovered_at_depth: u32,
}

impl Candidate {
    pub fn new(url: impl Into<String>, referrer_page: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            suggested_name: None,
            referrer_page: referrer_page.into(),
            discovered_at_depth: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.suggested_name = if name.trim().is_empty() {
            None
        } else {
            Some(name)
        };
        self
    }

    pub fn at_depth(mut self, depth: u32) -> Self {
        self.discovered_at_depth = depth;
        self
    }

    pub fn is_data_uri(&self) -> bool {
        crate::is_data_image_uri(&self.url)
    }
}

/// Where the bytes of a saved file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSource {
    Network,
    /// Decoded from an embedded data URI.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved { path: PathBuf, source: ByteSource },
    /// Already present in the dedup ledger; no network call was made.
    AlreadyDownloaded,
    Failed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub url: String,
    pub outcome: DownloadOutcome,
    /// Non-fatal post-process failures, already formatted for the error list.
    pub warnings: Vec<String>,
}

impl DownloadRecord {
    pub fn saved(url: impl Into<String>, path: PathBuf, source: ByteSource) -> Self {
        Self {
            url: url.into(),
            outcome: DownloadOutcome::Saved { path, source },
            warnings: Vec::new(),
        }
    }

    pub fn already_downloaded(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outcome: DownloadOutcome::AlreadyDownloaded,
            warnings: Vec::new(),
        }
    }

    pub fn failed(url: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outcome: DownloadOutcome::Failed {
                cause: cause.into(),
            },
            warnings: Vec::new(),
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self.outcome, DownloadOutcome::Saved { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.outcome {
            DownloadOutcome::Saved { path, .. } => Some(path),
            _ => None,
        }
    }

    /// `"{url} ({cause})"` for failed downloads.
    pub fn error_line(&self) -> Option<String> {
        match &self.outcome {
            DownloadOutcome::Failed { cause } => Some(format!("{} ({})", self.url, cause)),
            _ => None,
        }
    }
}

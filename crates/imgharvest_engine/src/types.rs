use std::fmt;
use std::path::PathBuf;

use imgharvest_core::{RunReport, ScrapeResult, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovering,
    Downloading,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProgress {
    pub engine: String,
    pub stage: Stage,
    pub saved: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    SourceStarted {
        engine: String,
        destination: PathBuf,
    },
    Progress(SourceProgress),
    SourceFinished(ScrapeResult),
    RunFinished(RunReport),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Source-level failures. Everything finer grained is absorbed into
/// [`imgharvest_core::RunTally`] instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// A discovery backend or codec could not be initialised; fatal to the run.
    #[error("setup failed: {0}")]
    Setup(String),
    /// The backend was unreachable or rejected the request; fatal to the source.
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ScrapeError {
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, ScrapeError::Setup(_) | ScrapeError::Validation(_))
    }
}

impl From<FetchError> for ScrapeError {
    fn from(err: FetchError) -> Self {
        ScrapeError::Discovery(err.to_string())
    }
}

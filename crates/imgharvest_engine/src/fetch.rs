use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};

use crate::{EngineEvent, FailureKind, FetchError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Whole-request budget, body included.
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_page_bytes: u64,
    pub max_image_bytes: u64,
    pub user_agent: String,
    pub allowed_page_types: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            redirect_limit: 5,
            max_page_bytes: 5 * 1024 * 1024,
            max_image_bytes: 50 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allowed_page_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub html: String,
    pub final_url: String,
    pub content_type: Option<String>,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: std::sync::mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: std::sync::mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Discards every event.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: EngineEvent) {}
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// An image response whose body has not been read yet.
pub struct ImageResponse {
    pub final_url: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// GET an HTML page and return its decoded text.
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// GET an image with `referer` set, leaving the body to be streamed.
    async fn open_image(&self, url: &str, referer: &str) -> Result<ImageResponse, FetchError>;

    fn max_image_bytes(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = build_client(&settings)?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn is_page_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_page_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    async fn send(&self, url: &str, referer: Option<&str>) -> Result<reqwest::Response, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let mut request = self.client.get(parsed);
        if let Some(referer) = referer.filter(|r| !r.is_empty()) {
            request = request.header(REFERER, referer);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        Ok(response)
    }
}

fn build_client(settings: &FetchSettings) -> Result<reqwest::Client, FetchError> {
    let redirect_limit = settings.redirect_limit;
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= redirect_limit {
            attempt.error("redirect limit exceeded")
        } else {
            attempt.follow()
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .redirect(policy)
        .user_agent(settings.user_agent.clone())
        .default_headers(headers)
        .build()
        .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.send(url, None).await?;
        let max_bytes = self.settings.max_page_bytes;

        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = content_type_of(&response);
        if let Some(ct) = content_type.as_deref() {
            if !self.is_page_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            html: String::from_utf8_lossy(&bytes).into_owned(),
            final_url,
            content_type,
        })
    }

    async fn open_image(&self, url: &str, referer: &str) -> Result<ImageResponse, FetchError> {
        let response = self.send(url, Some(referer)).await?;
        let max_bytes = self.settings.max_image_bytes;
        let content_length = response.content_length();
        if let Some(content_len) = content_length {
            if content_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = content_type_of(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));

        Ok(ImageResponse {
            final_url,
            content_type,
            content_length,
            body: Box::pin(body),
        })
    }

    fn max_image_bytes(&self) -> u64 {
        self.settings.max_image_bytes
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

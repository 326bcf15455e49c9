//! Narrow browser-automation surface used by the browser and crawl
//! strategies. [`chrome`] drives a real Chromium; tests script a fake.
mod chrome;

pub use chrome::{ChromeDriver, ChromeLauncher, LaunchSettings};

use std::time::{Duration, Instant};

use serde_json::Value;

/// Opaque handle to a DOM element of the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

const SCROLL_HEIGHT_JS: &str = "document.body ? document.body.scrollHeight : 0";
const SCROLL_TO_BOTTOM_JS: &str =
    "window.scrollTo(0, document.body ? document.body.scrollHeight : 0); true";

#[async_trait::async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Matches in document order; empty when nothing matches.
    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementId>, DriverError>;

    async fn find_within(
        &self,
        parent: ElementId,
        selector: &str,
    ) -> Result<Vec<ElementId>, DriverError>;

    /// Nearest ancestor-or-self matching `selector`.
    async fn closest(
        &self,
        element: ElementId,
        selector: &str,
    ) -> Result<Option<ElementId>, DriverError>;

    /// The string DOM property `name` when the element has one (so `src`
    /// and `href` come back absolute), otherwise the attribute.
    async fn attribute(&self, element: ElementId, name: &str)
        -> Result<Option<String>, DriverError>;

    async fn click(&self, element: ElementId) -> Result<(), DriverError>;

    /// Click dispatched from page script; works on covered elements.
    async fn script_click(&self, element: ElementId) -> Result<(), DriverError>;

    async fn scroll_into_view(&self, element: ElementId) -> Result<(), DriverError>;

    /// Intrinsic size of an `<img>`, `None` when not readable.
    async fn natural_size(&self, element: ElementId) -> Result<Option<(u32, u32)>, DriverError>;

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    async fn page_source(&self) -> Result<String, DriverError>;

    async fn scroll_height(&self) -> Result<u64, DriverError> {
        let value = self.evaluate(SCROLL_HEIGHT_JS).await?;
        Ok(value
            .as_u64()
            .or_else(|| value.as_f64().map(|v| v.max(0.0) as u64))
            .unwrap_or(0))
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.evaluate(SCROLL_TO_BOTTOM_JS).await.map(|_| ())
    }

    async fn scroll_by(&self, pixels: i64) -> Result<(), DriverError> {
        self.evaluate(&format!("window.scrollBy(0, {pixels}); true"))
            .await
            .map(|_| ())
    }
}

/// Starts browser sessions. A failure here is a setup failure for the run.
pub trait DriverFactory: Send + Sync {
    fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
}

/// Elements for the first selector in `selectors` that matches anything.
/// Lookup errors count as no match.
pub async fn first_matching(driver: &dyn BrowserDriver, selectors: &[&str]) -> Vec<ElementId> {
    for selector in selectors {
        match driver.find_elements(selector).await {
            Ok(found) if !found.is_empty() => return found,
            _ => {}
        }
    }
    Vec::new()
}

/// Like [`first_matching`] but polls until something matches or `timeout`
/// elapses.
pub async fn wait_for_first_match(
    driver: &dyn BrowserDriver,
    selectors: &[&str],
    timeout: Duration,
    poll: Duration,
) -> Vec<ElementId> {
    let deadline = Instant::now() + timeout;
    loop {
        let found = first_matching(driver, selectors).await;
        if !found.is_empty() || Instant::now() >= deadline {
            return found;
        }
        tokio::time::sleep(poll).await;
    }
}

/// First non-empty value among `names` on `element`.
pub async fn first_attribute(
    driver: &dyn BrowserDriver,
    element: ElementId,
    names: &[&str],
) -> Option<String> {
    for name in names {
        if let Ok(Some(value)) = driver.attribute(element, name).await {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Evaluates `script` until it yields `true` or `timeout` elapses.
pub async fn wait_until_true(
    driver: &dyn BrowserDriver,
    script: &str,
    timeout: Duration,
    poll: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Value::Bool(true)) = driver.evaluate(script).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde_json::{json, Value};

use super::{BrowserDriver, DriverError, DriverFactory, ElementId};
use crate::fetch::DEFAULT_USER_AGENT;

const READ_PROPERTY_JS: &str = "function(name) { \
    const v = this[name]; \
    if (typeof v === 'string' && v.length > 0) { return v; } \
    return this.getAttribute(name); }";
const NATURAL_SIZE_JS: &str = "function() { \
    return JSON.stringify([this.naturalWidth || 0, this.naturalHeight || 0]); }";
const SCRIPT_CLICK_JS: &str = "function() { this.click(); return true; }";
const MARK_CLOSEST_JS: &str = "function(sel, mark) { \
    const el = this.closest(sel); \
    if (!el) { return false; } \
    el.setAttribute('data-imgharvest-mark', mark); \
    return true; }";

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    /// Explicit browser binary; `None` lets the launcher search.
    pub chrome_path: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub page_load_timeout: Duration,
    pub idle_timeout: Duration,
    pub user_agent: String,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            window_size: (1920, 1080),
            page_load_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Browser binary from `CHROME`, if that points at a file.
fn chrome_from_env() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var_os("CHROME")?);
    if path.exists() {
        engine_debug!("Using Chrome from CHROME env var: {}", path.display());
        Some(path)
    } else {
        None
    }
}

/// Runs blocking browser IO without stalling a multi-threaded runtime.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    let multi_thread = tokio::runtime::Handle::try_current()
        .map(|handle| handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread)
        .unwrap_or(false);
    if multi_thread {
        tokio::task::block_in_place(f)
    } else {
        f()
    }
}

fn driver_err(err: impl std::fmt::Display) -> DriverError {
    DriverError::new(err.to_string())
}

pub struct ChromeLauncher {
    settings: LaunchSettings,
}

impl ChromeLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }
}

impl DriverFactory for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let driver = blocking(|| ChromeDriver::launch(&self.settings))?;
        Ok(Box::new(driver))
    }
}

/// One Chromium process with a single tab. Dropping it ends the session.
pub struct ChromeDriver {
    _browser: Browser,
    tab: Arc<Tab>,
    marks: AtomicU32,
}

impl ChromeDriver {
    pub fn launch(settings: &LaunchSettings) -> Result<Self, DriverError> {
        let chrome_path = settings.chrome_path.clone().or_else(chrome_from_env);
        if let Some(path) = &chrome_path {
            engine_info!("Using Chrome at {}", path.display());
        }

        let options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .window_size(Some(settings.window_size))
            .idle_browser_timeout(settings.idle_timeout)
            .path(chrome_path)
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-software-rasterizer"),
                OsStr::new("--log-level=3"),
            ])
            .build()
            .map_err(driver_err)?;

        let browser = Browser::new(options).map_err(driver_err)?;
        let tab = browser.new_tab().map_err(driver_err)?;
        tab.set_default_timeout(settings.page_load_timeout);
        tab.set_user_agent(&settings.user_agent, Some("en-US,en;q=0.9"), None)
            .map_err(driver_err)?;
        engine_debug!("Browser session started");

        Ok(Self {
            _browser: browser,
            tab,
            marks: AtomicU32::new(0),
        })
    }

    fn element(&self, id: ElementId) -> Result<Element<'_>, DriverError> {
        Element::new(&self.tab, id.0).map_err(driver_err)
    }

    fn call_on(&self, id: ElementId, function: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        let element = self.element(id)?;
        let result = element.call_js_fn(function, args, false).map_err(driver_err)?;
        Ok(result.value.unwrap_or(Value::Null))
    }
}

#[async_trait::async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        blocking(|| {
            self.tab
                .navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(driver_err)
        })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.tab.get_url())
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementId>, DriverError> {
        blocking(|| {
            Ok(self
                .tab
                .find_elements(selector)
                .map(|found| found.iter().map(|el| ElementId(el.node_id)).collect())
                .unwrap_or_default())
        })
    }

    async fn find_within(
        &self,
        parent: ElementId,
        selector: &str,
    ) -> Result<Vec<ElementId>, DriverError> {
        blocking(|| {
            let parent = self.element(parent)?;
            Ok(parent
                .find_elements(selector)
                .map(|found| found.iter().map(|el| ElementId(el.node_id)).collect())
                .unwrap_or_default())
        })
    }

    async fn closest(
        &self,
        element: ElementId,
        selector: &str,
    ) -> Result<Option<ElementId>, DriverError> {
        blocking(|| {
            let mark = self.marks.fetch_add(1, Ordering::Relaxed).to_string();
            let marked = self.call_on(element, MARK_CLOSEST_JS, vec![json!(selector), json!(mark)])?;
            if marked != Value::Bool(true) {
                return Ok(None);
            }
            let found = self
                .tab
                .find_element(&format!("[data-imgharvest-mark=\"{mark}\"]"))
                .map_err(driver_err)?;
            Ok(Some(ElementId(found.node_id)))
        })
    }

    async fn attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        blocking(|| {
            let value = self.call_on(element, READ_PROPERTY_JS, vec![json!(name)])?;
            Ok(value.as_str().map(str::to_string))
        })
    }

    async fn click(&self, element: ElementId) -> Result<(), DriverError> {
        blocking(|| {
            self.element(element)?.click().map_err(driver_err)?;
            Ok(())
        })
    }

    async fn script_click(&self, element: ElementId) -> Result<(), DriverError> {
        blocking(|| self.call_on(element, SCRIPT_CLICK_JS, Vec::new()).map(|_| ()))
    }

    async fn scroll_into_view(&self, element: ElementId) -> Result<(), DriverError> {
        blocking(|| {
            self.element(element)?
                .scroll_into_view()
                .map_err(driver_err)?;
            Ok(())
        })
    }

    async fn natural_size(&self, element: ElementId) -> Result<Option<(u32, u32)>, DriverError> {
        blocking(|| {
            let value = self.call_on(element, NATURAL_SIZE_JS, Vec::new())?;
            let size = value
                .as_str()
                .and_then(|raw| serde_json::from_str::<(u32, u32)>(raw).ok())
                .filter(|&(w, h)| w > 0 && h > 0);
            Ok(size)
        })
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        blocking(|| {
            let result = self.tab.evaluate(script, false).map_err(driver_err)?;
            Ok(result.value.unwrap_or(Value::Null))
        })
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        blocking(|| self.tab.get_content().map_err(driver_err))
    }
}

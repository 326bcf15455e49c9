#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use imgharvest_core::Candidate;
use imgharvest_engine::browser::{BrowserDriver, DriverError, DriverFactory, ElementId};
use imgharvest_engine::discovery::CandidateSink;
use imgharvest_engine::{EngineEvent, ProgressSink};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    selectors: Vec<String>,
    attrs: HashMap<String, String>,
    natural: Option<(u32, u32)>,
    parent: Option<usize>,
    revealed_by: Option<usize>,
    click_fails: bool,
    detached: bool,
}

impl FakeNode {
    pub fn new(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn natural(mut self, width: u32, height: u32) -> Self {
        self.natural = Some((width, height));
        self
    }

    pub fn child_of(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Only visible while `node` is the last clicked element.
    pub fn revealed_by(mut self, node: usize) -> Self {
        self.revealed_by = Some(node);
        self
    }

    pub fn unclickable(mut self) -> Self {
        self.click_fails = true;
        self
    }

    /// Scrolling to the node fails as if it left the document.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    nodes: Vec<FakeNode>,
    source: String,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: FakeNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn img(self, attrs: &[(&str, &str)]) -> Self {
        let node = attrs
            .iter()
            .fold(FakeNode::new(&["img"]), |node, (k, v)| node.attr(k, v));
        self.node(node)
    }

    pub fn link(self, href: &str) -> Self {
        self.node(FakeNode::new(&["a", "a[href]"]).attr("href", href))
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub current: Option<String>,
    pub active: Option<usize>,
    pub visits: Vec<String>,
    pub clicks: Vec<usize>,
    pub script_clicks: Vec<usize>,
    pub bottom_scrolls: usize,
    /// Answers to successive `scrollHeight` reads; 1000 once exhausted.
    pub heights: VecDeque<u64>,
    pub scroll_by_fails: bool,
}

/// Scripted browser. Either one page answers every URL, or each URL has
/// its own page and unknown URLs fail to load.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pages: Arc<HashMap<String, FakePage>>,
    fallback: Option<Arc<FakePage>>,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn single_page(page: FakePage) -> Self {
        Self {
            fallback: Some(Arc::new(page)),
            ..Self::default()
        }
    }

    pub fn site(pages: Vec<(&str, FakePage)>) -> Self {
        Self {
            pages: Arc::new(
                pages
                    .into_iter()
                    .map(|(url, page)| (url.to_string(), page))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn with_heights(self, heights: &[u64]) -> Self {
        self.state.lock().unwrap().heights = heights.iter().copied().collect();
        self
    }

    pub fn bottom_scrolls(&self) -> usize {
        self.state.lock().unwrap().bottom_scrolls
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub fn clicks(&self) -> Vec<usize> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn script_clicks(&self) -> Vec<usize> {
        self.state.lock().unwrap().script_clicks.clone()
    }

    fn page(&self) -> Result<&FakePage, DriverError> {
        let current = self.state.lock().unwrap().current.clone();
        match current {
            Some(url) => self
                .pages
                .get(&url)
                .or(self.fallback.as_deref())
                .ok_or_else(|| DriverError::new("no page loaded")),
            None => Err(DriverError::new("no page loaded")),
        }
    }

    fn node(&self, id: ElementId) -> Result<&FakeNode, DriverError> {
        self.page()?
            .nodes
            .get(id.0 as usize)
            .ok_or_else(|| DriverError::new("stale element"))
    }

    fn visible(&self, node: &FakeNode) -> bool {
        match node.revealed_by {
            None => true,
            Some(owner) => self.state.lock().unwrap().active == Some(owner),
        }
    }
}

#[async_trait::async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        if !self.pages.contains_key(url) && self.fallback.is_none() {
            return Err(DriverError::new("net::ERR_NAME_NOT_RESOLVED"));
        }
        let mut state = self.state.lock().unwrap();
        state.current = Some(url.to_string());
        state.active = None;
        state.visits.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().unwrap().current.clone().unwrap_or_default())
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementId>, DriverError> {
        let page = self.page()?;
        Ok(page
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.selectors.iter().any(|s| s == selector))
            .filter(|(_, node)| self.visible(node))
            .map(|(idx, _)| ElementId(idx as u32))
            .collect())
    }

    async fn find_within(
        &self,
        parent: ElementId,
        selector: &str,
    ) -> Result<Vec<ElementId>, DriverError> {
        let page = self.page()?;
        Ok(page
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent == Some(parent.0 as usize))
            .filter(|(_, node)| node.selectors.iter().any(|s| s == selector))
            .map(|(idx, _)| ElementId(idx as u32))
            .collect())
    }

    async fn closest(
        &self,
        element: ElementId,
        selector: &str,
    ) -> Result<Option<ElementId>, DriverError> {
        let page = self.page()?;
        let mut cursor = Some(element.0 as usize);
        while let Some(idx) = cursor {
            let node = &page.nodes[idx];
            if node.selectors.iter().any(|s| s == selector) {
                return Ok(Some(ElementId(idx as u32)));
            }
            cursor = node.parent;
        }
        Ok(None)
    }

    async fn attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(self.node(element)?.attrs.get(name).cloned())
    }

    async fn click(&self, element: ElementId) -> Result<(), DriverError> {
        if self.node(element)?.click_fails {
            return Err(DriverError::new("element click intercepted"));
        }
        let mut state = self.state.lock().unwrap();
        state.active = Some(element.0 as usize);
        state.clicks.push(element.0 as usize);
        Ok(())
    }

    async fn script_click(&self, element: ElementId) -> Result<(), DriverError> {
        self.node(element)?;
        let mut state = self.state.lock().unwrap();
        state.active = Some(element.0 as usize);
        state.script_clicks.push(element.0 as usize);
        Ok(())
    }

    async fn scroll_into_view(&self, element: ElementId) -> Result<(), DriverError> {
        if self.node(element)?.detached {
            return Err(DriverError::new("stale element reference"));
        }
        Ok(())
    }

    async fn natural_size(&self, element: ElementId) -> Result<Option<(u32, u32)>, DriverError> {
        Ok(self.node(element)?.natural)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        if script.contains("scrollBy(") && self.state.lock().unwrap().scroll_by_fails {
            Err(DriverError::new("execution context was destroyed"))
        } else if script.contains("scrollTo(") {
            self.state.lock().unwrap().bottom_scrolls += 1;
            Ok(Value::Bool(true))
        } else if script.contains("scrollHeight") {
            let next = self.state.lock().unwrap().heights.pop_front();
            Ok(json!(next.unwrap_or(1000)))
        } else {
            Ok(Value::Bool(false))
        }
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        Ok(self.page()?.source.clone())
    }
}

/// Hands out clones of one fake browser, or fails to launch.
pub struct FakeLauncher {
    pub browser: Option<FakeBrowser>,
}

impl DriverFactory for FakeLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        match &self.browser {
            Some(browser) => Ok(Box::new(browser.clone())),
            None => Err(DriverError::new("chrome binary not found")),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub known: HashSet<String>,
    pub accepted: Vec<Candidate>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knowing(urls: &[&str]) -> Self {
        Self {
            known: urls.iter().map(|u| u.to_string()).collect(),
            accepted: Vec::new(),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.accepted.iter().map(|c| c.url.clone()).collect()
    }
}

#[async_trait::async_trait]
impl CandidateSink for RecordingSink {
    fn is_known(&self, url: &str) -> bool {
        self.known.contains(url)
    }

    async fn accept(&mut self, candidate: Candidate) {
        self.accepted.push(candidate);
    }
}

#[derive(Default)]
pub struct TestSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

//! Scripted in-memory browser engine shared by the integration tests.
//!
//! Pages resolve their behavior from the navigation URL: each script entry is
//! keyed by a substring of the query, so tests describe per-query behavior
//! (usable, degraded, empty) without a real browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use placescout::browser::{BrowserEngine, EngineError, PageHandle, PageIdentity};

#[derive(Clone)]
pub enum PageScript {
    /// Usable layout serving these business names as listings.
    Listings(Vec<&'static str>),
    /// Usable layout with an empty results panel.
    NoResults,
    /// Degraded layout on every serve.
    AlwaysDegraded,
    /// Degraded for the first n serves, usable with these listings after.
    DegradedThen(u32, Vec<&'static str>),
    /// Usable layout that renders listings lazily: only the given number are
    /// visible at first, each feed scroll reveals that many more.
    PagedListings(Vec<&'static str>, usize),
    /// Usable layout where a `None` entry has a detail view with no readable
    /// name, so its extraction comes up empty.
    FlakyDetails(Vec<Option<&'static str>>),
    /// Every navigation fails at the transport level.
    NavigationFails,
}

struct Shared {
    scripts: Vec<(String, PageScript)>,
    serves: Mutex<HashMap<String, u32>>,
    created: AtomicU32,
    closed: AtomicU32,
    nav_delay: Duration,
}

/// Engine whose pages follow the configured scripts.
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<(&str, PageScript)>) -> Self {
        Self::with_nav_delay(scripts, Duration::ZERO)
    }

    /// Like `new`, but every navigation sleeps first. Used by stop tests to
    /// keep tasks in flight long enough to race against.
    pub fn with_nav_delay(scripts: Vec<(&str, PageScript)>, nav_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                scripts: scripts
                    .into_iter()
                    .map(|(key, script)| (key.to_string(), script))
                    .collect(),
                serves: Mutex::new(HashMap::new()),
                created: AtomicU32::new(0),
                closed: AtomicU32::new(0),
                nav_delay,
            }),
        }
    }

    pub fn pages_created(&self) -> u32 {
        self.shared.created.load(Ordering::Relaxed)
    }

    pub fn pages_closed(&self) -> u32 {
        self.shared.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn create_page(
        &self,
        _identity: &PageIdentity,
    ) -> Result<Box<dyn PageHandle>, EngineError> {
        self.shared.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ScriptedPage {
            shared: self.shared.clone(),
            usable: false,
            listings: Vec::new(),
            visible: 0,
            page_size: 0,
            selected: None,
        }))
    }
}

struct ScriptedPage {
    shared: Arc<Shared>,
    usable: bool,
    listings: Vec<Option<&'static str>>,
    /// Listings currently rendered; scrolling reveals more when paged.
    visible: usize,
    page_size: usize,
    selected: Option<usize>,
}

fn named(names: Vec<&'static str>) -> Vec<Option<&'static str>> {
    names.into_iter().map(Some).collect()
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        if !self.shared.nav_delay.is_zero() {
            tokio::time::sleep(self.shared.nav_delay).await;
        }

        let (key, script) = self
            .shared
            .scripts
            .iter()
            .find(|(key, _)| url.contains(key.as_str()))
            .unwrap_or_else(|| panic!("no script matches navigation to {}", url))
            .clone();

        let serve = {
            let mut serves = self.shared.serves.lock().unwrap();
            let count = serves.entry(key).or_insert(0);
            *count += 1;
            *count
        };

        let (usable, listings, page_size) = match script {
            PageScript::Listings(names) => (true, named(names), 0),
            PageScript::NoResults => (true, Vec::new(), 0),
            PageScript::AlwaysDegraded => (false, Vec::new(), 0),
            PageScript::DegradedThen(degraded_serves, names) => {
                if serve <= degraded_serves {
                    (false, Vec::new(), 0)
                } else {
                    (true, named(names), 0)
                }
            }
            PageScript::PagedListings(names, page_size) => (true, named(names), page_size),
            PageScript::FlakyDetails(entries) => (true, entries, 0),
            PageScript::NavigationFails => {
                return Err(EngineError::Navigation {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        };
        self.usable = usable;
        self.visible = if page_size > 0 {
            page_size.min(listings.len())
        } else {
            listings.len()
        };
        self.page_size = page_size;
        self.listings = listings;
        self.selected = None;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool, EngineError> {
        if selector == "input#searchboxinput" {
            return Ok(self.usable);
        }
        if selector.starts_with("div.JdG3E") {
            return Ok(!self.usable);
        }
        if selector.contains("/maps/place/") {
            return Ok(self.usable && self.visible > 0);
        }
        if selector.starts_with("h1") {
            return Ok(self.selected.is_some());
        }
        Ok(false)
    }

    async fn count_of(&mut self, selector: &str) -> Result<usize, EngineError> {
        if selector.contains("/maps/place/") && self.usable {
            return Ok(self.visible);
        }
        Ok(0)
    }

    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, EngineError> {
        if selector.starts_with("h1") {
            return Ok(self
                .selected
                .and_then(|i| self.listings[i])
                .map(str::to_string));
        }
        Ok(None)
    }

    async fn attribute_of(
        &mut self,
        _selector: &str,
        _attribute: &str,
    ) -> Result<Option<String>, EngineError> {
        Ok(None)
    }

    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<(), EngineError> {
        if index >= self.visible {
            return Err(EngineError::Interaction {
                selector: selector.to_string(),
                reason: format!("index {} out of {} matches", index, self.visible),
            });
        }
        self.selected = Some(index);
        Ok(())
    }

    async fn scroll_within(&mut self, _selector: &str, _pixels: u32) -> Result<(), EngineError> {
        if self.page_size > 0 {
            self.visible = (self.visible + self.page_size).min(self.listings.len());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.shared.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

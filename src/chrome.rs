//! Headless Chrome implementation of the browser engine traits.
//!
//! headless_chrome exposes a synchronous DevTools API, so every call is
//! pushed through `spawn_blocking`. One Chrome process is launched per proxy
//! endpoint (the DevTools protocol cannot switch proxies per tab) and tabs
//! are handed out as isolated page contexts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::debug;

use crate::browser::{BrowserEngine, EngineError, PageHandle, PageIdentity};

/// Engine configuration fixed at pool startup.
#[derive(Debug, Clone)]
pub struct ChromeEngineConfig {
    pub headless: bool,
    pub viewport: (u32, u32),
    pub nav_timeout: Duration,
}

/// Shared Chrome launcher. Browsers are launched lazily, keyed by the proxy
/// endpoint the requesting session was assigned.
pub struct ChromeEngine {
    config: ChromeEngineConfig,
    browsers: Mutex<HashMap<Option<String>, Browser>>,
}

impl ChromeEngine {
    pub fn new(config: ChromeEngineConfig) -> Self {
        Self {
            config,
            browsers: Mutex::new(HashMap::new()),
        }
    }

    fn browser_for(&self, proxy: Option<&str>) -> Result<Browser, EngineError> {
        let mut browsers = self.browsers.lock().unwrap();
        if let Some(browser) = browsers.get(&proxy.map(str::to_string)) {
            return Ok(browser.clone());
        }

        // Sandbox must be off inside containers or Chrome refuses to start.
        let is_container = std::env::var("PLACESCOUT_CONTAINER").is_ok()
            || std::path::Path::new("/.dockerenv").exists();

        let options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(!is_container)
            .window_size(Some(self.config.viewport))
            .proxy_server(proxy)
            .build()
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| EngineError::Launch(e.to_string()))?;
        debug!(proxy = ?proxy, "launched chrome instance");
        browsers.insert(proxy.map(str::to_string), browser.clone());
        Ok(browser)
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn create_page(
        &self,
        identity: &PageIdentity,
    ) -> Result<Box<dyn PageHandle>, EngineError> {
        let browser = self.browser_for(identity.proxy.as_deref())?;
        let user_agent = identity.user_agent.clone();
        let nav_timeout = self.config.nav_timeout;

        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>, EngineError> {
            let tab = browser
                .new_tab()
                .map_err(|e| EngineError::PageCreate(e.to_string()))?;
            tab.set_default_timeout(nav_timeout);
            tab.set_user_agent(&user_agent, Some("en-US,en;q=0.9"), Some("Win32"))
                .map_err(|e| EngineError::PageCreate(e.to_string()))?;
            Ok(tab)
        })
        .await
        .map_err(|e| EngineError::PageCreate(e.to_string()))??;

        Ok(Box::new(ChromePage { tab, closed: false }))
    }
}

/// One DevTools tab treated as an isolated page context.
pub struct ChromePage {
    tab: Arc<Tab>,
    closed: bool,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, EngineError> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|e| EngineError::PageGone(e.to_string()))?
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url).map_err(|e| EngineError::Navigation {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            tab.wait_until_navigated().map_err(|e| EngineError::Navigation {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            // A wait that errors is an absent marker, not a hard failure:
            // classification probes selectors that are legitimately missing.
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
    }

    async fn count_of(&mut self, selector: &str) -> Result<usize, EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| Ok(tab.find_elements(&selector).map(|els| els.len()).unwrap_or(0)))
            .await
    }

    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let element = match tab.find_element(&selector) {
                Ok(element) => element,
                Err(_) => return Ok(None),
            };
            element
                .get_inner_text()
                .map(Some)
                .map_err(|e| EngineError::Interaction {
                    selector: selector.clone(),
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn attribute_of(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, EngineError> {
        let selector = selector.to_string();
        let attribute = attribute.to_string();
        self.blocking(move |tab| {
            let element = match tab.find_element(&selector) {
                Ok(element) => element,
                Err(_) => return Ok(None),
            };
            let attributes = element
                .get_attributes()
                .map_err(|e| EngineError::Interaction {
                    selector: selector.clone(),
                    reason: e.to_string(),
                })?;
            // DevTools returns a flat [name, value, name, value, ...] list.
            let found = attributes.and_then(|flat| {
                flat.chunks(2)
                    .find(|pair| pair.first().map(String::as_str) == Some(attribute.as_str()))
                    .and_then(|pair| pair.get(1).cloned())
            });
            Ok(found)
        })
        .await
    }

    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<(), EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let elements = tab.find_elements(&selector).map_err(|e| EngineError::Interaction {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
            let element = elements.get(index).ok_or_else(|| EngineError::Interaction {
                selector: selector.clone(),
                reason: format!("index {} out of {} matches", index, elements.len()),
            })?;
            element.click().map_err(|e| EngineError::Interaction {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    async fn scroll_within(&mut self, selector: &str, pixels: u32) -> Result<(), EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let expression = format!(
                "document.querySelector('{}')?.scrollBy(0, {})",
                selector.replace('\'', "\\'"),
                pixels
            );
            tab.evaluate(&expression, false)
                .map_err(|e| EngineError::Interaction {
                    selector: selector.clone(),
                    reason: e.to_string(),
                })?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        self.blocking(move |tab| {
            let _ = tab.close(true);
            Ok(())
        })
        .await
    }
}

impl Drop for ChromePage {
    // A page dropped mid-session (timeout, cancellation) still releases its
    // tab, otherwise Chrome accumulates tabs for the rest of the run.
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.tab.close(true);
        }
    }
}

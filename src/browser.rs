//! Browser automation engine abstraction.
//!
//! The orchestration core needs exactly five capabilities from an engine:
//! create/close an isolated page context, navigate, wait for a selector,
//! read text/attributes of matched elements, and click an element. Anything
//! engine-specific (launch flags, DevTools plumbing) stays behind these
//! traits so sessions can run against headless Chrome in production and a
//! scripted fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch or attach to browser: {0}")]
    Launch(String),

    #[error("failed to create page context: {0}")]
    PageCreate(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {timeout:?} waiting for '{selector}'")]
    WaitTimeout { selector: String, timeout: Duration },

    #[error("element interaction failed on '{selector}': {reason}")]
    Interaction { selector: String, reason: String },

    #[error("page context is gone: {0}")]
    PageGone(String),
}

/// Identity a fresh page context is created with. Recovery rotates the user
/// agent on every recreation; the proxy sticks for the session's lifetime.
#[derive(Debug, Clone)]
pub struct PageIdentity {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub viewport: (u32, u32),
}

/// One isolated, live page context.
#[async_trait]
pub trait PageHandle: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError>;

    /// Wait until at least one element matches `selector`, up to `timeout`.
    /// Returns false on timeout instead of erroring, so classification can
    /// probe for markers that are legitimately absent.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, EngineError>;

    /// Number of elements currently matching `selector`.
    async fn count_of(&mut self, selector: &str) -> Result<usize, EngineError>;

    /// Inner text of the first match, or None when nothing matches.
    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, EngineError>;

    /// Attribute value of the first match, or None when nothing matches or
    /// the attribute is unset.
    async fn attribute_of(&mut self, selector: &str, attribute: &str)
        -> Result<Option<String>, EngineError>;

    /// Click the `index`-th element matching `selector`.
    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<(), EngineError>;

    /// Scroll the first element matching `selector` down by `pixels`, to
    /// make lazily loaded content render.
    async fn scroll_within(&mut self, selector: &str, pixels: u32) -> Result<(), EngineError>;

    /// Release the page context. Idempotent best-effort cleanup.
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// Factory for page contexts. One engine is shared by the whole pool; each
/// session creates (and recreates) its own pages through it.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn create_page(&self, identity: &PageIdentity)
        -> Result<Box<dyn PageHandle>, EngineError>;
}

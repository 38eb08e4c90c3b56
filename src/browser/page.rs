use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thirtyfour::error::WebDriverError;

/// Errors raised by the rendering layer
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("failed to launch browser session: {0}")]
    Launch(String),

    #[error("webdriver error: {0}")]
    Driver(#[from] WebDriverError),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Navigation(String),

    #[error("unexpected script result: {0}")]
    Script(#[from] serde_json::Error),
}

/// What to read from each element matched by a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// The element's `textContent`
    Text,
    /// The element's serialized inner markup
    InnerHtml,
}

/// Outcome of reading one element. Element-level failures are kept apart
/// from the query failing as a whole so callers can skip single elements.
pub type Fragment = Result<Option<String>, BrowserError>;

/// One open page inside one browser context.
///
/// Every operation is a suspension point and must be bounded by the
/// implementation's own per-operation timeout. `goto` and `wait_for_idle`
/// are bounded by the caller instead.
#[async_trait]
pub trait Page: Send + Sync {
    /// Start loading `url` and resolve once the load event fired
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Wait until network activity has settled, or fail after `timeout`
    async fn wait_for_idle(&self, timeout: Duration) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Serialized markup of the whole document
    async fn source(&self) -> Result<String, BrowserError>;

    /// Read every element matching `selector`
    async fn fragments(
        &self,
        selector: &str,
        kind: FragmentKind,
    ) -> Result<Vec<Fragment>, BrowserError>;

    /// Absolute `href` targets of every anchor matching `selector`
    async fn link_targets(&self, selector: &str) -> Result<Vec<String>, BrowserError>;

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Click the first element matching `selector`
    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError>;

    /// Replace the value of the first input matching `selector`
    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError>;

    /// Current scrollable height of the document, in pixels
    async fn scroll_height(&self) -> Result<i64, BrowserError>;

    async fn scroll_by(&self, delta: i64) -> Result<(), BrowserError>;

    /// Tear down the page together with its context and browser
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Opens one browser session per job
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a browser whose requests carry `headers`
    async fn launch(&self, headers: &BTreeMap<String, String>) -> Result<Box<dyn Page>, BrowserError>;
}

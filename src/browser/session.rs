use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use tracing::{debug, error};

use crate::browser::page::{BrowserError, Fragment, FragmentKind, Launcher, Page};
use crate::cli::config::BrowserSettings;

/// Polling interval while waiting for the network to go quiet
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Readiness probe: document state plus the number of fetched resources.
/// The resource count staying flat across two polls counts as idle.
const IDLE_PROBE: &str =
    "return [document.readyState, performance.getEntriesByType('resource').length];";

/// Chrome flags required when running inside containers
const CHROME_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
    "--disable-blink-features=AutomationControlled",
];

/// Launches Chrome sessions through a WebDriver endpoint
pub struct WebDriverLauncher {
    config: BrowserSettings,
}

impl WebDriverLauncher {
    pub fn new(config: BrowserSettings) -> Self {
        Self { config }
    }

    fn capabilities(&self, user_agent: Option<&str>) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();

        if let Some(user_agent) = user_agent {
            caps.add_chrome_arg(&format!("--user-agent={}", user_agent))?;
        }

        caps.add_chrome_arg(&format!(
            "--window-size={},{}",
            self.config.window.width, self.config.window.height
        ))?;

        if self.config.headless {
            caps.set_headless()?;
        }

        for arg in CHROME_ARGS {
            caps.add_chrome_arg(arg)?;
        }

        caps.add_chrome_option("excludeSwitches", json!(["enable-automation"]))?;
        caps.add_chrome_option("useAutomationExtension", false)?;

        Ok(caps)
    }

    async fn configure(&self, driver: &WebDriver, extra_headers: &BTreeMap<String, String>) -> WebDriverResult<()> {
        driver.set_page_load_timeout(self.config.load_timeout()).await?;
        driver.set_script_timeout(self.config.script_timeout()).await?;

        if !extra_headers.is_empty() {
            let dev_tools = ChromeDevTools::new(driver.handle.clone());
            dev_tools.execute_cdp("Network.enable").await?;
            dev_tools
                .execute_cdp_with_params(
                    "Network.setExtraHTTPHeaders",
                    json!({ "headers": extra_headers }),
                )
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Launcher for WebDriverLauncher {
    async fn launch(&self, headers: &BTreeMap<String, String>) -> Result<Box<dyn Page>, BrowserError> {
        // User-Agent travels as a Chrome flag, everything else through DevTools
        let mut extra_headers = BTreeMap::new();
        let mut user_agent = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("user-agent") {
                user_agent = Some(value.as_str());
            } else {
                extra_headers.insert(name.clone(), value.clone());
            }
        }

        let caps = self
            .capabilities(user_agent)
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let driver = WebDriver::new(&self.config.webdriver_url, caps)
            .await
            .map_err(|e| BrowserError::Launch(format!("{} ({})", e, self.config.webdriver_url)))?;

        if let Err(e) = self.configure(&driver, &extra_headers).await {
            if let Err(quit_error) = driver.quit().await {
                error!("Error closing half-configured browser session: {}", quit_error);
            }
            return Err(BrowserError::Launch(e.to_string()));
        }

        debug!("Browser session launched with {} extra headers", extra_headers.len());

        Ok(Box::new(WebDriverPage {
            driver,
            op_timeout: self.config.script_timeout(),
        }))
    }
}

/// Run one driver round trip, failing with `Timeout` after `limit`
async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, BrowserError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| BrowserError::Timeout(limit))?
}

/// A single WebDriver-controlled page
pub struct WebDriverPage {
    driver: WebDriver,
    op_timeout: Duration,
}

impl WebDriverPage {
    async fn bounded<T, F>(&self, op: F) -> Result<T, BrowserError>
    where
        F: Future<Output = Result<T, BrowserError>>,
    {
        bounded(self.op_timeout, op).await
    }

    async fn script<T: DeserializeOwned>(&self, script: &str) -> Result<T, BrowserError> {
        let ret = self.driver.execute(script, Vec::new()).await?;
        Ok(serde_json::from_value(ret.json().clone())?)
    }

    async fn first(&self, selector: &str) -> Result<WebElement, BrowserError> {
        self.driver
            .find_all(By::Css(selector))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
    }

    async fn poll_idle(&self) -> Result<(), BrowserError> {
        let mut last_count: Option<u64> = None;
        loop {
            let (state, count): (String, u64) = self.script(IDLE_PROBE).await?;
            if state == "complete" && last_count == Some(count) {
                return Ok(());
            }
            last_count = Some(count);
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn wait_for_idle(&self, timeout: Duration) -> Result<(), BrowserError> {
        tokio::time::timeout(timeout, self.poll_idle())
            .await
            .map_err(|_| BrowserError::Timeout(timeout))?
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.bounded(async { Ok(self.driver.current_url().await?.to_string()) })
            .await
    }

    async fn source(&self) -> Result<String, BrowserError> {
        self.bounded(async { Ok(self.driver.source().await?) }).await
    }

    async fn fragments(&self, selector: &str, kind: FragmentKind) -> Result<Vec<Fragment>, BrowserError> {
        self.bounded(async {
            let elements = self.driver.find_all(By::Css(selector)).await?;

            let mut fragments = Vec::with_capacity(elements.len());
            for element in elements {
                let fragment = match kind {
                    FragmentKind::Text => element.prop("textContent").await,
                    FragmentKind::InnerHtml => element.inner_html().await.map(Some),
                };
                fragments.push(fragment.map_err(BrowserError::from));
            }

            Ok(fragments)
        })
        .await
    }

    async fn link_targets(&self, selector: &str) -> Result<Vec<String>, BrowserError> {
        self.bounded(async {
            let anchors = self.driver.find_all(By::Css(selector)).await?;

            let mut links = Vec::with_capacity(anchors.len());
            for anchor in anchors {
                // The href property is already resolved against the document base
                match anchor.prop("href").await {
                    Ok(Some(href)) if !href.is_empty() => links.push(href),
                    Ok(_) => {}
                    Err(e) => debug!("Skipping unreadable anchor: {}", e),
                }
            }

            Ok(links)
        })
        .await
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        self.bounded(async { Ok(!self.driver.find_all(By::Css(selector)).await?.is_empty()) })
            .await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.bounded(async {
            self.first(selector).await?.click().await?;
            Ok(())
        })
        .await
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError> {
        self.bounded(async { Ok(self.first(selector).await?.attr(name).await?) })
            .await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.bounded(async {
            let input = self.first(selector).await?;
            input.clear().await?;
            input.send_keys(value).await?;
            Ok(())
        })
        .await
    }

    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError> {
        self.bounded(async {
            self.first(selector).await?.send_keys(Key::Enter + "").await?;
            Ok(())
        })
        .await
    }

    async fn scroll_height(&self) -> Result<i64, BrowserError> {
        self.bounded(self.script("return document.documentElement.scrollHeight;"))
            .await
    }

    async fn scroll_by(&self, delta: i64) -> Result<(), BrowserError> {
        let script = format!("window.scrollBy({{ top: {}, left: 0, behavior: 'auto' }});", delta);
        self.bounded(async {
            self.driver.execute(&script, Vec::new()).await?;
            Ok(())
        })
        .await
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.driver.quit().await?;
        debug!("Browser session closed");
        Ok(())
    }
}

impl std::fmt::Debug for WebDriverPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDriverPage").finish_non_exhaustive()
    }
}

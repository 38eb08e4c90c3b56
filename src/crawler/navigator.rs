use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::browser::{BrowserError, Page};
use crate::cli::config::BrowserSettings;

/// How often the current URL is checked after clicking a navigation control
const NAVIGATION_POLL: Duration = Duration::from_millis(100);

/// A page load that did not complete. Reported per URL, never fatal to a job,
/// except `Cancelled` which ends it.
#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("Navigation failed: timed out after {}s loading {}", .after.as_secs(), .url)]
    Timeout { url: String, after: Duration },

    #[error("Navigation failed: {source}")]
    Failed {
        url: String,
        #[source]
        source: BrowserError,
    },

    #[error("Navigation failed: no navigation within {}s of clicking {}", .after.as_secs(), .selector)]
    NoNavigation { selector: String, after: Duration },

    #[error("job cancelled")]
    Cancelled,
}

/// Loads pages with a bounded timeout, waits for the network to settle and
/// then holds for the job's crawl delay
#[derive(Debug, Clone)]
pub struct Navigator {
    load_timeout: Duration,
    idle_timeout: Duration,
    navigation_wait: Duration,
}

impl Navigator {
    pub fn new(load_timeout: Duration, idle_timeout: Duration, navigation_wait: Duration) -> Self {
        Self {
            load_timeout,
            idle_timeout,
            navigation_wait,
        }
    }

    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self::new(
            settings.load_timeout(),
            settings.idle_timeout(),
            settings.navigation_wait(),
        )
    }

    /// Load `url` and return the URL the page ended up on.
    ///
    /// Only the initial load is bounded fatally; not reaching network idle
    /// is logged and ignored.
    pub async fn navigate(
        &self,
        page: &dyn Page,
        url: &str,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, NavigationError> {
        match timeout(self.load_timeout, page.goto(url)).await {
            Err(_) => {
                return Err(NavigationError::Timeout {
                    url: url.to_string(),
                    after: self.load_timeout,
                })
            }
            Ok(Err(source)) => {
                return Err(NavigationError::Failed {
                    url: url.to_string(),
                    source,
                })
            }
            Ok(Ok(())) => {}
        }

        self.settle_network(page).await;
        if !settle(delay, cancel).await {
            return Err(NavigationError::Cancelled);
        }

        Ok(self.final_url(page, url).await)
    }

    /// Click `selector` and wait for the page URL to change
    pub async fn follow_click(
        &self,
        page: &dyn Page,
        selector: &str,
        cancel: &CancellationToken,
    ) -> Result<String, NavigationError> {
        if cancel.is_cancelled() {
            return Err(NavigationError::Cancelled);
        }

        let before = page.current_url().await.map_err(|source| NavigationError::Failed {
            url: selector.to_string(),
            source,
        })?;

        page.click(selector).await.map_err(|source| NavigationError::Failed {
            url: before.clone(),
            source,
        })?;

        let deadline = Instant::now() + self.navigation_wait;
        loop {
            match page.current_url().await {
                Ok(now) if now != before => {
                    self.settle_network(page).await;
                    return Ok(now);
                }
                Ok(_) => {}
                Err(e) => debug!("Could not read URL after click: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(NavigationError::NoNavigation {
                    selector: selector.to_string(),
                    after: self.navigation_wait,
                });
            }
            if !settle(NAVIGATION_POLL, cancel).await {
                return Err(NavigationError::Cancelled);
            }
        }
    }

    /// Wait for network idle, tolerating the secondary timeout
    pub async fn settle_network(&self, page: &dyn Page) {
        match timeout(self.idle_timeout, page.wait_for_idle(self.idle_timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Network did not go idle: {}", e),
            Err(_) => debug!("Network did not go idle within {:?}", self.idle_timeout),
        }
    }

    async fn final_url(&self, page: &dyn Page, requested: &str) -> String {
        match page.current_url().await {
            Ok(url) => url,
            Err(e) => {
                debug!("Could not read final URL for {}: {}", requested, e);
                requested.to_string()
            }
        }
    }
}

/// Sleep for `delay` unless the job is cancelled first.
/// Returns false when cancelled.
pub async fn settle(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

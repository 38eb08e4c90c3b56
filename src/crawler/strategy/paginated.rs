use tracing::{debug, info, warn};
use url::Url;

use super::{CrawlContext, StrategyError};
use crate::crawler::job::DEFAULT_PAGE_LIMIT;
use crate::crawler::navigator::NavigationError;

/// Job-wide cap on emitted pages, shared by every seed chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBudget {
    emitted: u32,
    limit: u32,
}

impl PageBudget {
    pub fn new(limit: u32) -> Self {
        Self { emitted: 0, limit }
    }

    pub fn exhausted(&self) -> bool {
        self.emitted >= self.limit
    }

    /// The next emitted page is the last one allowed
    pub fn at_final_page(&self) -> bool {
        self.emitted + 1 >= self.limit
    }

    pub fn spend(&mut self) {
        self.emitted += 1;
    }

    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

pub(super) async fn crawl(ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
    let job = ctx.job;
    let next_selector = job.options.next_page_selector.as_deref().unwrap_or_default().trim();
    let mut budget = PageBudget::new(job.options.limit.unwrap_or(DEFAULT_PAGE_LIMIT));
    let last_seed = job.urls.len().saturating_sub(1);
    let delay = ctx.crawl_delay();

    for (index, seed) in job.urls.iter().enumerate() {
        let on_last_seed = index == last_seed;
        let mut current = Some(seed.clone());

        while let Some(url) = current.take() {
            if budget.exhausted() {
                break;
            }
            ctx.ensure_active()?;

            let landed = match ctx.navigator.navigate(ctx.page, &url, delay, ctx.cancel).await {
                Ok(landed) => landed,
                Err(NavigationError::Cancelled) => return Err(StrategyError::Cancelled),
                Err(e) => {
                    warn!("{}", e);
                    ctx.channel.failure(&url, e.to_string(), on_last_seed).await;
                    break;
                }
            };

            let capture = match ctx.capture().await {
                Ok(capture) => capture,
                Err(e) => {
                    warn!("Could not capture {}: {}", url, e);
                    ctx.channel
                        .failure(&url, format!("Extraction failed: {}", e), on_last_seed)
                        .await;
                    break;
                }
            };

            let final_page = budget.at_final_page();
            let next = if final_page {
                None
            } else {
                next_page(ctx, next_selector, &landed).await?
            };

            let is_last = final_page || (on_last_seed && next.is_none());
            budget.spend();
            info!("Crawled page {} of {}: {}", budget.emitted(), seed, url);
            ctx.channel.success(&url, Some(landed), capture, is_last).await;

            current = next;
        }

        if budget.exhausted() {
            debug!("Page limit reached after {} pages", budget.emitted());
            break;
        }
    }

    Ok(())
}

/// Locate the next page: click the control and wait for the URL to
/// change, else resolve its link target against the current URL.
/// `None` ends the chain.
async fn next_page(ctx: &CrawlContext<'_>, selector: &str, current: &str) -> Result<Option<String>, StrategyError> {
    match ctx.page.exists(selector).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("No next page control on {}", current);
            return Ok(None);
        }
        Err(e) => {
            debug!("Next page control {} unusable: {}", selector, e);
            return Ok(None);
        }
    }

    match ctx.navigator.follow_click(ctx.page, selector, ctx.cancel).await {
        Ok(next) if next != current => return Ok(Some(next)),
        Ok(_) => {}
        Err(NavigationError::Cancelled) => return Err(StrategyError::Cancelled),
        Err(e) => debug!("Click on next page control failed, reading its link: {}", e),
    }

    let href = match ctx.page.attribute(selector, "href").await {
        Ok(Some(href)) => href,
        Ok(None) => return Ok(None),
        Err(e) => {
            debug!("Could not read next page link: {}", e);
            return Ok(None);
        }
    };

    Ok(resolve_link(current, &href))
}

/// Resolve a next-page link against the current URL. Non-web targets and
/// links back to the current page are not a next page.
fn resolve_link(current: &str, href: &str) -> Option<String> {
    let next = Url::parse(current).ok()?.join(href.trim()).ok()?;
    if !matches!(next.scheme(), "http" | "https") {
        return None;
    }

    let next = next.to_string();
    (next != current).then_some(next)
}

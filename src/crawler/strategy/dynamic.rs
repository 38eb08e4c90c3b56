use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CrawlContext, StrategyError};
use crate::browser::BrowserError;
use crate::crawler::navigator::{settle, NavigationError};

/// Wait after each click, on top of network idle
const CLICK_SETTLE: Duration = Duration::from_secs(1);

/// First wheel step in pixels
const INITIAL_STEP: i64 = 250;

/// Smallest locked step in pixels
const MIN_STEP: i64 = 100;

/// Step doublings tried before concluding the page does not grow
const MAX_PROBES: u32 = 5;

pub(super) async fn crawl(ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
    let job = ctx.job;
    let last = job.urls.len().saturating_sub(1);
    let delay = ctx.crawl_delay();

    for (index, url) in job.urls.iter().enumerate() {
        ctx.ensure_active()?;
        let is_last = index == last;

        let landed = match ctx.navigator.navigate(ctx.page, url, delay, ctx.cancel).await {
            Ok(landed) => landed,
            Err(NavigationError::Cancelled) => return Err(StrategyError::Cancelled),
            Err(e) => {
                warn!("{}", e);
                ctx.channel.failure(url, e.to_string(), is_last).await;
                continue;
            }
        };

        interact(ctx).await?;

        let final_url = ctx.page.current_url().await.unwrap_or(landed);
        match ctx.capture().await {
            Ok(capture) => {
                info!("Crawled {} ({}/{})", url, index + 1, job.urls.len());
                ctx.channel.success(url, Some(final_url), capture, is_last).await;
            }
            Err(e) => {
                warn!("Could not capture {}: {}", url, e);
                ctx.channel.failure(url, format!("Extraction failed: {}", e), is_last).await;
            }
        }
    }

    Ok(())
}

/// Clicks then scrolling. Browser failures end the phase early and are
/// otherwise ignored; only cancellation propagates.
async fn interact(ctx: &CrawlContext<'_>) -> Result<(), StrategyError> {
    let job = ctx.job;
    let options = &job.options;

    if let Some(selector) = options.click_selector.as_deref().filter(|s| !s.trim().is_empty()) {
        let clicks = click_repeatedly(ctx, selector, options.click_times).await?;
        debug!("Clicked {} {} times", selector, clicks);
    }

    if options.scroll {
        match scroll(ctx, options.max_scrolls(), options.scroll_delay()).await {
            Ok(scrolls) => debug!("Scrolled {} times", scrolls),
            Err(ScrollStop::Browser(e)) => debug!("Scrolling stopped: {}", e),
            Err(ScrollStop::Cancelled) => return Err(StrategyError::Cancelled),
        }
    }

    Ok(())
}

async fn click_repeatedly(ctx: &CrawlContext<'_>, selector: &str, times: u32) -> Result<u32, StrategyError> {
    let mut clicked = 0;

    while clicked < times {
        ctx.ensure_active()?;

        match ctx.page.exists(selector).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                debug!("Click target {} unavailable: {}", selector, e);
                break;
            }
        }

        if let Err(e) = ctx.page.click(selector).await {
            debug!("Click on {} failed: {}", selector, e);
            break;
        }
        clicked += 1;

        ctx.navigator.settle_network(ctx.page).await;
        if !settle(CLICK_SETTLE, ctx.cancel).await {
            return Err(StrategyError::Cancelled);
        }
    }

    Ok(clicked)
}

enum ScrollStop {
    Browser(BrowserError),
    Cancelled,
}

impl From<BrowserError> for ScrollStop {
    fn from(e: BrowserError) -> Self {
        ScrollStop::Browser(e)
    }
}

/// Adaptive scrolling for lazy-loaded pages.
///
/// Probe with a growing wheel step until the document height grows, then
/// lock the step to the observed growth and repeat it for the remaining
/// iterations. Returns the number of wheel events sent.
async fn scroll(ctx: &CrawlContext<'_>, max_scrolls: u32, pause: Duration) -> Result<u32, ScrollStop> {
    if max_scrolls == 0 {
        return Ok(0);
    }

    let page = ctx.page;
    let mut step = INITIAL_STEP;
    let mut sent = 0;
    let mut locked = None;

    for _ in 0..MAX_PROBES {
        let before = page.scroll_height().await?;
        page.scroll_by(step).await?;
        sent += 1;
        if !settle(pause, ctx.cancel).await {
            return Err(ScrollStop::Cancelled);
        }

        let after = page.scroll_height().await?;
        if after > before {
            locked = Some((after - before).max(MIN_STEP));
            break;
        }
        step *= 2;
    }

    let Some(step) = locked else {
        debug!("Page height did not grow after {} probes", MAX_PROBES);
        return Ok(sent);
    };

    for _ in 1..max_scrolls {
        page.scroll_by(step).await?;
        sent += 1;
        if !settle(pause, ctx.cancel).await {
            return Err(ScrollStop::Cancelled);
        }
    }

    Ok(sent)
}

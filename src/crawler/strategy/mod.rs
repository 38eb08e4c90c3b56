//! Strategy dispatch and the per-job crawl context.
//!
//! Each strategy drives the job's single page through the navigator and the
//! extraction engine, and emits records through the job's delivery channel.
//! Strategies recover from per-URL failures themselves; only cancellation
//! and session-fatal failures come back as `StrategyError`.

mod authenticated;
mod dynamic;
mod fixed;
mod paginated;
mod seed;

pub use paginated::PageBudget;
pub use seed::{filter_links, Frontier, Node};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserError, Page};
use crate::crawler::extract::extract;
use crate::crawler::job::{Job, Rejection};
use crate::crawler::navigator::Navigator;
use crate::crawler::record::{Capture, Content};
use crate::delivery::DeliveryChannel;
use crate::utils::ExtractionDiagnostics;

/// The traversal families a job can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Static,
    Dynamic,
    Paginated,
    Seed,
    Authenticated,
}

/// Lookup table from requested name to strategy
const STRATEGIES: [(&str, Strategy); 5] = [
    ("static", Strategy::Static),
    ("dynamic", Strategy::Dynamic),
    ("paginated", Strategy::Paginated),
    ("seed", Strategy::Seed),
    ("authenticated", Strategy::Authenticated),
];

/// Map a requested strategy name to its implementation. Pure lookup.
pub fn resolve(name: Option<&str>) -> Result<Strategy, Rejection> {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).ok_or(Rejection::MissingStrategy)?;

    STRATEGIES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, strategy)| *strategy)
        .ok_or_else(|| Rejection::UnknownStrategy(name.to_string()))
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Static => "static",
            Strategy::Dynamic => "dynamic",
            Strategy::Paginated => "paginated",
            Strategy::Seed => "seed",
            Strategy::Authenticated => "authenticated",
        }
    }

    /// Settle delay in seconds when the job does not set `crawl_delay`
    pub fn default_crawl_delay(&self) -> u64 {
        match self {
            Strategy::Static => 0,
            _ => 1,
        }
    }

    /// Run the strategy against an already launched page
    pub async fn execute(self, ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
        match self {
            Strategy::Static => fixed::crawl(ctx).await,
            Strategy::Dynamic => dynamic::crawl(ctx).await,
            Strategy::Paginated => paginated::crawl(ctx).await,
            Strategy::Seed => seed::crawl(ctx).await,
            Strategy::Authenticated => authenticated::crawl(ctx).await,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that end the job early
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("job cancelled")]
    Cancelled,

    /// The session can no longer be trusted; `url` is the unit that failed
    #[error("{message}")]
    SessionFatal { url: String, message: String },
}

/// Everything a strategy works with while it runs one job
pub struct CrawlContext<'a> {
    pub job: &'a Job,
    pub page: &'a dyn Page,
    pub navigator: &'a Navigator,
    pub channel: &'a mut DeliveryChannel,
    pub cancel: &'a CancellationToken,
    pub diagnostics: ExtractionDiagnostics,
}

impl<'a> CrawlContext<'a> {
    pub fn new(
        job: &'a Job,
        page: &'a dyn Page,
        navigator: &'a Navigator,
        channel: &'a mut DeliveryChannel,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            job,
            page,
            navigator,
            channel,
            cancel,
            diagnostics: ExtractionDiagnostics::default(),
        }
    }

    pub fn crawl_delay(&self) -> Duration {
        self.job.options.crawl_delay()
    }

    pub fn ensure_active(&self) -> Result<(), StrategyError> {
        if self.cancel.is_cancelled() {
            Err(StrategyError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Selector fields when the job has selectors, the page markup otherwise
    pub async fn capture(&mut self) -> Result<Capture, BrowserError> {
        if self.job.options.selectors.is_empty() {
            return Ok(Capture::Html(self.page.source().await?));
        }
        Ok(self.extract_fields().await)
    }

    pub async fn extract_fields(&mut self) -> Capture {
        let fields = extract(self.page, &self.job.options.selectors, &mut self.diagnostics).await;
        Capture::Content(Content::Fields(fields))
    }
}

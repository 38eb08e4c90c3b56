use std::time::Duration;
use tracing::{info, warn};

use super::fixed::crawl_urls;
use super::{CrawlContext, StrategyError};
use crate::browser::BrowserError;
use crate::crawler::job::LoginPlan;
use crate::crawler::navigator::{settle, NavigationError};

pub(super) async fn crawl(ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
    let job = ctx.job;
    let plan = job.login.as_ref().ok_or_else(|| StrategyError::SessionFatal {
        url: job.first_url().to_string(),
        message: "Login failed: no login configuration".to_string(),
    })?;

    ctx.ensure_active()?;
    login(ctx, plan).await?;
    info!("Logged in at {}", plan.login_url);

    crawl_urls(ctx).await
}

/// Open the login page, fill both fields, submit and let the session settle
async fn login(ctx: &CrawlContext<'_>, plan: &LoginPlan) -> Result<(), StrategyError> {
    let fatal = |message: String| {
        warn!("{}", message);
        StrategyError::SessionFatal {
            url: plan.login_url.clone(),
            message,
        }
    };

    ctx.navigator
        .navigate(ctx.page, &plan.login_url, Duration::ZERO, ctx.cancel)
        .await
        .map_err(|e| match e {
            NavigationError::Cancelled => StrategyError::Cancelled,
            e => fatal(format!("Login failed: {}", e)),
        })?;

    submit(ctx, plan)
        .await
        .map_err(|e| fatal(format!("Login failed: {}", e)))?;

    ctx.navigator.settle_network(ctx.page).await;
    if !settle(ctx.crawl_delay(), ctx.cancel).await {
        return Err(StrategyError::Cancelled);
    }
    Ok(())
}

async fn submit(ctx: &CrawlContext<'_>, plan: &LoginPlan) -> Result<(), BrowserError> {
    let page = ctx.page;
    page.fill(&plan.username_selector, &plan.username).await?;
    page.fill(&plan.password_selector, &plan.password).await?;

    match plan.submit_selector.as_deref() {
        Some(button) => page.click(button).await,
        None => page.press_enter(&plan.password_selector).await,
    }
}

use tracing::{info, warn};

use super::{CrawlContext, StrategyError};
use crate::crawler::navigator::NavigationError;

pub(super) async fn crawl(ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
    crawl_urls(ctx).await
}

/// Visit every job URL in order and emit one record per URL.
/// The record for the final URL is terminal whatever its outcome.
pub(super) async fn crawl_urls(ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
    let job = ctx.job;
    let last = job.urls.len().saturating_sub(1);
    let delay = ctx.crawl_delay();

    for (index, url) in job.urls.iter().enumerate() {
        ctx.ensure_active()?;
        let is_last = index == last;

        match ctx.navigator.navigate(ctx.page, url, delay, ctx.cancel).await {
            Ok(final_url) => {
                let capture = ctx.extract_fields().await;
                info!("Crawled {} ({}/{})", url, index + 1, job.urls.len());
                ctx.channel.success(url, Some(final_url), capture, is_last).await;
            }
            Err(NavigationError::Cancelled) => return Err(StrategyError::Cancelled),
            Err(e) => {
                warn!("{}", e);
                ctx.channel.failure(url, e.to_string(), is_last).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::crawler::record::{ResultRecord, STATUS_FAILED};
    use crate::crawler::strategy::{Strategy, StrategyError};
    use crate::crawler::testing::{assert_single_terminal, run_strategy, FakeSite};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    async fn run(site: &FakeSite, request: Value) -> (Result<(), StrategyError>, Vec<ResultRecord>) {
        run_strategy(site, Strategy::Static, request, CancellationToken::new()).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_url_title() {
        let site = FakeSite::new().page("https://site.test/", "<html><body><h1>Hello</h1></body></html>");
        let (result, records) = run(
            &site,
            json!({
                "urls": ["https://site.test/"],
                "meta": {"task_id": 1},
                "options": {"selectors": [{"key": "title", "selector": "h1"}]}
            }),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            serde_json::to_value(record.content.as_ref().unwrap()).unwrap(),
            json!({"title": ["Hello"]})
        );
        assert_eq!(record.status_code, 200);
        assert_eq!(record.final_url.as_deref(), Some("https://site.test/"));
        assert_eq!(record.meta["task_id"], 1);
        assert!(record.is_last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_url_does_not_stop_the_rest() {
        let site = FakeSite::new()
            .page("https://site.test/a", "<h1>A</h1>")
            .page("https://site.test/c", "<h1>C</h1>");
        let (_, records) = run(
            &site,
            json!({
                "urls": ["https://site.test/a", "https://down.test/b", "https://site.test/c"],
                "meta": {"task_id": 2},
                "options": {"selectors": [{"key": "title", "selector": "h1"}, {"key": "price", "selector": ".price"}]}
            }),
        )
        .await;

        assert_eq!(records.len(), 3);
        assert_single_terminal(&records);
        assert_eq!(records[1].status_code, STATUS_FAILED);
        assert!(records[1].error.as_deref().unwrap().starts_with("Navigation failed"));
        assert!(records[1].content.is_none());
        assert_eq!(records[2].field("title"), Some(&["C".to_string()][..]));
        assert_eq!(records[2].field("price"), Some(&[][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_on_last_url_is_terminal() {
        let site = FakeSite::new().page("https://site.test/a", "<h1>A</h1>");
        let (_, records) = run(
            &site,
            json!({"urls": ["https://site.test/a", "https://down.test/"], "meta": {"task_id": 3}}),
        )
        .await;

        assert_single_terminal(&records);
        assert_eq!(records[1].status_code, STATUS_FAILED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_fixture_same_content() {
        let html = "<h1>Title</h1><ul><li>a</li><li>b</li></ul>";
        let request = json!({
            "urls": ["https://site.test/"],
            "meta": {"task_id": 4},
            "options": {"selectors": [{"key": "title", "selector": "h1"}, {"key": "items", "selector": "li"}]}
        });
        let site = FakeSite::new().page("https://site.test/", html);

        let (_, first) = run(&site, request.clone()).await;
        let (_, second) = run(&site, request).await;

        assert_eq!(
            serde_json::to_string(&first[0].content).unwrap(),
            serde_json::to_string(&second[0].content).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_visits_nothing() {
        let site = FakeSite::new().page("https://site.test/", "<h1>A</h1>");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, records) = run_strategy(
            &site,
            Strategy::Static,
            json!({"urls": ["https://site.test/"], "meta": {"task_id": 5}}),
            cancel,
        )
        .await;

        assert!(matches!(result, Err(StrategyError::Cancelled)));
        assert!(records.is_empty());
        assert!(site.journal().visits.is_empty());
    }
}

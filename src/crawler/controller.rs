use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::Launcher;
use crate::cli::config::NodeConfig;
use crate::crawler::job::{Job, JobRequest, Rejection};
use crate::crawler::navigator::Navigator;
use crate::crawler::strategy::{resolve, CrawlContext, Strategy, StrategyError};
use crate::delivery::{Collector, DeliveryChannel};
use crate::utils::JobMetrics;

/// Returned to the caller as soon as a job is accepted
#[derive(Debug, Clone, Serialize)]
pub struct Acknowledgement {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub strategy: Strategy,
    pub urls: usize,
}

/// A dispatched job
pub struct JobHandle {
    pub ack: Acknowledgement,
    handle: JoinHandle<JobMetrics>,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Ask the job to stop after its current unit of work
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<JobMetrics, JoinError> {
        self.handle.await
    }
}

/// Accepts jobs and runs each one on its own browser session, at most
/// `max_concurrent_jobs` at a time.
pub struct CrawlerController {
    launcher: Arc<dyn Launcher>,
    collector: Arc<dyn Collector>,
    navigator: Navigator,
    user_agent: String,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl CrawlerController {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        collector: Arc<dyn Collector>,
        navigator: Navigator,
        user_agent: impl Into<String>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            launcher,
            collector,
            navigator,
            user_agent: user_agent.into(),
            slots: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &NodeConfig, launcher: Arc<dyn Launcher>, collector: Arc<dyn Collector>) -> Self {
        Self::new(
            launcher,
            collector,
            Navigator::from_settings(&config.browser),
            config.browser.default_user_agent.clone(),
            config.workers.max_concurrent_jobs,
        )
    }

    /// Resolve the strategy and validate the request. Nothing is acquired.
    pub fn validate(&self, request: JobRequest) -> Result<Job, Rejection> {
        let strategy = resolve(request.strategy.as_deref())?;
        request.into_job(strategy, &self.user_agent)
    }

    /// Validate and dispatch a job without waiting for it to run.
    ///
    /// Rejections come back synchronously and never reach the collector.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle, Rejection> {
        let job = self.validate(request).map_err(|rejection| {
            warn!("Rejected job: {}", rejection);
            rejection
        })?;

        let ack = Acknowledgement {
            job_id: job.id,
            strategy: job.strategy,
            urls: job.urls.len(),
        };
        let cancel = self.shutdown.child_token();
        let span = info_span!("job", id = %job.id, strategy = %job.strategy);

        let worker = JobWorker {
            launcher: self.launcher.clone(),
            collector: self.collector.clone(),
            navigator: self.navigator.clone(),
            slots: self.slots.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run(job).instrument(span));

        info!("Accepted job {} ({}, {} urls)", ack.job_id, ack.strategy, ack.urls);
        Ok(JobHandle { ack, handle, cancel })
    }

    /// Cancel every running and queued job
    pub fn shutdown(&self) {
        info!("Cancelling all jobs");
        self.shutdown.cancel();
    }
}

/// Everything one spawned job owns
struct JobWorker {
    launcher: Arc<dyn Launcher>,
    collector: Arc<dyn Collector>,
    navigator: Navigator,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl JobWorker {
    async fn run(self, job: Job) -> JobMetrics {
        let mut channel = DeliveryChannel::new(self.collector.clone(), job.strategy, job.meta.clone());

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            info!("Job cancelled before it started");
            channel.failure(job.first_url(), StrategyError::Cancelled.to_string(), true).await;
            return channel.into_metrics();
        };

        let page = match self.launcher.launch(&job.options.headers).await {
            Ok(page) => page,
            Err(e) => {
                error!("Browser launch failed: {}", e);
                channel
                    .failure(job.first_url(), format!("Browser launch failed: {}", e), true)
                    .await;
                return channel.into_metrics();
            }
        };
        debug!("Browser session open");

        let (outcome, diagnostics) = {
            let mut ctx = CrawlContext::new(&job, page.as_ref(), &self.navigator, &mut channel, &self.cancel);
            let outcome = AssertUnwindSafe(job.strategy.execute(&mut ctx)).catch_unwind().await;
            (outcome, ctx.diagnostics)
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(StrategyError::Cancelled)) => {
                info!("Job cancelled");
                if !channel.is_finished() {
                    channel.failure(job.first_url(), StrategyError::Cancelled.to_string(), true).await;
                }
            }
            Ok(Err(StrategyError::SessionFatal { url, message })) => {
                error!("Job aborted: {}", message);
                if !channel.is_finished() {
                    channel.failure(&url, message, true).await;
                }
            }
            Err(_) => {
                error!("Strategy panicked");
                if !channel.is_finished() {
                    channel.failure(job.first_url(), "Crawl aborted by an internal error", true).await;
                }
            }
        }

        if !channel.is_finished() {
            warn!("Strategy finished without a terminal record");
            channel
                .failure(job.first_url(), "Crawl ended without a final result", true)
                .await;
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close browser session: {}", e);
        }

        let mut metrics = channel.into_metrics();
        metrics.extraction.merge(&diagnostics);
        info!(
            "Job finished: {} records ({} ok, {} failed, {} undelivered, {} swallowed extraction errors) in {}ms",
            metrics.records,
            metrics.successes,
            metrics.failures,
            metrics.delivery_failures,
            metrics.extraction.total(),
            metrics.elapsed_ms()
        );
        metrics
    }
}

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::crawler::record::{Capture, ResultRecord};
use crate::crawler::strategy::Strategy;
use crate::delivery::collector::Collector;
use crate::utils::JobMetrics;

/// Per-job emitter: shapes outcomes into records and pushes them to the
/// collector in completion order.
///
/// Delivery failures are logged and counted, never returned. Once a record
/// with `is_last` has gone out, further records are dropped.
pub struct DeliveryChannel {
    collector: Arc<dyn Collector>,
    strategy: Strategy,
    meta: Map<String, Value>,
    terminal_sent: bool,
    metrics: JobMetrics,
}

impl DeliveryChannel {
    pub fn new(collector: Arc<dyn Collector>, strategy: Strategy, meta: Map<String, Value>) -> Self {
        Self {
            collector,
            strategy,
            meta,
            terminal_sent: false,
            metrics: JobMetrics::new(),
        }
    }

    pub async fn success(&mut self, original_url: &str, final_url: Option<String>, capture: Capture, is_last: bool) {
        let record = ResultRecord::success(
            self.strategy,
            self.meta.clone(),
            original_url,
            final_url,
            capture,
            is_last,
        );
        self.emit(record).await;
    }

    pub async fn failure(&mut self, original_url: &str, error: impl Into<String>, is_last: bool) {
        let record = ResultRecord::failure(
            self.strategy,
            self.meta.clone(),
            original_url,
            error.into(),
            is_last,
        );
        self.emit(record).await;
    }

    async fn emit(&mut self, record: ResultRecord) {
        if self.terminal_sent {
            warn!("Dropping record for {} emitted after the terminal record", record.original_url);
            return;
        }
        self.terminal_sent = record.is_last;
        self.metrics.record_emitted(record.status_code, record.is_success());

        if let Err(e) = self.collector.deliver(&record).await {
            error!("Failed to deliver result for {}: {}", record.original_url, e);
            self.metrics.record_delivery_failure();
        }
    }

    /// Whether the terminal record has been emitted
    pub fn is_finished(&self) -> bool {
        self.terminal_sent
    }

    pub fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    pub fn into_metrics(self) -> JobMetrics {
        self.metrics
    }
}

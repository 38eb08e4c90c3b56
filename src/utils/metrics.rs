use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-job delivery and outcome counters
#[derive(Debug, Clone, Serialize)]
pub struct JobMetrics {
    /// When the job started running
    pub started_at: DateTime<Utc>,

    /// Records handed to the collector
    pub records: usize,

    /// Records carrying content or html
    pub successes: usize,

    /// Records carrying an error
    pub failures: usize,

    /// Records the collector did not accept
    pub delivery_failures: usize,

    /// Status code counts
    pub status_codes: BTreeMap<u16, usize>,

    /// Swallowed extraction failures, merged in at job end
    pub extraction: ExtractionDiagnostics,
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl JobMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            records: 0,
            successes: 0,
            failures: 0,
            delivery_failures: 0,
            status_codes: BTreeMap::new(),
            extraction: ExtractionDiagnostics::default(),
        }
    }

    /// Record an emitted record's outcome
    pub fn record_emitted(&mut self, status_code: u16, success: bool) {
        self.records += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        *self.status_codes.entry(status_code).or_default() += 1;
    }

    pub fn record_delivery_failure(&mut self) {
        self.delivery_failures += 1;
    }

    /// Milliseconds since the job started
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

/// Counts extraction failures that were swallowed, keyed by output field.
///
/// Failed elements are skipped and failed selectors yield an empty field, so
/// these counters are the only place such failures remain visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionDiagnostics {
    swallowed: BTreeMap<String, usize>,
}

impl ExtractionDiagnostics {
    pub fn record(&mut self, field: &str) {
        *self.swallowed.entry(field.to_string()).or_default() += 1;
    }

    pub fn count(&self, field: &str) -> usize {
        self.swallowed.get(field).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.swallowed.values().sum()
    }

    pub fn merge(&mut self, other: &ExtractionDiagnostics) {
        for (field, count) in &other.swallowed {
            *self.swallowed.entry(field.clone()).or_default() += count;
        }
    }
}

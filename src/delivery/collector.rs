use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::CollectorSettings;
use crate::crawler::record::ResultRecord;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("collector request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector answered {0}")]
    Rejected(reqwest::StatusCode),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write record: {0}")]
    Io(#[from] std::io::Error),

    #[error("collector url is not configured")]
    NotConfigured,
}

/// External system receiving result records one at a time
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    async fn deliver(&self, record: &ResultRecord) -> Result<(), DeliveryError>;
}

/// Posts each record as JSON to the collector endpoint with a bearer token
pub struct HttpCollector {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpCollector {
    pub fn new(settings: &CollectorSettings) -> Result<Self, DeliveryError> {
        let url = settings
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or(DeliveryError::NotConfigured)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            token: settings.token.clone(),
        })
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn deliver(&self, record: &ResultRecord) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.url).json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(status));
        }

        debug!("Delivered record for {} ({})", record.original_url, record.status_code);
        Ok(())
    }
}

/// Writes each record as one JSON line. Lines from concurrent jobs never
/// interleave.
#[derive(Debug)]
pub struct LineCollector<W> {
    out: Mutex<W>,
}

/// JSON lines on stdout
pub type StdoutCollector = LineCollector<Stdout>;

impl<W> LineCollector<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl StdoutCollector {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Collector for LineCollector<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, record: &ResultRecord) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}

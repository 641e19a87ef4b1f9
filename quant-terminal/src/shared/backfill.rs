//! Chart backfill from the history endpoint

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use super::{error::BackfillError, types::HistorySample};

const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the one-shot historical fetch used to seed the chart
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn get_history(&self, ticker: &str) -> Result<Vec<HistorySample>, BackfillError>;
}

/// `GET /history?ticker=<T>` over HTTP
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    client: reqwest::Client,
    history_url: Url,
}

impl HttpHistoryClient {
    pub fn new(client: reqwest::Client, history_url: Url) -> Self {
        Self { client, history_url }
    }
}

#[async_trait]
impl HistorySource for HttpHistoryClient {
    async fn get_history(&self, ticker: &str) -> Result<Vec<HistorySample>, BackfillError> {
        let mut url = self.history_url.clone();
        url.query_pairs_mut().append_pair("ticker", ticker);
        debug!(%url, "fetching history backfill");

        let response = self
            .client
            .get(url)
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackfillError::Status(response.status().as_u16()));
        }

        let mut samples: Vec<HistorySample> = response
            .json()
            .await
            .map_err(|e| BackfillError::Parse(e.to_string()))?;

        // Endpoint promises chronological order; enforce it for the chart
        samples.sort_by_key(|s| s.timestamp);

        info!(ticker, samples = samples.len(), "history backfill loaded");
        Ok(samples)
    }
}

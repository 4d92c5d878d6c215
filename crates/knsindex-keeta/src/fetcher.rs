//! Keeta ledger fetcher.
//!
//! Two read-only services feed the indexer:
//! - the Keetools staple metadata API (`/api/staples/metadata`), which maps a
//!   page number to the cursor of that page's history window
//! - the Keeta node history API (`/api/node/ledger/history`), which returns
//!   the vote staples of the window starting at that cursor
//!
//! Transient failures (network errors, timeouts, HTTP 5xx and 429) are
//! retried with exponential backoff. Bodies that fail to decode are reported
//! as [`IndexerError::MalformedResponse`] and never retried.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use knsindex_core::error::IndexerError;
use knsindex_core::indexer::IndexerConfig;
use knsindex_core::retry::RetryPolicy;
use knsindex_core::types::{LedgerHistory, PageMetadata};

/// Trait for fetching one page of ledger data.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Fetch the metadata of `page` (1-based).
    async fn fetch_page_metadata(&self, page: u32) -> Result<PageMetadata, IndexerError>;

    /// Fetch the history window starting at `start`, or at the beginning of
    /// the ledger when `start` is `None`.
    async fn fetch_ledger_history(&self, start: Option<&str>)
        -> Result<LedgerHistory, IndexerError>;
}

/// HTTP client for the metadata and history services backed by `reqwest`.
pub struct HttpLedgerClient {
    http: reqwest::Client,
    metadata_url: String,
    history_url: String,
    page_limit: u32,
    date_from: String,
    retry: RetryPolicy,
}

impl HttpLedgerClient {
    pub fn new(config: &IndexerConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| IndexerError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            metadata_url: format!(
                "{}/api/staples/metadata",
                config.metadata_base_url.trim_end_matches('/')
            ),
            history_url: format!(
                "{}/api/node/ledger/history",
                config.history_base_url.trim_end_matches('/')
            ),
            page_limit: config.page_limit,
            date_from: config.launch_date.format("%Y-%m-%d").to_string(),
            retry: RetryPolicy::new(config.retry.clone()),
        })
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, IndexerError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| IndexerError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
                transient: true,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {}: {body}", status.as_u16()),
                transient: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let body = resp.text().await.map_err(|e| IndexerError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
            transient: true,
        })?;

        serde_json::from_str(&body)
            .map_err(|e| IndexerError::MalformedResponse(format!("{url}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, IndexerError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_once(url, query).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, url, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LedgerApi for HttpLedgerClient {
    async fn fetch_page_metadata(&self, page: u32) -> Result<PageMetadata, IndexerError> {
        let query = [
            ("limit", self.page_limit.to_string()),
            ("page", page.to_string()),
            ("sortOrder", "asc".to_string()),
            ("dateFrom", self.date_from.clone()),
        ];
        let mut metadata: PageMetadata = self.get_json(&self.metadata_url, &query).await?;
        metadata.page = page;
        tracing::debug!(
            page,
            total_pages = metadata.total_pages,
            start = ?metadata.start_blocks_hash,
            "fetched page metadata"
        );
        Ok(metadata)
    }

    async fn fetch_ledger_history(
        &self,
        start: Option<&str>,
    ) -> Result<LedgerHistory, IndexerError> {
        let mut query = vec![("limit", self.page_limit.to_string())];
        if let Some(start) = start {
            query.push(("start", start.to_string()));
        }
        let history: LedgerHistory = self.get_json(&self.history_url, &query).await?;
        tracing::debug!(staples = history.history.len(), "fetched ledger history");
        Ok(history)
    }
}

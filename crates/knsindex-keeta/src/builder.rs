//! Fluent builder API for creating KNS index loops.
//!
//! # Example
//!
//! ```rust,no_run
//! use knsindex_keeta::{HttpLedgerClient, IndexerBuilder};
//! use knsindex_storage::InMemoryStorage;
//!
//! # fn example() -> Result<(), knsindex_core::IndexerError> {
//! let builder = IndexerBuilder::new()
//!     .history_base_url("https://rep1.test.network.api.keeta.com")
//!     .metadata_base_url("https://api.test.keetools.org")
//!     .poll_interval_ms(2_000);
//! let client = HttpLedgerClient::new(builder.config())?;
//! let index_loop = builder.build(client, InMemoryStorage::new())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::NaiveDate;

use knsindex_core::error::IndexerError;
use knsindex_core::handler::{HandlerRegistry, MutationHandler};
use knsindex_core::indexer::IndexerConfig;
use knsindex_core::retry::RetryConfig;
use knsindex_core::store::ProjectionStore;

use crate::fetcher::LedgerApi;
use crate::index_loop::IndexLoop;

/// Fluent builder for `IndexerConfig` and `IndexLoop`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    handlers: HandlerRegistry,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    /// Base URL of the node history service.
    pub fn history_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.history_base_url = url.into();
        self
    }

    /// Base URL of the staple metadata service.
    pub fn metadata_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.metadata_base_url = url.into();
        self
    }

    pub fn page_limit(mut self, limit: u32) -> Self {
        self.config.page_limit = limit;
        self
    }

    pub fn launch_date(mut self, date: NaiveDate) -> Self {
        self.config.launch_date = date;
        self
    }

    pub fn token_name(mut self, name: impl Into<String>) -> Self {
        self.config.token_name = name.into();
        self
    }

    pub fn burn_address(mut self, address: impl Into<String>) -> Self {
        self.config.burn_address = address.into();
        self
    }

    /// Sleep between successful cycles in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Sleep after a failed cycle in milliseconds.
    pub fn failure_delay_ms(mut self, ms: u64) -> Self {
        self.config.failure_delay_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Register a post-commit mutation handler.
    pub fn on_mutation(mut self, handler: Arc<dyn MutationHandler>) -> Self {
        self.handlers.on_mutation(handler);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build an index loop over `client` and `store`.
    pub fn build<C: LedgerApi, S: ProjectionStore>(
        self,
        client: C,
        store: S,
    ) -> Result<IndexLoop<C, S>, IndexerError> {
        IndexLoop::new(self.config, client, store, self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knsindex_core::indexer::IndexerState;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.token_name, "KNS");
        assert_eq!(cfg.page_limit, 100);
        assert_eq!(cfg.poll_interval_ms, 1_000);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .history_base_url("http://node.local")
            .metadata_base_url("http://tools.local")
            .page_limit(50)
            .launch_date(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
            .token_name("TEST")
            .burn_address("keeta_burn")
            .poll_interval_ms(250)
            .failure_delay_ms(1_000)
            .build_config();

        assert_eq!(cfg.history_base_url, "http://node.local");
        assert_eq!(cfg.metadata_base_url, "http://tools.local");
        assert_eq!(cfg.page_limit, 50);
        assert_eq!(cfg.launch_date.to_string(), "2026-01-01");
        assert_eq!(cfg.token_name, "TEST");
        assert_eq!(cfg.burn_address, "keeta_burn");
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.failure_delay_ms, 1_000);
    }

    #[test]
    fn build_rejects_bad_patterns() {
        let config = IndexerConfig {
            set_primary_pattern: "(".into(),
            ..Default::default()
        };
        let client = crate::fetcher::HttpLedgerClient::new(&config).unwrap();
        let result = IndexerBuilder::from_config(config)
            .build(client, knsindex_storage::InMemoryStorage::new());
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[test]
    fn build_starts_idle() {
        let builder = IndexerBuilder::new();
        let client = crate::fetcher::HttpLedgerClient::new(builder.config()).unwrap();
        let lp = builder
            .build(client, knsindex_storage::InMemoryStorage::new())
            .unwrap();
        assert_eq!(lp.state(), IndexerState::Idle);
    }
}

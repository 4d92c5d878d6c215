//! Indexer configuration and state types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Testnet faucet address. Keeta has no official burn address.
pub const DEFAULT_BURN_ADDRESS: &str =
    "keeta_aabszsbrqppriqddrkptq5awubshpq3cgsoi4rc624xm6phdt74vo5w7wipwtmiw";

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Base URL of the Keeta node serving `/api/node/ledger/history`.
    pub history_base_url: String,
    /// Base URL of the Keetools API serving `/api/staples/metadata`.
    pub metadata_base_url: String,
    /// Staples per page, used for both services.
    pub page_limit: u32,
    /// Metadata is filtered to activity from this date onward.
    pub launch_date: NaiveDate,
    /// `name` a set-info operation must carry to count as an inscription.
    pub token_name: String,
    /// Destination of set_primary_name / set_cid sends.
    pub burn_address: String,
    /// Grammar for a username, matched against the lower-cased description.
    pub username_pattern: String,
    /// `set_primary_name <address>` payload grammar. One capture group.
    pub set_primary_pattern: String,
    /// `set_cid <address> <cid>` payload grammar. Two capture groups.
    pub set_cid_pattern: String,
    /// Sleep between successful cycles (milliseconds).
    pub poll_interval_ms: u64,
    /// Sleep after a failed cycle before the page is retried (milliseconds).
    pub failure_delay_ms: u64,
    /// Per-request HTTP timeout (milliseconds).
    pub request_timeout_ms: u64,
    /// Backoff for transient fetch failures.
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            history_base_url: "https://rep1.test.network.api.keeta.com".into(),
            metadata_base_url: "https://api.test.keetools.org".into(),
            page_limit: 100,
            launch_date: NaiveDate::from_ymd_opt(2025, 11, 25).unwrap_or(NaiveDate::MIN),
            token_name: "KNS".into(),
            burn_address: DEFAULT_BURN_ADDRESS.into(),
            username_pattern: r"^[a-z0-9_]{1,32}$".into(),
            set_primary_pattern: r"^set_primary_name (keeta_\w+)$".into(),
            set_cid_pattern: r"^set_cid (keeta_\w+) (\w+)$".into(),
            poll_interval_ms: 1_000,
            failure_delay_ms: 5_000,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Fetching and projecting pages.
    Polling,
    /// Stopped by the cancellation token.
    Stopped,
    /// The last cycle failed; the page will be retried.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pin_protocol_constants() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.token_name, "KNS");
        assert_eq!(cfg.page_limit, 100);
        assert_eq!(cfg.launch_date.to_string(), "2025-11-25");
        assert!(cfg.burn_address.ends_with("wipwtmiw"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: IndexerConfig =
            serde_json::from_str(r#"{ "poll_interval_ms": 250, "launch_date": "2025-12-01" }"#)
                .unwrap();
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.launch_date.to_string(), "2025-12-01");
        assert_eq!(cfg.token_name, "KNS");
    }
}

//! Error types for the KNS indexing pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Fetch error from {url}: {reason}")]
    Fetch {
        url: String,
        reason: String,
        /// Network failures, timeouts, HTTP 5xx and 429.
        transient: bool,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Indexer cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { transient: true, .. })
    }

    /// Returns `true` if the error came from the cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_fetches_are_retryable() {
        let timeout = IndexerError::Fetch {
            url: "http://node".into(),
            reason: "timed out".into(),
            transient: true,
        };
        let not_found = IndexerError::Fetch {
            url: "http://node".into(),
            reason: "HTTP 404".into(),
            transient: false,
        };
        assert!(timeout.is_transient());
        assert!(!not_found.is_transient());
        assert!(!IndexerError::MalformedResponse("x".into()).is_transient());
        assert!(!IndexerError::Storage("x".into()).is_transient());
    }
}

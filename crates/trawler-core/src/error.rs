use std::error::Error as StdError;

use thiserror::Error;

/// Application-wide error types for trawler.
#[derive(Error, Debug)]
pub enum AppError {
    /// The work item is malformed (missing or unknown source, bad params).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The target answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    /// The target signalled throttling without a usable status code.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error (reset, refused, DNS).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The egress proxy rejected or dropped the connection.
    #[error("Proxy error: {0}")]
    ProxyError(String),

    /// The automation session or target closed unexpectedly.
    #[error("Browser protocol error: {0}")]
    ProtocolError(String),

    /// A bot challenge (CAPTCHA, interstitial) blocked the page.
    ///
    /// `persistent` is set once the challenge survived a proxy/session rotation.
    #[error("Challenge wall: {message}")]
    ChallengeWall { message: String, persistent: bool },

    /// No proxy is available, even without filters.
    #[error("Proxy pool exhausted")]
    PoolExhausted,

    /// Launching or driving the browser failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// The platform extractor failed for a reason it could not classify.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Writing a result or error artifact failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Submitting, receiving or acknowledging a queue message failed.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if the retry engine would try again after this error.
    pub fn is_retryable(&self) -> bool {
        crate::retry::classify(self).is_retryable()
    }

    /// Renders the error and its `source()` chain, one cause per line.
    ///
    /// Stored as the `stack` field of error artifacts.
    pub fn chain(&self) -> String {
        let mut out = format!("{self:?}");
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(
            AppError::HttpError {
                status: 503,
                message: "unavailable".into(),
            }
            .is_retryable()
        );
        assert!(!AppError::ValidationError("no source".into()).is_retryable());
        assert!(!AppError::StorageError("disk full".into()).is_retryable());
    }

    #[test]
    fn test_chain_includes_source() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = AppError::from(inner);
        let chain = err.chain();
        assert!(chain.starts_with("SerializationError"));
        assert!(chain.contains("caused by: EOF"));
    }
}

//! Error types for the engine

use thiserror::Error;

use crate::types::Market;

/// Failure talking to a market data provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider unavailable (HTTP {0})")]
    Unavailable(u16),

    #[error("empty response for {0}")]
    Empty(String),

    #[error("symbol not found: {0}")]
    NotFound(String),

    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ProviderError {
    /// Whether another attempt might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connect(_) | Self::RateLimited | Self::Unavailable(_) | Self::Empty(_)
        )
    }

    /// Map a non-success HTTP status
    pub fn from_status(status: u16, symbol: &str, body: String) -> Self {
        match status {
            404 => Self::NotFound(symbol.to_string()),
            429 => Self::RateLimited,
            500..=599 => Self::Unavailable(status),
            _ => Self::Rejected { status, body },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// A provider call that gave up
#[derive(Error, Debug)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct RetryError {
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

/// Batch-level failures that abort a run
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid price series: {0}")]
    InvalidSeries(String),

    #[error("no tickers available for market {0}")]
    NoTickers(Market),

    #[error("no price data could be fetched for any of {attempted} {market} symbols")]
    NoPriceData { market: Market, attempted: usize },

    #[error("no {market} symbol produced a score ({skipped} skipped); previous rankings left untouched")]
    NoRecords { market: Market, skipped: usize },

    #[error("{samples} labelled samples cannot be split into training and test sets")]
    TooFewSamples { samples: usize },

    #[error(transparent)]
    Table(#[from] persistence::TableError),

    #[error(transparent)]
    Database(#[from] persistence::DbError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status(429, "AAPL", String::new()).is_retryable());
        assert!(ProviderError::from_status(503, "AAPL", String::new()).is_retryable());
        assert!(!ProviderError::from_status(404, "AAPL", String::new()).is_retryable());
        assert!(!ProviderError::from_status(401, "AAPL", "no".into()).is_retryable());
        assert!(ProviderError::Empty("AAPL".into()).is_retryable());
        assert!(!ProviderError::Malformed("x".into()).is_retryable());
    }
}

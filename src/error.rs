//! Error types for configuration, requests and aggregation.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fatal at startup: nothing runs when the test definition is invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid target url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Per-request failures. These never escape a virtual user; they become a
/// failed outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,

    #[error("connection refused or host unreachable")]
    Connect,

    #[error("connection closed unexpectedly")]
    Closed,

    #[error("could not build request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Other(String),
}

impl RequestError {
    /// Key used in the status breakdown.
    pub fn status_key(&self) -> &'static str {
        match self {
            RequestError::Timeout => "TIMEOUT",
            _ => "REQUEST_ERROR",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("aggregator is finalized, outcome rejected")]
    Finalized,

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("could not allocate latency histogram: {0}")]
    Histogram(String),
}

use crate::models::{ExchangeId, Pair};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Provider error ({exchange}): {message}")]
    Provider { exchange: ExchangeId, message: String },

    #[error("No data: {0}")]
    NoData(String),
}

/// Invalid or inconsistent configuration. Always fatal, raised before any
/// fetch or analysis starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} exchange list is empty")]
    EmptyExchangeList(&'static str),

    #[error("exchange `{0}` is listed more than once")]
    DuplicateExchange(ExchangeId),

    #[error("rolling window of {days} days is invalid: {reason}")]
    InvalidWindow { days: u32, reason: String },

    #[error("`{key}` is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("no market-data connector for exchange `{0}`")]
    UnsupportedExchange(ExchangeId),
}

/// Per-combination data problems. These never abort a run: the
/// opportunity builder turns them into an excluded combination.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("no historical series for {pair} on {exchange}")]
    MissingData { exchange: ExchangeId, pair: Pair },

    #[error("{statistic} needs {required} samples, {available} available")]
    InsufficientHistory {
        statistic: &'static str,
        required: usize,
        available: usize,
    },
}

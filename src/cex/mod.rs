//! Market-data connectors for centralized exchanges.
//!
//! A connector delivers, per pair, the data the analysis store is built
//! from: the current funding rate, the funding-rate history and daily
//! price bars. Public endpoints only.

pub mod binance;
pub mod okx;

use crate::config::FetchConfig;
use crate::errors::{ConfigError, Result};
use crate::models::{AmplitudeObservation, ExchangeId, FundingRateObservation, Pair};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub use binance::BinanceProvider;
pub use okx::OkxProvider;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn exchange(&self) -> &ExchangeId;

    /// Tradable perpetual swaps, as `BASE/QUOTE:MARGIN`.
    async fn perpetual_pairs(&self) -> Result<Vec<Pair>>;

    /// Tradable spot markets, as `BASE/QUOTE`.
    async fn spot_pairs(&self) -> Result<Vec<Pair>>;

    /// Latest funding rate; `None` when the venue reports none.
    async fn current_rate(&self, pair: &Pair) -> Result<Option<f64>>;

    async fn historical_rates(&self, pair: &Pair, days: u32) -> Result<Vec<FundingRateObservation>>;

    /// Daily bars for the last `days` days.
    async fn amplitude(&self, pair: &Pair, days: u32) -> Result<Vec<AmplitudeObservation>>;

    /// Fixed funding interval, if the venue has one for every pair.
    fn funding_interval_hours(&self) -> Option<f64> {
        None
    }
}

/// Connector for a configured exchange id.
pub fn provider_for(exchange: &ExchangeId, config: &FetchConfig) -> Result<Box<dyn MarketDataProvider>> {
    match exchange.as_str() {
        "binance" => Ok(Box::new(BinanceProvider::new(config)?)),
        "okx" => Ok(Box::new(OkxProvider::new(config)?)),
        _ => Err(ConfigError::UnsupportedExchange(exchange.clone()).into()),
    }
}

fn http_client(config: &FetchConfig) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?)
}

/// Settlement times jitter by a few milliseconds; rounding to the minute
/// lines them up across venues.
fn settlement_secs(ms: i64) -> i64 {
    (ms + 30_000).div_euclid(60_000) * 60
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    #[test]
    fn unknown_exchange_is_a_config_error() {
        let err = provider_for(&ExchangeId::new("mtgox"), &FetchConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::UnsupportedExchange(ref id)) if id.as_str() == "mtgox"
        ));
    }

    #[test]
    fn binance_is_known() {
        let provider = provider_for(&ExchangeId::new("Binance"), &FetchConfig::default()).unwrap();
        assert_eq!(provider.exchange().as_str(), "binance");
    }

    #[test]
    fn okx_is_known() {
        let provider = provider_for(&ExchangeId::new("okx"), &FetchConfig::default()).unwrap();
        assert_eq!(provider.exchange().as_str(), "okx");
        assert_eq!(provider.funding_interval_hours(), None);
    }

    #[test]
    fn settlement_rounds_to_nearest_minute() {
        assert_eq!(settlement_secs(1_698_969_600_004), 1_698_969_600);
        assert_eq!(settlement_secs(1_698_998_399_998), 1_698_998_400);
        assert_eq!(settlement_secs(1_698_998_429_999), 1_698_998_400);
    }
}

use super::{MarketDataProvider, http_client, settlement_secs, truncate};
use crate::config::FetchConfig;
use crate::errors::{AppError, Result};
use crate::models::{AmplitudeObservation, ExchangeId, FundingRateObservation, Pair};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

const FUTURES_ENDPOINT: &str = "https://fapi.binance.com";
const SPOT_ENDPOINT: &str = "https://api.binance.com";
const FUNDING_PAGE_LIMIT: usize = 1000;
const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    margin_asset: Option<String>,
    #[serde(default)]
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    last_funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    funding_time: i64,
    funding_rate: String,
}

/// USDT-margined futures and spot market data from Binance's public REST API.
pub struct BinanceProvider {
    id: ExchangeId,
    client: Client,
}

impl BinanceProvider {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            id: ExchangeId::new("binance"),
            client: http_client(config)?,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, base: &str, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = Url::parse_with_params(&format!("{base}{path}"), params)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Provider {
                exchange: self.id.clone(),
                message: format!("{path} returned {status}: {}", truncate(&body, 200)),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    fn exchange(&self) -> &ExchangeId {
        &self.id
    }

    async fn perpetual_pairs(&self) -> Result<Vec<Pair>> {
        let info: ExchangeInfo = self.get_json(FUTURES_ENDPOINT, "/fapi/v1/exchangeInfo", &[]).await?;
        Ok(perpetual_pairs_from(info))
    }

    async fn spot_pairs(&self) -> Result<Vec<Pair>> {
        let info: ExchangeInfo = self.get_json(SPOT_ENDPOINT, "/api/v3/exchangeInfo", &[]).await?;
        Ok(spot_pairs_from(info))
    }

    async fn current_rate(&self, pair: &Pair) -> Result<Option<f64>> {
        let index: PremiumIndex = self
            .get_json(FUTURES_ENDPOINT, "/fapi/v1/premiumIndex", &[("symbol", symbol(pair))])
            .await?;
        Ok(index.last_funding_rate.trim().parse::<f64>().ok())
    }

    async fn historical_rates(&self, pair: &Pair, days: u32) -> Result<Vec<FundingRateObservation>> {
        let symbol = symbol(pair);
        let mut start = Utc::now().timestamp_millis() - i64::from(days) * MS_PER_DAY;
        let mut history = Vec::new();
        loop {
            let page: Vec<FundingEntry> = self
                .get_json(
                    FUTURES_ENDPOINT,
                    "/fapi/v1/fundingRate",
                    &[
                        ("symbol", symbol.clone()),
                        ("startTime", start.to_string()),
                        ("limit", FUNDING_PAGE_LIMIT.to_string()),
                    ],
                )
                .await?;
            let Some(last) = page.last() else { break };
            let full_page = page.len() >= FUNDING_PAGE_LIMIT;
            start = last.funding_time + 1;
            history.extend(funding_observations(page));
            if !full_page {
                break;
            }
        }
        debug!(%pair, samples = history.len(), "[FETCH] binance funding history");
        Ok(history)
    }

    async fn amplitude(&self, pair: &Pair, days: u32) -> Result<Vec<AmplitudeObservation>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(
                FUTURES_ENDPOINT,
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol(pair)),
                    ("interval", "1d".to_string()),
                    ("limit", days.max(1).to_string()),
                ],
            )
            .await?;
        Ok(daily_bars(&rows))
    }
}

/// `BTC/USDT:USDT` becomes `BTCUSDT`.
fn symbol(pair: &Pair) -> String {
    pair.spot_symbol().as_str().replace('/', "")
}

fn perpetual_pairs_from(info: ExchangeInfo) -> Vec<Pair> {
    info.symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.contract_type.as_deref() == Some("PERPETUAL"))
        .map(|s| {
            let margin = s.margin_asset.unwrap_or_else(|| s.quote_asset.clone());
            Pair::new(format!("{}/{}:{}", s.base_asset, s.quote_asset, margin))
        })
        .collect()
}

fn spot_pairs_from(info: ExchangeInfo) -> Vec<Pair> {
    info.symbols
        .into_iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| Pair::new(format!("{}/{}", s.base_asset, s.quote_asset)))
        .collect()
}

fn funding_observations(page: Vec<FundingEntry>) -> Vec<FundingRateObservation> {
    page.into_iter()
        .filter_map(|entry| {
            let rate = entry.funding_rate.trim().parse::<f64>().ok()?;
            Some(FundingRateObservation::new(settlement_secs(entry.funding_time), rate))
        })
        .collect()
}

/// Kline rows are `[open_time, open, high, low, close, ...]` with prices as
/// strings.
fn daily_bars(rows: &[Vec<serde_json::Value>]) -> Vec<AmplitudeObservation> {
    rows.iter()
        .filter_map(|row| {
            let open_time = row.first()?.as_i64()?;
            let date = DateTime::from_timestamp_millis(open_time)?.date_naive();
            let high = price(row.get(2)?)?;
            let low = price(row.get(3)?)?;
            Some(AmplitudeObservation::new(date, high, low))
        })
        .collect()
}

fn price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

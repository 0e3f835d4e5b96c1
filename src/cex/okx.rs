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

const ENDPOINT: &str = "https://www.okx.com";
const FUNDING_PAGE_LIMIT: usize = 100;
const CANDLE_LIMIT: u32 = 300;
const MS_PER_DAY: i64 = 86_400_000;

/// Every v5 response is wrapped in `{code, msg, data}`; `code` is `"0"` on
/// success.
#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    state: String,
    #[serde(default)]
    base_ccy: String,
    #[serde(default)]
    quote_ccy: String,
    #[serde(default)]
    settle_ccy: String,
    #[serde(default)]
    inst_family: String,
    #[serde(default)]
    ct_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRate {
    funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    funding_time: String,
    #[serde(default)]
    realized_rate: String,
    funding_rate: String,
}

/// Perpetual swap and spot market data from OKX's public v5 REST API.
pub struct OkxProvider {
    id: ExchangeId,
    client: Client,
}

impl OkxProvider {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            id: ExchangeId::new("okx"),
            client: http_client(config)?,
        })
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = Url::parse_with_params(&format!("{ENDPOINT}{path}"), params)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(self.error(format!("{path} returned {status}: {}", truncate(&body, 200))));
        }
        let envelope: OkxResponse<T> = serde_json::from_str(&body)?;
        if envelope.code != "0" {
            return Err(self.error(format!("{path} code {}: {}", envelope.code, envelope.msg)));
        }
        Ok(envelope.data)
    }

    fn error(&self, message: String) -> AppError {
        AppError::Provider {
            exchange: self.id.clone(),
            message,
        }
    }
}

#[async_trait]
impl MarketDataProvider for OkxProvider {
    fn exchange(&self) -> &ExchangeId {
        &self.id
    }

    async fn perpetual_pairs(&self) -> Result<Vec<Pair>> {
        let instruments: Vec<Instrument> = self
            .get_data("/api/v5/public/instruments", &[("instType", "SWAP".to_string())])
            .await?;
        Ok(perpetual_pairs_from(instruments))
    }

    async fn spot_pairs(&self) -> Result<Vec<Pair>> {
        let instruments: Vec<Instrument> = self
            .get_data("/api/v5/public/instruments", &[("instType", "SPOT".to_string())])
            .await?;
        Ok(spot_pairs_from(instruments))
    }

    async fn current_rate(&self, pair: &Pair) -> Result<Option<f64>> {
        let rates: Vec<FundingRate> = self
            .get_data("/api/v5/public/funding-rate", &[("instId", swap_id(pair))])
            .await?;
        Ok(rates.first().and_then(|r| r.funding_rate.trim().parse::<f64>().ok()))
    }

    /// Pages backwards from now; each page is newest first.
    async fn historical_rates(&self, pair: &Pair, days: u32) -> Result<Vec<FundingRateObservation>> {
        let inst_id = swap_id(pair);
        let start = Utc::now().timestamp_millis() - i64::from(days) * MS_PER_DAY;
        let mut before: Option<i64> = None;
        let mut history = Vec::new();
        loop {
            let mut params = vec![
                ("instId", inst_id.clone()),
                ("limit", FUNDING_PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = before {
                params.push(("after", cursor.to_string()));
            }
            let page: Vec<FundingEntry> = self.get_data("/api/v5/public/funding-rate-history", &params).await?;
            let Some(oldest) = page.iter().filter_map(|e| e.funding_time.parse::<i64>().ok()).min() else {
                break;
            };
            let full_page = page.len() >= FUNDING_PAGE_LIMIT;
            history.extend(funding_observations(page, start));
            if !full_page || oldest <= start || before == Some(oldest) {
                break;
            }
            before = Some(oldest);
        }
        history.sort_by_key(|o| o.timestamp);
        debug!(%pair, samples = history.len(), "[FETCH] okx funding history");
        Ok(history)
    }

    async fn amplitude(&self, pair: &Pair, days: u32) -> Result<Vec<AmplitudeObservation>> {
        let rows: Vec<Vec<String>> = self
            .get_data(
                "/api/v5/market/candles",
                &[
                    ("instId", swap_id(pair)),
                    ("bar", "1Dutc".to_string()),
                    ("limit", days.clamp(1, CANDLE_LIMIT).to_string()),
                ],
            )
            .await?;
        Ok(daily_bars(&rows))
    }
}

/// `BTC/USDT:USDT` becomes `BTC-USDT-SWAP`.
fn swap_id(pair: &Pair) -> String {
    format!("{}-SWAP", pair.spot_symbol().as_str().replace('/', "-"))
}

/// Linear (USDT-settled) and inverse swaps both map to `BASE/QUOTE:SETTLE`.
fn perpetual_pairs_from(instruments: Vec<Instrument>) -> Vec<Pair> {
    instruments
        .into_iter()
        .filter(|i| i.state == "live" && !i.ct_type.is_empty())
        .filter_map(|i| {
            let (base, quote) = i.inst_family.split_once('-')?;
            Some(Pair::new(format!("{base}/{quote}:{}", i.settle_ccy)))
        })
        .collect()
}

fn spot_pairs_from(instruments: Vec<Instrument>) -> Vec<Pair> {
    instruments
        .into_iter()
        .filter(|i| i.state == "live" && !i.base_ccy.is_empty() && !i.quote_ccy.is_empty())
        .map(|i| Pair::new(format!("{}/{}", i.base_ccy, i.quote_ccy)))
        .collect()
}

/// Prefers the realized rate when the venue reports one. Entries settled
/// before `start_ms` are dropped.
fn funding_observations(page: Vec<FundingEntry>, start_ms: i64) -> Vec<FundingRateObservation> {
    page.into_iter()
        .filter_map(|entry| {
            let time = entry.funding_time.trim().parse::<i64>().ok()?;
            if time < start_ms {
                return None;
            }
            let rate = entry
                .realized_rate
                .trim()
                .parse::<f64>()
                .or_else(|_| entry.funding_rate.trim().parse::<f64>())
                .ok()?;
            Some(FundingRateObservation::new(settlement_secs(time), rate))
        })
        .collect()
}

/// Candle rows are `[ts, open, high, low, close, ...]`, all strings, newest
/// first. Returned oldest first.
fn daily_bars(rows: &[Vec<String>]) -> Vec<AmplitudeObservation> {
    let mut bars: Vec<AmplitudeObservation> = rows
        .iter()
        .filter_map(|row| {
            let open_time = row.first()?.parse::<i64>().ok()?;
            let date = DateTime::from_timestamp_millis(open_time)?.date_naive();
            let high = row.get(2)?.parse::<f64>().ok()?;
            let low = row.get(3)?.parse::<f64>().ok()?;
            Some(AmplitudeObservation::new(date, high, low))
        })
        .collect();
    bars.sort_by_key(|b| b.date);
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn swap_listing_keeps_live_contracts() {
        let raw = r#"{"code":"0","msg":"","data":[
            {"instType":"SWAP","instId":"BTC-USDT-SWAP","instFamily":"BTC-USDT","uly":"BTC-USDT","settleCcy":"USDT","ctType":"linear","state":"live","baseCcy":"","quoteCcy":""},
            {"instType":"SWAP","instId":"BTC-USD-SWAP","instFamily":"BTC-USD","uly":"BTC-USD","settleCcy":"BTC","ctType":"inverse","state":"live","baseCcy":"","quoteCcy":""},
            {"instType":"SWAP","instId":"LUNA-USDT-SWAP","instFamily":"LUNA-USDT","uly":"LUNA-USDT","settleCcy":"USDT","ctType":"linear","state":"suspend","baseCcy":"","quoteCcy":""}
        ]}"#;
        let envelope: OkxResponse<Vec<Instrument>> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.code, "0");
        assert_eq!(
            perpetual_pairs_from(envelope.data),
            vec![Pair::new("BTC/USDT:USDT"), Pair::new("BTC/USD:BTC")]
        );
    }

    #[test]
    fn spot_listing_uses_base_and_quote() {
        let raw = r#"{"code":"0","msg":"","data":[
            {"instType":"SPOT","instId":"ETH-USDT","baseCcy":"ETH","quoteCcy":"USDT","settleCcy":"","ctType":"","state":"live"},
            {"instType":"SPOT","instId":"OLD-USDT","baseCcy":"OLD","quoteCcy":"USDT","settleCcy":"","ctType":"","state":"preopen"}
        ]}"#;
        let envelope: OkxResponse<Vec<Instrument>> = serde_json::from_str(raw).unwrap();
        assert_eq!(spot_pairs_from(envelope.data), vec![Pair::new("ETH/USDT")]);
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        let raw = r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#;
        let envelope: OkxResponse<Vec<FundingRate>> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.code, "51001");
        assert_eq!(envelope.msg, "Instrument ID does not exist");
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn current_funding_rate_parses() {
        let raw = r#"{"code":"0","msg":"","data":[
            {"instId":"BTC-USDT-SWAP","instType":"SWAP","fundingRate":"0.0000792386885340","nextFundingRate":"","fundingTime":"1703088000000","nextFundingTime":"1703116800000"}
        ]}"#;
        let envelope: OkxResponse<Vec<FundingRate>> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data[0].funding_rate.parse::<f64>().ok(), Some(0.0000792386885340));
    }

    #[test]
    fn funding_history_prefers_realized_rate_and_respects_start() {
        let raw = r#"{"code":"0","msg":"","data":[
            {"instId":"BTC-USDT-SWAP","fundingRate":"0.00012","realizedRate":"0.0001","fundingTime":"1698998400003","method":"current_period"},
            {"instId":"BTC-USDT-SWAP","fundingRate":"-0.00003","realizedRate":"","fundingTime":"1698969599990","method":"current_period"},
            {"instId":"BTC-USDT-SWAP","fundingRate":"0.0002","realizedRate":"0.0002","fundingTime":"1698940800000","method":"current_period"}
        ]}"#;
        let envelope: OkxResponse<Vec<FundingEntry>> = serde_json::from_str(raw).unwrap();
        let observations = funding_observations(envelope.data, 1_698_950_000_000);
        assert_eq!(
            observations,
            vec![
                FundingRateObservation::new(1_698_998_400, 0.0001),
                FundingRateObservation::new(1_698_969_600, -0.00003),
            ]
        );
    }

    #[test]
    fn candles_become_daily_bars_oldest_first() {
        let raw = r#"{"code":"0","msg":"","data":[
            ["1699056000000","35000.0","35800.0","34000.0","35500.0","100","1","1","1"],
            ["1698969600000","34900.0","35200.5","34500.0","35000.0","100","1","1","1"],
            ["1698883200000","34000.0","","33000.0","34900.0","100","1","1","1"]
        ]}"#;
        let envelope: OkxResponse<Vec<Vec<String>>> = serde_json::from_str(raw).unwrap();
        let bars = daily_bars(&envelope.data);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2023, 11, 3).unwrap());
        assert_eq!((bars[0].high, bars[0].low), (35200.5, 34500.0));
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2023, 11, 4).unwrap());
    }

    #[test]
    fn swap_id_uses_dashes() {
        assert_eq!(swap_id(&Pair::new("BTC/USDT:USDT")), "BTC-USDT-SWAP");
        assert_eq!(swap_id(&Pair::new("1000PEPE/USDT:USDT")), "1000PEPE-USDT-SWAP");
    }
}

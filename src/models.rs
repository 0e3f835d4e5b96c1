//! Shared data structures used throughout the application.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowercase exchange identifier, e.g. `binance`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trading pair symbol: `BTC/USDT:USDT` for a USDT-margined perpetual,
/// `BTC/USDT` for spot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pair(String);

impl Pair {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strips a leading contract multiplier (`1000PEPE/USDT:USDT` becomes
    /// `PEPE/USDT:USDT`) so venues listing different multiples of the same
    /// asset line up. Only a `1` followed by zeros and then a letter counts.
    pub fn normalized(&self) -> Pair {
        if let Some(after_one) = self.0.strip_prefix('1') {
            let rest = after_one.trim_start_matches('0');
            if rest.len() < after_one.len() && rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
                return Pair(rest.to_string());
            }
        }
        self.clone()
    }

    /// Spot pair a perpetual settles against: everything before `:`.
    pub fn spot_symbol(&self) -> Pair {
        match self.0.split_once(':') {
            Some((spot, _)) => Pair(spot.to_string()),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single funding payment rate. The exchange/pair identity is the key of
/// the sequence the observation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingRateObservation {
    /// Epoch seconds. Also accepts an ISO-8601 string when deserializing.
    #[serde(with = "epoch_seconds")]
    pub timestamp: i64,
    /// Signed fraction per funding interval (0.0001 == 0.01%).
    pub rate: f64,
}

impl FundingRateObservation {
    pub fn new(timestamp: i64, rate: f64) -> Self {
        Self { timestamp, rate }
    }
}

/// Daily high/low bar used as a volatility proxy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeObservation {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
}

impl AmplitudeObservation {
    pub fn new(date: NaiveDate, high: f64, low: f64) -> Self {
        Self { date, high, low }
    }

    /// Daily range in percent of the low, `None` when it cannot be computed.
    pub fn amplitude(&self) -> Option<f64> {
        if !self.high.is_finite() || !self.low.is_finite() || self.low <= 0.0 || self.high < self.low {
            return None;
        }
        Some((self.high - self.low) / self.low * 100.0)
    }
}

/// Where the rate used for role assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Current,
    HistoricalFallback,
}

/// Side taken on the perpetual leg of a perp-spot trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerpSide {
    Short,
    Long,
}

/// Side taken on the spot leg of a perp-spot trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotSide {
    Buy,
    Sell,
}

/// Parses epoch seconds or an ISO-8601 timestamp (RFC 3339, or naive and
/// taken as UTC).
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<i64>() {
        return Some(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}

mod epoch_seconds {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Seconds(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*ts)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Seconds(secs) => Ok(secs),
            RawTimestamp::Text(text) => super::parse_timestamp(&text)
                .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp `{text}`"))),
        }
    }
}

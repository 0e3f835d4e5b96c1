//! In-memory funding-rate and amplitude history per (exchange, pair).
//!
//! The store is filled once per run, either from a market-data provider or
//! from persisted snapshots, and is read-only during analysis.

use crate::errors::AnalysisError;
use crate::models::{AmplitudeObservation, ExchangeId, FundingRateObservation, Pair};
use crate::stats::{DEFAULT_FUNDING_INTERVAL_HOURS, infer_sample_period_hours};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const SECONDS_PER_DAY: i64 = 86_400;

/// How much history the store retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub historical_days: u32,
    pub amplitude_days: u32,
}

/// Everything known about one pair on one perpetual exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSeries {
    pub current_rate: Option<f64>,
    pub funding_interval_hours: f64,
    /// Non-decreasing by timestamp.
    pub historical: Vec<FundingRateObservation>,
    /// Ascending by date, one bar per date.
    pub amplitude: Vec<AmplitudeObservation>,
}

impl ExchangeSeries {
    pub fn new(
        current_rate: Option<f64>,
        funding_interval_hours: f64,
        historical: Vec<FundingRateObservation>,
        amplitude: Vec<AmplitudeObservation>,
    ) -> Self {
        Self {
            current_rate,
            funding_interval_hours,
            historical,
            amplitude,
        }
    }

    pub fn latest_historical(&self) -> Option<&FundingRateObservation> {
        self.historical.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    exchange: ExchangeId,
    pair: Pair,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    as_of: i64,
    horizon: Horizon,
    /// Registration order, which is the configured exchange order.
    perpetual_exchanges: Vec<ExchangeId>,
    spot_listings: Vec<(ExchangeId, BTreeSet<Pair>)>,
    series: HashMap<SeriesKey, ExchangeSeries>,
}

impl TimeSeriesStore {
    /// `as_of` is the snapshot reference time in epoch seconds.
    pub fn new(as_of: i64, horizon: Horizon) -> Self {
        Self {
            as_of,
            horizon,
            perpetual_exchanges: Vec::new(),
            spot_listings: Vec::new(),
            series: HashMap::new(),
        }
    }

    pub fn as_of(&self) -> i64 {
        self.as_of
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    /// Registers a perpetual exchange even if none of its pairs end up with
    /// data, so exchange order stays the configured one.
    pub fn register_exchange(&mut self, exchange: &ExchangeId) {
        if !self.perpetual_exchanges.contains(exchange) {
            self.perpetual_exchanges.push(exchange.clone());
        }
    }

    /// Adds one series. Returns `false` when the (exchange, normalized pair)
    /// slot is already taken; the first series wins.
    pub fn insert(&mut self, exchange: &ExchangeId, pair: &Pair, mut series: ExchangeSeries) -> bool {
        self.register_exchange(exchange);
        let key = SeriesKey {
            exchange: exchange.clone(),
            pair: pair.normalized(),
        };
        if self.series.contains_key(&key) {
            debug!(%exchange, %pair, "[STORE] duplicate series after pair normalization, keeping first");
            return false;
        }

        series.current_rate = series.current_rate.filter(|r| r.is_finite());

        series.historical.retain(|o| o.rate.is_finite());
        series.historical.sort_by_key(|o| o.timestamp);
        let cutoff = self.as_of - i64::from(self.horizon.historical_days) * SECONDS_PER_DAY;
        series.historical.retain(|o| o.timestamp > cutoff);

        if !(series.funding_interval_hours.is_finite() && series.funding_interval_hours > 0.0) {
            series.funding_interval_hours = infer_sample_period_hours(&series.historical)
                .unwrap_or(DEFAULT_FUNDING_INTERVAL_HOURS);
        }

        series.amplitude.sort_by_key(|bar| bar.date);
        let mut bars: Vec<AmplitudeObservation> = Vec::with_capacity(series.amplitude.len());
        for bar in series.amplitude.drain(..) {
            match bars.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => bars.push(bar),
            }
        }
        let keep_from = bars.len().saturating_sub(self.horizon.amplitude_days as usize);
        series.amplitude = bars.split_off(keep_from);

        self.series.insert(key, series);
        true
    }

    /// Records the spot pairs a spot exchange lists.
    pub fn insert_spot_listing(&mut self, exchange: &ExchangeId, pairs: impl IntoIterator<Item = Pair>) {
        let normalized = pairs.into_iter().map(|p| p.normalized());
        match self.spot_listings.iter_mut().find(|(id, _)| id == exchange) {
            Some((_, listed)) => listed.extend(normalized),
            None => self.spot_listings.push((exchange.clone(), normalized.collect())),
        }
    }

    /// Series for a (exchange, pair), looked up by normalized pair;
    /// `MissingData` when there is no historical data at all.
    pub fn get_series(&self, exchange: &ExchangeId, pair: &Pair) -> Result<&ExchangeSeries, AnalysisError> {
        let key = SeriesKey {
            exchange: exchange.clone(),
            pair: pair.normalized(),
        };
        self.series
            .get(&key)
            .filter(|s| !s.historical.is_empty())
            .ok_or_else(|| AnalysisError::MissingData {
                exchange: exchange.clone(),
                pair: pair.clone(),
            })
    }

    /// Perpetual exchanges with history for `pair`, in configured order.
    pub fn exchanges_for_pair(&self, pair: &Pair) -> Vec<ExchangeId> {
        self.perpetual_exchanges
            .iter()
            .filter(|exchange| self.get_series(exchange, pair).is_ok())
            .cloned()
            .collect()
    }

    /// Spot exchanges listing `spot_pair`, in configured order.
    pub fn spot_exchanges_for_pair(&self, spot_pair: &Pair) -> Vec<ExchangeId> {
        let spot_pair = spot_pair.normalized();
        self.spot_listings
            .iter()
            .filter(|(_, listed)| listed.contains(&spot_pair))
            .map(|(exchange, _)| exchange.clone())
            .collect()
    }

    /// All perpetual pairs with history on at least one exchange.
    pub fn pairs(&self) -> BTreeSet<Pair> {
        self.series
            .iter()
            .filter(|(_, s)| !s.historical.is_empty())
            .map(|(key, _)| key.pair.clone())
            .collect()
    }

    pub fn perpetual_exchanges(&self) -> &[ExchangeId] {
        &self.perpetual_exchanges
    }

    pub fn spot_exchanges(&self) -> impl Iterator<Item = &ExchangeId> {
        self.spot_listings.iter().map(|(exchange, _)| exchange)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}

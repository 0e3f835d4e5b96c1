//! Exchange combinations per trading pair and their trade roles.

use crate::models::{ExchangeId, Pair, PerpSide, RateSource, SpotSide};
use crate::store::{ExchangeSeries, TimeSeriesStore};
use tracing::debug;

const SECONDS_PER_HOUR: i64 = 3600;

/// When the latest historical rate may stand in for a missing current rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Maximum age relative to the store's `as_of`. `None` accepts any age.
    pub max_staleness_hours: Option<u64>,
}

/// One exchange's side of a combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub exchange: ExchangeId,
    pub rate: f64,
    pub source: RateSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerpPerpMatch {
    pub pair: Pair,
    pub short: Leg,
    pub long: Leg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerpSpotMatch {
    pub pair: Pair,
    pub perp: Leg,
    pub spot_exchange: ExchangeId,
    pub perp_side: PerpSide,
    pub spot_side: SpotSide,
}

pub struct PairMatcher<'a> {
    store: &'a TimeSeriesStore,
    policy: FallbackPolicy,
}

impl<'a> PairMatcher<'a> {
    pub fn new(store: &'a TimeSeriesStore, policy: FallbackPolicy) -> Self {
        Self { store, policy }
    }

    /// Current rate if known, else the latest historical rate within the
    /// staleness limit.
    pub fn effective_rate(&self, series: &ExchangeSeries) -> Option<(f64, RateSource)> {
        if let Some(rate) = series.current_rate.filter(|r| r.is_finite()) {
            return Some((rate, RateSource::Current));
        }
        let latest = series.latest_historical()?;
        if let Some(hours) = self.policy.max_staleness_hours {
            let oldest_allowed = self.store.as_of() - hours as i64 * SECONDS_PER_HOUR;
            if latest.timestamp < oldest_allowed {
                return None;
            }
        }
        Some((latest.rate, RateSource::HistoricalFallback))
    }

    fn leg(&self, exchange: &ExchangeId, pair: &Pair) -> Option<Leg> {
        let series = self.store.get_series(exchange, pair).ok()?;
        let (rate, source) = self.effective_rate(series)?;
        Some(Leg {
            exchange: exchange.clone(),
            rate,
            source,
        })
    }

    /// Every unordered pair of perpetual exchanges listing `pair`, in
    /// configured order. The higher rate goes short; on a tie the earlier
    /// exchange does.
    pub fn perp_perp(&self, pair: &Pair) -> Vec<PerpPerpMatch> {
        let exchanges = self.store.exchanges_for_pair(pair);
        let legs: Vec<Option<Leg>> = exchanges.iter().map(|ex| self.leg(ex, pair)).collect();

        let mut matches = Vec::new();
        for i in 0..legs.len() {
            for j in (i + 1)..legs.len() {
                let (Some(first), Some(second)) = (&legs[i], &legs[j]) else {
                    debug!(
                        %pair,
                        first = %exchanges[i],
                        second = %exchanges[j],
                        "[MATCH] no usable rate on one side, combination skipped"
                    );
                    continue;
                };
                let (short, long) = if first.rate >= second.rate {
                    (first, second)
                } else {
                    (second, first)
                };
                matches.push(PerpPerpMatch {
                    pair: pair.clone(),
                    short: short.clone(),
                    long: long.clone(),
                });
            }
        }
        matches
    }

    /// Every (perpetual exchange, spot exchange) combination for `pair`.
    /// Roles come from configuration; the sign of the perpetual rate picks
    /// the sides. A zero rate offers nothing to collect.
    pub fn perp_spot(&self, pair: &Pair) -> Vec<PerpSpotMatch> {
        let spot_exchanges = self.store.spot_exchanges_for_pair(&pair.spot_symbol());
        if spot_exchanges.is_empty() {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for perp_exchange in self.store.exchanges_for_pair(pair) {
            let Some(perp) = self.leg(&perp_exchange, pair) else {
                debug!(%pair, exchange = %perp_exchange, "[MATCH] no usable perpetual rate");
                continue;
            };
            let (perp_side, spot_side) = if perp.rate > 0.0 {
                (PerpSide::Short, SpotSide::Buy)
            } else if perp.rate < 0.0 {
                (PerpSide::Long, SpotSide::Sell)
            } else {
                continue;
            };
            for spot_exchange in &spot_exchanges {
                matches.push(PerpSpotMatch {
                    pair: pair.clone(),
                    perp: perp.clone(),
                    spot_exchange: spot_exchange.clone(),
                    perp_side,
                    spot_side,
                });
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FundingRateObservation;
    use crate::store::Horizon;

    const AS_OF: i64 = 1_700_000_000;

    fn history(rate: f64, last_ts: i64) -> Vec<FundingRateObservation> {
        (0..30)
            .map(|i| FundingRateObservation::new(last_ts - i * 8 * SECONDS_PER_HOUR, rate))
            .collect()
    }

    fn store_with(entries: &[(&str, Option<f64>, f64, i64)]) -> TimeSeriesStore {
        let mut store = TimeSeriesStore::new(
            AS_OF,
            Horizon {
                historical_days: 30,
                amplitude_days: 30,
            },
        );
        let pair = Pair::new("BTC/USDT:USDT");
        for (exchange, current, hist_rate, last_ts) in entries {
            store.insert(
                &ExchangeId::new(exchange),
                &pair,
                ExchangeSeries::new(*current, 8.0, history(*hist_rate, *last_ts), vec![]),
            );
        }
        store
    }

    fn btc() -> Pair {
        Pair::new("BTC/USDT:USDT")
    }

    #[test]
    fn higher_rate_goes_short() {
        let store = store_with(&[("binance", Some(0.0001), 0.0, AS_OF), ("gate", Some(0.0004), 0.0, AS_OF)]);
        let matches = PairMatcher::new(&store, FallbackPolicy::default()).perp_perp(&btc());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].short.exchange.as_str(), "gate");
        assert_eq!(matches[0].long.exchange.as_str(), "binance");
        assert!(matches[0].short.rate >= matches[0].long.rate);
    }

    #[test]
    fn tie_keeps_configured_order() {
        let store = store_with(&[("okx", Some(0.0002), 0.0, AS_OF), ("binance", Some(0.0002), 0.0, AS_OF)]);
        let matches = PairMatcher::new(&store, FallbackPolicy::default()).perp_perp(&btc());
        assert_eq!(matches[0].short.exchange.as_str(), "okx");
    }

    #[test]
    fn all_unordered_combinations_are_enumerated() {
        let store = store_with(&[
            ("a", Some(0.1), 0.0, AS_OF),
            ("b", Some(0.2), 0.0, AS_OF),
            ("c", Some(0.3), 0.0, AS_OF),
        ]);
        let names: Vec<(String, String)> = PairMatcher::new(&store, FallbackPolicy::default())
            .perp_perp(&btc())
            .into_iter()
            .map(|m| (m.short.exchange.to_string(), m.long.exchange.to_string()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("b".to_string(), "a".to_string()),
                ("c".to_string(), "a".to_string()),
                ("c".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn missing_current_rate_falls_back_to_latest_history() {
        let store = store_with(&[("binance", None, 0.0009, AS_OF), ("gate", Some(0.0001), 0.0, AS_OF)]);
        let matches = PairMatcher::new(&store, FallbackPolicy::default()).perp_perp(&btc());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].short.exchange.as_str(), "binance");
        assert_eq!(matches[0].short.source, RateSource::HistoricalFallback);
        assert_eq!(matches[0].long.source, RateSource::Current);
    }

    #[test]
    fn stale_fallback_is_rejected() {
        let two_days_ago = AS_OF - 48 * SECONDS_PER_HOUR;
        let store = store_with(&[("binance", None, 0.0009, two_days_ago), ("gate", Some(0.0001), 0.0, AS_OF)]);
        let strict = FallbackPolicy {
            max_staleness_hours: Some(24),
        };
        assert!(PairMatcher::new(&store, strict).perp_perp(&btc()).is_empty());
        let lenient = FallbackPolicy {
            max_staleness_hours: Some(72),
        };
        assert_eq!(PairMatcher::new(&store, lenient).perp_perp(&btc()).len(), 1);
    }

    #[test]
    fn perp_spot_side_follows_rate_sign() {
        let mut store = store_with(&[("binance", Some(-0.002), 0.0, AS_OF), ("gate", Some(0.0), 0.0, AS_OF)]);
        store.insert_spot_listing(&ExchangeId::new("kucoin"), [Pair::new("BTC/USDT")]);
        let matches = PairMatcher::new(&store, FallbackPolicy::default()).perp_spot(&btc());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].perp.exchange.as_str(), "binance");
        assert_eq!(matches[0].spot_exchange.as_str(), "kucoin");
        assert_eq!((matches[0].perp_side, matches[0].spot_side), (PerpSide::Long, SpotSide::Sell));
    }
}

use super::matcher::{FallbackPolicy, PairMatcher, PerpPerpMatch, PerpSpotMatch};
use super::types::{PerpPerpOpportunity, PerpSpotOpportunity};
use crate::config::AnalysisConfig;
use crate::errors::AnalysisError;
use crate::models::{ExchangeId, Pair};
use crate::stats::{self, AmplitudeSummary};
use crate::store::{ExchangeSeries, TimeSeriesStore};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Cadence of the perp-perp differential.
const HOURLY: f64 = 1.0;

/// Turns matched exchange combinations into opportunity records.
pub struct OpportunityBuilder<'a> {
    store: &'a TimeSeriesStore,
    config: &'a AnalysisConfig,
    matcher: PairMatcher<'a>,
}

impl<'a> OpportunityBuilder<'a> {
    pub fn new(store: &'a TimeSeriesStore, config: &'a AnalysisConfig) -> Self {
        let policy = FallbackPolicy {
            max_staleness_hours: config.max_fallback_staleness_hours,
        };
        Self {
            store,
            config,
            matcher: PairMatcher::new(store, policy),
        }
    }

    /// Perp-perp records for one pair. Combinations lacking data are
    /// dropped here and never surface as errors.
    pub fn perp_perp_for_pair(&self, pair: &Pair) -> Vec<PerpPerpOpportunity> {
        let mut seen: HashSet<(ExchangeId, ExchangeId)> = HashSet::new();
        let mut records = Vec::new();
        for m in self.matcher.perp_perp(pair) {
            if m.short.rate - m.long.rate < self.config.min_rate_threshold {
                continue;
            }
            if !seen.insert((m.short.exchange.clone(), m.long.exchange.clone())) {
                continue;
            }
            match self.build_perp_perp(&m) {
                Ok(record) => records.push(record),
                Err(reason) => debug!(
                    %pair,
                    short = %m.short.exchange,
                    long = %m.long.exchange,
                    %reason,
                    "[ANALYZE] perp-perp combination excluded"
                ),
            }
        }
        records
    }

    /// Perp-spot records for one pair, same exclusion rules.
    pub fn perp_spot_for_pair(&self, pair: &Pair) -> Vec<PerpSpotOpportunity> {
        let mut seen: HashSet<(ExchangeId, ExchangeId)> = HashSet::new();
        let mut records = Vec::new();
        for m in self.matcher.perp_spot(pair) {
            if m.perp.rate.abs() <= self.config.min_rate_threshold {
                continue;
            }
            if !seen.insert((m.perp.exchange.clone(), m.spot_exchange.clone())) {
                continue;
            }
            match self.build_perp_spot(&m) {
                Ok(record) => records.push(record),
                Err(reason) => debug!(
                    %pair,
                    perp = %m.perp.exchange,
                    spot = %m.spot_exchange,
                    %reason,
                    "[ANALYZE] perp-spot combination excluded"
                ),
            }
        }
        records
    }

    pub fn build_perp_perp(&self, m: &PerpPerpMatch) -> Result<PerpPerpOpportunity, AnalysisError> {
        let short = self.store.get_series(&m.short.exchange, &m.pair)?;
        let long = self.store.get_series(&m.long.exchange, &m.pair)?;
        let min_samples = self.config.min_history_samples;

        stats::annualized_yield(&short.historical, short.funding_interval_hours, min_samples)?;
        stats::annualized_yield(&long.historical, long.funding_interval_hours, min_samples)?;
        let short_amplitude = self.amplitude(short)?;
        let long_amplitude = self.amplitude(long)?;
        let amplitude = wider_amplitude(short_amplitude, long_amplitude);

        let diff = stats::differential_series(
            &stats::hourly_series(&short.historical, short.funding_interval_hours),
            &stats::hourly_series(&long.historical, long.funding_interval_hours),
        );
        let apy = stats::annualized_yield(&diff, HOURLY, min_samples)?;
        let cumulative_rate_diff = self
            .config
            .windows
            .iter()
            .map(|&days| stats::rolling_cumsum(&diff, days, HOURLY))
            .collect();

        let short_window = self.horizon_window(short);
        let long_window = self.horizon_window(long);

        Ok(PerpPerpOpportunity {
            pair: m.pair.clone(),
            rate_diff: m.short.rate - m.long.rate,
            apy_historical_average: apy,
            cumulative_rate_diff,
            short_exchange: m.short.exchange.clone(),
            long_exchange: m.long.exchange.clone(),
            mean_daily_amplitude: amplitude.mean,
            max_daily_amplitude: amplitude.max,
            amplitude_days: amplitude.days,
            short_rate: m.short.rate,
            long_rate: m.long.rate,
            short_rate_source: m.short.source,
            long_rate_source: m.long.source,
            short_cumulative_rate: short_window.iter().sum(),
            long_cumulative_rate: long_window.iter().sum(),
            short_historical_rates: short_window,
            long_historical_rates: long_window,
        })
    }

    pub fn build_perp_spot(&self, m: &PerpSpotMatch) -> Result<PerpSpotOpportunity, AnalysisError> {
        let perp = self.store.get_series(&m.perp.exchange, &m.pair)?;
        let period = perp.funding_interval_hours;
        let apy = stats::annualized_yield(&perp.historical, period, self.config.min_history_samples)?;
        let amplitude = self.amplitude(perp)?;
        let cum_sum = self
            .config
            .windows
            .iter()
            .map(|&days| stats::rolling_cumsum(&perp.historical, days, period))
            .collect();

        Ok(PerpSpotOpportunity {
            pair: m.pair.clone(),
            rate: m.perp.rate,
            rate_source: m.perp.source,
            perp_side: m.perp_side,
            spot_side: m.spot_side,
            apy_historical_average: apy,
            cum_sum,
            perp_exchange: m.perp.exchange.clone(),
            spot_exchange: m.spot_exchange.clone(),
            mean_daily_amplitude: amplitude.mean,
            max_daily_amplitude: amplitude.max,
            amplitude_days: amplitude.days,
            historical_rates: self.horizon_window(perp),
        })
    }

    fn amplitude(&self, series: &ExchangeSeries) -> Result<AmplitudeSummary, AnalysisError> {
        stats::amplitude_summary(&series.amplitude, self.config.amplitude_days as usize)
    }

    /// Rates in the configured historical window, oldest first.
    fn horizon_window(&self, series: &ExchangeSeries) -> Vec<f64> {
        stats::window_tail(
            &series.historical,
            self.config.historical_days,
            series.funding_interval_hours,
        )
        .iter()
        .map(|o| o.rate)
        .collect()
    }
}

/// The side with more amplitude history wins; equal coverage takes the
/// larger figures of both.
fn wider_amplitude(a: AmplitudeSummary, b: AmplitudeSummary) -> AmplitudeSummary {
    match a.days.cmp(&b.days) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => AmplitudeSummary {
            mean: a.mean.max(b.mean),
            max: a.max.max(b.max),
            days: a.days,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AmplitudeObservation, FundingRateObservation, PerpSide};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    const AS_OF: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    fn hourly(days: i64, rate: f64) -> Vec<FundingRateObservation> {
        (0..days * 24)
            .map(|h| FundingRateObservation::new(AS_OF - h * HOUR, rate))
            .collect()
    }

    fn bars(days: u32, high: f64) -> Vec<AmplitudeObservation> {
        (1..=days)
            .map(|d| AmplitudeObservation::new(NaiveDate::from_ymd_opt(2023, 10, d).unwrap(), high, 100.0))
            .collect()
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            perpetual_exchanges: vec![ExchangeId::new("a"), ExchangeId::new("b")],
            ..AnalysisConfig::default()
        }
    }

    fn store(config: &AnalysisConfig) -> TimeSeriesStore {
        TimeSeriesStore::new(AS_OF, config.horizon())
    }

    fn btc() -> Pair {
        Pair::new("BTC/USDT:USDT")
    }

    #[test]
    fn differential_scenario() {
        let cfg = config();
        let mut s = store(&cfg);
        s.insert(&ExchangeId::new("a"), &btc(), ExchangeSeries::new(Some(0.012), 1.0, hourly(30, 0.01), bars(30, 102.0)));
        s.insert(&ExchangeId::new("b"), &btc(), ExchangeSeries::new(Some(0.004), 1.0, hourly(30, 0.005), bars(30, 101.0)));

        let records = OpportunityBuilder::new(&s, &cfg).perp_perp_for_pair(&btc());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.short_exchange.as_str(), "a");
        assert_eq!(r.long_exchange.as_str(), "b");
        assert_relative_eq!(r.rate_diff, 0.008, epsilon = 1e-12);
        assert_relative_eq!(r.cumulative_rate_diff(30).unwrap(), 3.6, epsilon = 1e-9);
        assert_relative_eq!(r.cumulative_rate_diff(7).unwrap(), 0.005 * 24.0 * 7.0, epsilon = 1e-9);
        assert_relative_eq!(r.cumulative_rate_diff(3).unwrap(), 0.005 * 24.0 * 3.0, epsilon = 1e-9);
        assert_relative_eq!(r.apy_historical_average, 0.005 * 24.0 * 365.0, epsilon = 1e-9);
        assert_eq!(r.short_historical_rates.len(), 720);
        assert_relative_eq!(r.short_cumulative_rate, 7.2, epsilon = 1e-9);
        assert_relative_eq!(r.mean_daily_amplitude, 2.0, epsilon = 1e-9);
        assert!(r.cumulative_rate_diff.iter().all(|w| !w.partial));

        let json = serde_json::to_value(r).unwrap();
        assert_relative_eq!(json["cumulative_rate_diff_30d"].as_f64().unwrap(), 3.6, epsilon = 1e-9);
        assert_eq!(json["cumulative_rate_diff_3d_partial"], false);
        assert_eq!(json["short_exchange"], "a");
    }

    #[test]
    fn mixed_funding_intervals_compare_per_hour() {
        let cfg = config();
        let mut s = store(&cfg);
        let eight_hourly: Vec<FundingRateObservation> = (0..90)
            .map(|i| FundingRateObservation::new(AS_OF - i * 8 * HOUR, 0.0008))
            .collect();
        // same funding per day, paid hourly
        s.insert(&ExchangeId::new("a"), &btc(), ExchangeSeries::new(Some(0.0008), 8.0, eight_hourly, bars(30, 102.0)));
        s.insert(&ExchangeId::new("b"), &btc(), ExchangeSeries::new(Some(0.0001), 1.0, hourly(30, 0.0001), bars(30, 101.0)));

        let records = OpportunityBuilder::new(&s, &cfg).perp_perp_for_pair(&btc());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.short_exchange.as_str(), "a");
        assert_relative_eq!(r.short_cumulative_rate, 0.072, epsilon = 1e-12);
        assert_relative_eq!(r.long_cumulative_rate, 0.072, epsilon = 1e-12);
        for days in [30, 7, 3] {
            assert_relative_eq!(r.cumulative_rate_diff(days).unwrap(), 0.0, epsilon = 1e-12);
        }
        assert_relative_eq!(r.apy_historical_average, 0.0, epsilon = 1e-12);
        assert!(r.cumulative_rate_diff.iter().all(|w| !w.partial));
    }

    #[test]
    fn short_history_excludes_the_combination() {
        let cfg = config();
        let mut s = store(&cfg);
        s.insert(&ExchangeId::new("a"), &btc(), ExchangeSeries::new(Some(0.01), 1.0, hourly(30, 0.01), bars(30, 102.0)));
        s.insert(&ExchangeId::new("b"), &btc(), ExchangeSeries::new(Some(0.0), 1.0, hourly(30, 0.0)[..10].to_vec(), bars(30, 101.0)));
        assert!(OpportunityBuilder::new(&s, &cfg).perp_perp_for_pair(&btc()).is_empty());
    }

    #[test]
    fn missing_amplitude_excludes_the_combination() {
        let cfg = config();
        let mut s = store(&cfg);
        s.insert(&ExchangeId::new("a"), &btc(), ExchangeSeries::new(Some(0.01), 1.0, hourly(30, 0.01), vec![]));
        s.insert(&ExchangeId::new("b"), &btc(), ExchangeSeries::new(Some(0.0), 1.0, hourly(30, 0.0), bars(30, 101.0)));
        assert!(OpportunityBuilder::new(&s, &cfg).perp_perp_for_pair(&btc()).is_empty());
    }

    #[test]
    fn threshold_filters_small_differentials() {
        let cfg = AnalysisConfig {
            min_rate_threshold: 0.01,
            ..config()
        };
        let mut s = store(&cfg);
        s.insert(&ExchangeId::new("a"), &btc(), ExchangeSeries::new(Some(0.012), 1.0, hourly(30, 0.01), bars(30, 102.0)));
        s.insert(&ExchangeId::new("b"), &btc(), ExchangeSeries::new(Some(0.004), 1.0, hourly(30, 0.005), bars(30, 101.0)));
        assert!(OpportunityBuilder::new(&s, &cfg).perp_perp_for_pair(&btc()).is_empty());
    }

    #[test]
    fn perp_spot_record_carries_perp_statistics() {
        let cfg = AnalysisConfig {
            spot_exchanges: vec![ExchangeId::new("kucoin")],
            perp_spot_enabled: true,
            ..config()
        };
        let mut s = store(&cfg);
        s.insert(&ExchangeId::new("a"), &btc(), ExchangeSeries::new(Some(0.0003), 8.0, hourly(30, 0.0001), bars(30, 103.0)));
        s.insert_spot_listing(&ExchangeId::new("kucoin"), [Pair::new("BTC/USDT")]);

        let records = OpportunityBuilder::new(&s, &cfg).perp_spot_for_pair(&btc());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.perp_side, PerpSide::Short);
        // 8h cadence: a 3 day window holds 9 samples
        assert_eq!(r.cum_sum.iter().find(|w| w.days == 3).unwrap().required, 9);
        assert_relative_eq!(r.cum_sum(3).unwrap(), 0.0009, epsilon = 1e-12);
        assert_eq!(r.historical_rates.len(), 90);
        assert_relative_eq!(r.apy_historical_average, 0.0001 * 3.0 * 365.0, epsilon = 1e-12);
    }

    #[test]
    fn equal_amplitude_coverage_takes_larger_figures() {
        let a = AmplitudeSummary { mean: 2.0, max: 9.0, days: 30 };
        let b = AmplitudeSummary { mean: 3.0, max: 5.0, days: 30 };
        assert_eq!(wider_amplitude(a, b), AmplitudeSummary { mean: 3.0, max: 9.0, days: 30 });
        let shorter = AmplitudeSummary { mean: 8.0, max: 8.0, days: 12 };
        assert_eq!(wider_amplitude(shorter, a), a);
    }
}

use crate::models::{ExchangeId, Pair, PerpSide, RateSource, SpotSide};
use crate::stats::RollingSum;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Short one perpetual, long the same pair's perpetual on another exchange,
/// collect the funding differential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerpPerpOpportunity {
    pub pair: Pair,
    /// `short_rate - long_rate`, never negative.
    pub rate_diff: f64,
    pub apy_historical_average: f64,
    /// One entry per configured window, longest first. Serialized as
    /// `cumulative_rate_diff_{N}d` plus `cumulative_rate_diff_{N}d_partial`.
    #[serde(flatten, serialize_with = "cumulative_rate_diff_fields")]
    pub cumulative_rate_diff: Vec<RollingSum>,
    pub short_exchange: ExchangeId,
    pub long_exchange: ExchangeId,
    pub mean_daily_amplitude: f64,
    pub max_daily_amplitude: f64,
    pub amplitude_days: usize,
    pub short_rate: f64,
    pub long_rate: f64,
    pub short_rate_source: RateSource,
    pub long_rate_source: RateSource,
    pub short_cumulative_rate: f64,
    pub long_cumulative_rate: f64,
    /// Oldest first.
    pub short_historical_rates: Vec<f64>,
    pub long_historical_rates: Vec<f64>,
}

impl PerpPerpOpportunity {
    pub fn cumulative_rate_diff(&self, days: u32) -> Option<f64> {
        find_window(&self.cumulative_rate_diff, days)
    }
}

/// Hold a perpetual on one exchange against an opposite spot position,
/// collect the perpetual's funding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerpSpotOpportunity {
    pub pair: Pair,
    /// Perpetual exchange's rate, signed.
    pub rate: f64,
    pub rate_source: RateSource,
    pub perp_side: PerpSide,
    pub spot_side: SpotSide,
    pub apy_historical_average: f64,
    /// Serialized as `cum_sum_{N}d` plus `cum_sum_{N}d_partial`.
    #[serde(flatten, serialize_with = "cum_sum_fields")]
    pub cum_sum: Vec<RollingSum>,
    pub perp_exchange: ExchangeId,
    pub spot_exchange: ExchangeId,
    pub mean_daily_amplitude: f64,
    pub max_daily_amplitude: f64,
    pub amplitude_days: usize,
    pub historical_rates: Vec<f64>,
}

impl PerpSpotOpportunity {
    pub fn cum_sum(&self, days: u32) -> Option<f64> {
        find_window(&self.cum_sum, days)
    }
}

fn find_window(windows: &[RollingSum], days: u32) -> Option<f64> {
    windows.iter().find(|w| w.days == days).map(|w| w.sum)
}

fn cumulative_rate_diff_fields<S: Serializer>(windows: &[RollingSum], serializer: S) -> Result<S::Ok, S::Error> {
    window_fields("cumulative_rate_diff", windows, serializer)
}

fn cum_sum_fields<S: Serializer>(windows: &[RollingSum], serializer: S) -> Result<S::Ok, S::Error> {
    window_fields("cum_sum", windows, serializer)
}

fn window_fields<S: Serializer>(prefix: &str, windows: &[RollingSum], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(windows.len() * 2))?;
    for w in windows {
        map.serialize_entry(&format!("{prefix}_{}d", w.days), &w.sum)?;
        map.serialize_entry(&format!("{prefix}_{}d_partial", w.days), &w.partial)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(days: u32, sum: f64, partial: bool) -> RollingSum {
        RollingSum {
            days,
            sum,
            samples: 0,
            required: 0,
            partial,
        }
    }

    #[test]
    fn perp_spot_windows_serialize_as_flat_fields() {
        let record = PerpSpotOpportunity {
            pair: Pair::new("BTC/USDT:USDT"),
            rate: -0.001,
            rate_source: RateSource::Current,
            perp_side: PerpSide::Long,
            spot_side: SpotSide::Sell,
            apy_historical_average: -1.2,
            cum_sum: vec![window(30, -0.09, false), window(3, -0.009, true)],
            perp_exchange: ExchangeId::new("binance"),
            spot_exchange: ExchangeId::new("okx"),
            mean_daily_amplitude: 2.0,
            max_daily_amplitude: 4.0,
            amplitude_days: 30,
            historical_rates: vec![-0.001],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["cum_sum_30d"], -0.09);
        assert_eq!(json["cum_sum_30d_partial"], false);
        assert_eq!(json["cum_sum_3d"], -0.009);
        assert_eq!(json["cum_sum_3d_partial"], true);
        assert!(json.get("cum_sum").is_none());
        assert_eq!(json["perp_side"], "long");
        assert_eq!(json["pair"], "BTC/USDT:USDT");
    }
}

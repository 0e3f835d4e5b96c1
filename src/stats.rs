//! Rate statistics over funding-rate and amplitude sequences.
//!
//! Everything here is a pure function of its inputs. Sequences are expected
//! in timestamp order, which the store guarantees.

use crate::errors::AnalysisError;
use crate::models::{AmplitudeObservation, FundingRateObservation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Funding interval assumed when neither the source nor the timestamps say.
pub const DEFAULT_FUNDING_INTERVAL_HOURS: f64 = 8.0;

/// Cumulative sum over the trailing window of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingSum {
    pub days: u32,
    pub sum: f64,
    /// Samples actually summed.
    pub samples: usize,
    /// Samples a full window holds.
    pub required: usize,
    /// Fewer samples than a full window were available.
    pub partial: bool,
}

/// Mean and max daily amplitude in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeSummary {
    pub mean: f64,
    pub max: f64,
    pub days: usize,
}

/// Funding periods per year for a given funding interval.
pub fn periods_per_year(funding_interval_hours: f64) -> f64 {
    24.0 / funding_interval_hours * 365.0
}

/// Mean rate over the whole retained sequence, annualized.
pub fn annualized_yield(
    historical: &[FundingRateObservation],
    funding_interval_hours: f64,
    min_samples: usize,
) -> Result<f64, AnalysisError> {
    let required = min_samples.max(1);
    if historical.len() < required {
        return Err(AnalysisError::InsufficientHistory {
            statistic: "annualized_yield",
            required,
            available: historical.len(),
        });
    }
    let mean = historical.iter().map(|o| o.rate).sum::<f64>() / historical.len() as f64;
    Ok(mean * periods_per_year(funding_interval_hours))
}

/// Number of samples in a window of `window_days` at the given cadence.
/// `sample_period_hours` must be positive.
pub fn window_len(window_days: u32, sample_period_hours: f64) -> usize {
    (f64::from(window_days) * 24.0 / sample_period_hours).ceil() as usize
}

/// The trailing samples a window of `window_days` covers.
pub fn window_tail(
    series: &[FundingRateObservation],
    window_days: u32,
    sample_period_hours: f64,
) -> &[FundingRateObservation] {
    let n = window_len(window_days, sample_period_hours);
    &series[series.len().saturating_sub(n)..]
}

/// Out-of-sample cumulative sum of the last `window_days` worth of samples.
///
/// A short series is summed as-is and reported as `partial`.
pub fn rolling_cumsum(
    series: &[FundingRateObservation],
    window_days: u32,
    sample_period_hours: f64,
) -> RollingSum {
    let required = window_len(window_days, sample_period_hours);
    let tail = window_tail(series, window_days, sample_period_hours);
    RollingSum {
        days: window_days,
        sum: tail.iter().map(|o| o.rate).sum(),
        samples: tail.len(),
        required,
        partial: tail.len() < required,
    }
}

/// `a - b` on the timestamps both series share. Timestamps present on one
/// side only are dropped; repeated timestamps pair up positionally.
pub fn differential_series(
    a: &[FundingRateObservation],
    b: &[FundingRateObservation],
) -> Vec<FundingRateObservation> {
    use std::cmp::Ordering;

    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].timestamp.cmp(&b[j].timestamp) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(FundingRateObservation::new(
                    a[i].timestamp,
                    a[i].rate - b[j].rate,
                ));
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Spreads each funding payment evenly over the hours it covers, so venues
/// with different funding intervals share one hourly grid. A payment at `t`
/// covers the hours ending at `t`; payments landing in the same hour add up.
/// Timestamps are snapped to the nearest hour and the total is conserved.
pub fn hourly_series(
    historical: &[FundingRateObservation],
    funding_interval_hours: f64,
) -> Vec<FundingRateObservation> {
    const HOUR: i64 = SECONDS_PER_HOUR as i64;

    let hours = funding_interval_hours.round().max(1.0);
    let span = hours as i64;
    let mut grid: BTreeMap<i64, f64> = BTreeMap::new();
    for o in historical {
        let end = (o.timestamp + HOUR / 2).div_euclid(HOUR) * HOUR;
        let share = o.rate / hours;
        for k in 0..span {
            *grid.entry(end - k * HOUR).or_insert(0.0) += share;
        }
    }
    grid.into_iter()
        .map(|(timestamp, rate)| FundingRateObservation::new(timestamp, rate))
        .collect()
}

/// Mean and max amplitude over the most recent `days` computable bars.
pub fn amplitude_summary(
    amplitude: &[AmplitudeObservation],
    days: usize,
) -> Result<AmplitudeSummary, AnalysisError> {
    let values: Vec<f64> = amplitude.iter().filter_map(|bar| bar.amplitude()).collect();
    let recent = &values[values.len().saturating_sub(days)..];
    if recent.is_empty() {
        return Err(AnalysisError::InsufficientHistory {
            statistic: "amplitude_summary",
            required: 1,
            available: 0,
        });
    }
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let max = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(AmplitudeSummary {
        mean,
        max,
        days: recent.len(),
    })
}

/// Median gap between consecutive distinct timestamps, in hours.
pub fn infer_sample_period_hours(historical: &[FundingRateObservation]) -> Option<f64> {
    let mut gaps: Vec<i64> = historical
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|gap| *gap > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    Some(gaps[(gaps.len() - 1) / 2] as f64 / SECONDS_PER_HOUR)
}

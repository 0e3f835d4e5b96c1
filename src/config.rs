//! Configuration loader and application settings.

use crate::errors::ConfigError;
use crate::models::{ExchangeId, Pair};
use crate::stats::DEFAULT_FUNDING_INTERVAL_HOURS;
use crate::store::Horizon;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Which stages of the pipeline a run executes. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Fetch,
    Analyze,
    FetchAndAnalyze,
    RefreshCurrentRates,
}

impl FromStr for PipelinePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fetch" => Ok(Self::Fetch),
            "analyze" => Ok(Self::Analyze),
            "all" | "fetch-and-analyze" => Ok(Self::FetchAndAnalyze),
            "current-rates" => Ok(Self::RefreshCurrentRates),
            other => Err(format!(
                "unknown phase `{other}` (expected fetch, analyze, all or current-rates)"
            )),
        }
    }
}

/// Where snapshots and results are written.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub use_date_subfolder: bool,
    /// Manual date folder; today's date (formatted) when `None`.
    pub date_subfolder: Option<String>,
    pub date_subfolder_format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("funding_data"),
            use_date_subfolder: true,
            date_subfolder: None,
            date_subfolder_format: "%Y%m%d".into(),
        }
    }
}

/// Market-data retrieval settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Skip current-rate requests; analysis then falls back to the latest
    /// historical rate.
    pub fetch_current_rate: bool,
    /// In-flight per-pair requests per exchange.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fetch_current_rate: true,
            concurrency: 8,
            request_timeout_secs: 15,
        }
    }
}

/// Settings consumed by the opportunity-analysis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Order is significant: it breaks ties between equal opportunities.
    pub perpetual_exchanges: Vec<ExchangeId>,
    pub spot_exchanges: Vec<ExchangeId>,
    pub pair_filter: Option<BTreeSet<Pair>>,
    pub historical_days: u32,
    pub amplitude_days: u32,
    /// Rolling windows in days, longest first.
    pub windows: Vec<u32>,
    pub min_history_samples: usize,
    pub default_funding_interval_hours: f64,
    /// How old the latest historical rate may be when it stands in for a
    /// missing current rate. `None` means no limit.
    pub max_fallback_staleness_hours: Option<u64>,
    pub min_rate_threshold: f64,
    pub perp_perp_enabled: bool,
    pub perp_spot_enabled: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            perpetual_exchanges: vec![ExchangeId::new("binance")],
            spot_exchanges: Vec::new(),
            pair_filter: None,
            historical_days: 30,
            amplitude_days: 30,
            windows: vec![30, 7, 3],
            min_history_samples: 24,
            default_funding_interval_hours: DEFAULT_FUNDING_INTERVAL_HOURS,
            max_fallback_staleness_hours: None,
            min_rate_threshold: 0.0,
            perp_perp_enabled: true,
            perp_spot_enabled: false,
        }
    }
}

impl AnalysisConfig {
    pub fn horizon(&self) -> Horizon {
        Horizon {
            historical_days: self.historical_days,
            amplitude_days: self.amplitude_days,
        }
    }

    /// Whether `pair` passes the optional pair filter. Both sides are
    /// compared after multiplier normalization, so a filter entry matches the
    /// raw listing at fetch time and the stored pair at analysis time.
    pub fn accepts_pair(&self, pair: &Pair) -> bool {
        self.pair_filter.as_ref().is_none_or(|filter| {
            let normalized = pair.normalized();
            filter.contains(pair) || filter.iter().any(|entry| entry.normalized() == normalized)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.perpetual_exchanges.is_empty() {
            return Err(ConfigError::EmptyExchangeList("perpetual"));
        }
        check_unique(&self.perpetual_exchanges)?;
        check_unique(&self.spot_exchanges)?;
        if self.perp_spot_enabled && self.spot_exchanges.is_empty() {
            return Err(ConfigError::EmptyExchangeList("spot"));
        }
        if !self.perp_perp_enabled && !self.perp_spot_enabled {
            return Err(ConfigError::Invalid {
                key: "PERP_PERP_ENABLED",
                reason: "perp-perp and perp-spot analysis are both disabled".into(),
            });
        }
        if self.historical_days == 0 {
            return Err(positive("FUNDING_HISTORICAL_DAYS"));
        }
        if self.amplitude_days == 0 {
            return Err(positive("AMPLITUDE_DAYS"));
        }
        if self.windows.is_empty() {
            return Err(ConfigError::Invalid {
                key: "ROLLING_WINDOWS_DAYS",
                reason: "at least one window is required".into(),
            });
        }
        let mut seen = HashSet::new();
        for &days in &self.windows {
            if days == 0 {
                return Err(ConfigError::InvalidWindow {
                    days,
                    reason: "must be positive".into(),
                });
            }
            if days > self.historical_days {
                return Err(ConfigError::InvalidWindow {
                    days,
                    reason: format!(
                        "exceeds the {} day historical horizon",
                        self.historical_days
                    ),
                });
            }
            if !seen.insert(days) {
                return Err(ConfigError::InvalidWindow {
                    days,
                    reason: "listed more than once".into(),
                });
            }
        }
        if self.min_history_samples == 0 {
            return Err(positive("MIN_HISTORY_SAMPLES"));
        }
        let interval = self.default_funding_interval_hours;
        if !interval.is_finite() || interval <= 0.0 || interval > 24.0 {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_FUNDING_INTERVAL_HOURS",
                reason: format!("{interval} is outside (0, 24]"),
            });
        }
        if !self.min_rate_threshold.is_finite() || self.min_rate_threshold < 0.0 {
            return Err(ConfigError::Invalid {
                key: "FUNDING_RATE_THRESHOLD",
                reason: format!("{} must be a non-negative number", self.min_rate_threshold),
            });
        }
        Ok(())
    }
}

/// Consolidated application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub phase: PipelinePhase,
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage_defaults = StorageConfig::default();
        let fetch_defaults = FetchConfig::default();
        let analysis_defaults = AnalysisConfig::default();

        let storage = StorageConfig {
            directory: lookup("DATA_DIRECTORY")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(storage_defaults.directory),
            use_date_subfolder: parse_or(&lookup, "USE_DATE_SUBFOLDER", storage_defaults.use_date_subfolder)?,
            date_subfolder: lookup("DATE_SUBFOLDER").filter(|s| !s.trim().is_empty()),
            date_subfolder_format: lookup("DATE_SUBFOLDER_FORMAT")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(storage_defaults.date_subfolder_format),
        };

        let fetch = FetchConfig {
            fetch_current_rate: parse_or(&lookup, "FETCH_CURRENT_RATE", fetch_defaults.fetch_current_rate)?,
            concurrency: parse_or(&lookup, "FETCH_CONCURRENCY", fetch_defaults.concurrency)?,
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", fetch_defaults.request_timeout_secs)?,
        };
        if fetch.concurrency == 0 {
            return Err(positive("FETCH_CONCURRENCY"));
        }
        if fetch.request_timeout_secs == 0 {
            return Err(positive("REQUEST_TIMEOUT_SECS"));
        }

        let mut windows = match list(&lookup, "ROLLING_WINDOWS_DAYS") {
            Some(items) => items
                .iter()
                .map(|item| parse_value::<u32>("ROLLING_WINDOWS_DAYS", item))
                .collect::<Result<Vec<_>, _>>()?,
            None => analysis_defaults.windows,
        };
        windows.sort_unstable_by(|a, b| b.cmp(a));

        let analysis = AnalysisConfig {
            perpetual_exchanges: list(&lookup, "PERP_EXCHANGES")
                .map(|items| items.iter().map(ExchangeId::new).collect())
                .unwrap_or(analysis_defaults.perpetual_exchanges),
            spot_exchanges: list(&lookup, "SPOT_EXCHANGES")
                .map(|items| items.iter().map(ExchangeId::new).collect())
                .unwrap_or_default(),
            pair_filter: list(&lookup, "PAIRS_FILTER")
                .map(|items| items.into_iter().map(Pair::new).collect()),
            historical_days: parse_or(&lookup, "FUNDING_HISTORICAL_DAYS", analysis_defaults.historical_days)?,
            amplitude_days: parse_or(&lookup, "AMPLITUDE_DAYS", analysis_defaults.amplitude_days)?,
            windows,
            min_history_samples: parse_or(&lookup, "MIN_HISTORY_SAMPLES", analysis_defaults.min_history_samples)?,
            default_funding_interval_hours: parse_or(
                &lookup,
                "DEFAULT_FUNDING_INTERVAL_HOURS",
                analysis_defaults.default_funding_interval_hours,
            )?,
            max_fallback_staleness_hours: match lookup("MAX_FALLBACK_STALENESS_HOURS") {
                Some(raw) if !raw.trim().is_empty() => {
                    Some(parse_value("MAX_FALLBACK_STALENESS_HOURS", &raw)?)
                }
                _ => None,
            },
            min_rate_threshold: parse_or(&lookup, "FUNDING_RATE_THRESHOLD", analysis_defaults.min_rate_threshold)?,
            perp_perp_enabled: parse_or(&lookup, "PERP_PERP_ENABLED", analysis_defaults.perp_perp_enabled)?,
            perp_spot_enabled: parse_or(&lookup, "PERP_SPOT_ENABLED", analysis_defaults.perp_spot_enabled)?,
        };
        analysis.validate()?;

        let phase = match lookup("PIPELINE_PHASE") {
            Some(raw) if !raw.trim().is_empty() => {
                raw.parse().map_err(|reason| ConfigError::Invalid {
                    key: "PIPELINE_PHASE",
                    reason,
                })?
            }
            _ => PipelinePhase::FetchAndAnalyze,
        };

        Ok(Self {
            phase,
            storage,
            fetch,
            analysis,
        })
    }
}

fn positive(key: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: "must be positive".into(),
    }
}

fn check_unique(exchanges: &[ExchangeId]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for exchange in exchanges {
        if !seen.insert(exchange) {
            return Err(ConfigError::DuplicateExchange(exchange.clone()));
        }
    }
    Ok(())
}

/// Comma separated list; `None` when unset or blank.
fn list(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Vec<String>> {
    let raw = lookup(key)?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

fn parse_or<T: ConfigValue>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: ConfigValue>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    T::parse_config(raw.trim()).map_err(|reason| ConfigError::Invalid { key, reason })
}

/// Values that can be read from a configuration string.
trait ConfigValue: Sized {
    fn parse_config(raw: &str) -> Result<Self, String>;
}

macro_rules! from_str_config_value {
    ($($t:ty),*) => {$(
        impl ConfigValue for $t {
            fn parse_config(raw: &str) -> Result<Self, String> {
                raw.parse::<$t>().map_err(|e| describe(raw, e))
            }
        }
    )*};
}

from_str_config_value!(u32, u64, usize, f64);

impl ConfigValue for bool {
    fn parse_config(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(format!("`{raw}` is not a boolean")),
        }
    }
}

fn describe(raw: &str, err: impl Display) -> String {
    format!("`{raw}`: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.phase, PipelinePhase::FetchAndAnalyze);
        assert_eq!(cfg.analysis.windows, vec![30, 7, 3]);
        assert_eq!(cfg.analysis.perpetual_exchanges, vec![ExchangeId::new("binance")]);
        assert_eq!(cfg.storage.directory, PathBuf::from("funding_data"));
    }

    #[test]
    fn reads_lists_and_sorts_windows() {
        let cfg = load(&[
            ("PIPELINE_PHASE", "analyze"),
            ("PERP_EXCHANGES", "Binance, gate"),
            ("SPOT_EXCHANGES", "okx"),
            ("PERP_SPOT_ENABLED", "yes"),
            ("ROLLING_WINDOWS_DAYS", "3,14,7"),
            ("PAIRS_FILTER", "BTC/USDT:USDT,ETH/USDT:USDT"),
            ("MAX_FALLBACK_STALENESS_HOURS", "24"),
        ])
        .unwrap();
        assert_eq!(cfg.phase, PipelinePhase::Analyze);
        assert_eq!(
            cfg.analysis.perpetual_exchanges,
            vec![ExchangeId::new("binance"), ExchangeId::new("gate")]
        );
        assert_eq!(cfg.analysis.windows, vec![14, 7, 3]);
        assert_eq!(cfg.analysis.max_fallback_staleness_hours, Some(24));
        assert!(cfg.analysis.accepts_pair(&Pair::new("ETH/USDT:USDT")));
        assert!(!cfg.analysis.accepts_pair(&Pair::new("SOL/USDT:USDT")));
    }

    #[test]
    fn pair_filter_matches_across_multiplier_prefixes() {
        let cfg = load(&[("PAIRS_FILTER", "1000PEPE/USDT:USDT")]).unwrap();
        assert!(cfg.analysis.accepts_pair(&Pair::new("1000PEPE/USDT:USDT")));
        assert!(cfg.analysis.accepts_pair(&Pair::new("PEPE/USDT:USDT")));
        assert!(!cfg.analysis.accepts_pair(&Pair::new("1000SHIB/USDT:USDT")));

        let by_base = load(&[("PAIRS_FILTER", "PEPE/USDT:USDT")]).unwrap();
        assert!(by_base.analysis.accepts_pair(&Pair::new("1000PEPE/USDT:USDT")));
    }

    #[test]
    fn window_longer_than_horizon_is_rejected() {
        let err = load(&[("FUNDING_HISTORICAL_DAYS", "14"), ("ROLLING_WINDOWS_DAYS", "30,7")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWindow { days: 30, .. }));
        let err = load(&[("ROLLING_WINDOWS_DAYS", "7,0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWindow { days: 0, .. }));
    }

    #[test]
    fn bad_exchange_lists_are_rejected() {
        assert_eq!(
            load(&[("PERP_SPOT_ENABLED", "true")]).unwrap_err(),
            ConfigError::EmptyExchangeList("spot")
        );
        assert_eq!(
            load(&[("PERP_EXCHANGES", "gate,binance,GATE")]).unwrap_err(),
            ConfigError::DuplicateExchange(ExchangeId::new("gate"))
        );
        let empty = AnalysisConfig {
            perpetual_exchanges: vec![],
            ..AnalysisConfig::default()
        };
        assert_eq!(empty.validate().unwrap_err(), ConfigError::EmptyExchangeList("perpetual"));
    }

    #[test]
    fn unparseable_values_fail_fast() {
        assert!(matches!(
            load(&[("FUNDING_RATE_THRESHOLD", "lots")]).unwrap_err(),
            ConfigError::Invalid { key: "FUNDING_RATE_THRESHOLD", .. }
        ));
        assert!(matches!(
            load(&[("PIPELINE_PHASE", "backtest")]).unwrap_err(),
            ConfigError::Invalid { key: "PIPELINE_PHASE", .. }
        ));
        assert!(load(&[("FUNDING_RATE_THRESHOLD", "-0.1")]).is_err());
        assert!(load(&[("DEFAULT_FUNDING_INTERVAL_HOURS", "0")]).is_err());
    }
}

//! On-disk snapshots and result files.
//!
//! Layout of one run:
//!
//! ```text
//! {directory}/{date}/data/funding_rates_{exchange}.json
//! {directory}/{date}/data/spot_pairs_{exchange}.json
//! {directory}/{date}/result/result_perp_perp_{exchanges}.json
//! {directory}/{date}/result/result_spot_perp_positive_{exchanges}.json
//! {directory}/{date}/result/result_spot_perp_negative_{exchanges}.json
//! ```

use crate::aggregator::{AnalysisResults, ResultSink};
use crate::config::{AnalysisConfig, StorageConfig};
use crate::errors::{AppError, ConfigError, Result};
use crate::models::{AmplitudeObservation, ExchangeId, FundingRateObservation, Pair};
use crate::stats::infer_sample_period_hours;
use crate::store::{ExchangeSeries, TimeSeriesStore};
use crate::utils::join_exchange_ids;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directories of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the date subfolder, formatting the local date when no
    /// folder is given explicitly.
    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        if !storage.use_date_subfolder {
            return Ok(Self::new(&storage.directory));
        }
        let folder = match &storage.date_subfolder {
            Some(folder) => folder.clone(),
            None => {
                let mut folder = String::new();
                write!(folder, "{}", chrono::Local::now().format(&storage.date_subfolder_format)).map_err(|_| {
                    ConfigError::Invalid {
                        key: "DATE_SUBFOLDER_FORMAT",
                        reason: format!("`{}` is not a valid date format", storage.date_subfolder_format),
                    }
                })?;
                folder
            }
        };
        Ok(Self::new(storage.directory.join(folder)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn result_dir(&self) -> PathBuf {
        self.root.join("result")
    }

    pub fn snapshot_path(&self, exchange: &ExchangeId) -> PathBuf {
        self.data_dir().join(format!("funding_rates_{exchange}.json"))
    }

    pub fn spot_listing_path(&self, exchange: &ExchangeId) -> PathBuf {
        self.data_dir().join(format!("spot_pairs_{exchange}.json"))
    }

    pub fn result_path(&self, kind: &str, exchanges: &[ExchangeId]) -> PathBuf {
        self.result_dir()
            .join(format!("result_{kind}_{}.json", join_exchange_ids(exchanges)))
    }
}

/// Everything fetched for one perpetual exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    pub exchange: ExchangeId,
    /// Epoch seconds at which the fetch finished.
    pub as_of: i64,
    /// Venue-wide funding interval, when the venue has one.
    #[serde(default)]
    pub funding_interval_hours: Option<f64>,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub pair: Pair,
    pub current_rate: Option<f64>,
    #[serde(default)]
    pub funding_interval_hours: Option<f64>,
    pub historical: Vec<FundingRateObservation>,
    #[serde(default)]
    pub amplitude: Vec<AmplitudeObservation>,
}

/// Spot pairs one spot exchange lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotListing {
    pub exchange: ExchangeId,
    pub pairs: Vec<Pair>,
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

/// `None` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

pub fn save_snapshot(layout: &RunLayout, snapshot: &ExchangeSnapshot) -> Result<()> {
    let path = layout.snapshot_path(&snapshot.exchange);
    save_json(&path, snapshot)?;
    info!(
        exchange = %snapshot.exchange,
        pairs = snapshot.entries.len(),
        path = %path.display(),
        "[PERSIST] snapshot saved"
    );
    Ok(())
}

pub fn load_snapshot(layout: &RunLayout, exchange: &ExchangeId) -> Result<Option<ExchangeSnapshot>> {
    load_json(&layout.snapshot_path(exchange))
}

pub fn save_spot_listing(layout: &RunLayout, listing: &SpotListing) -> Result<()> {
    let path = layout.spot_listing_path(&listing.exchange);
    save_json(&path, listing)?;
    info!(exchange = %listing.exchange, pairs = listing.pairs.len(), "[PERSIST] spot listing saved");
    Ok(())
}

pub fn load_spot_listing(layout: &RunLayout, exchange: &ExchangeId) -> Result<Option<SpotListing>> {
    load_json(&layout.spot_listing_path(exchange))
}

/// Builds the analysis store from the snapshots of the configured
/// exchanges. Missing files are skipped; no perpetual data at all is an
/// error.
pub fn load_store(layout: &RunLayout, config: &AnalysisConfig) -> Result<TimeSeriesStore> {
    let mut snapshots = Vec::new();
    for exchange in &config.perpetual_exchanges {
        match load_snapshot(layout, exchange)? {
            Some(snapshot) => snapshots.push((exchange, snapshot)),
            None => warn!(%exchange, root = %layout.root().display(), "[PERSIST] no snapshot, exchange skipped"),
        }
    }
    let Some(as_of) = snapshots.iter().map(|(_, s)| s.as_of).max() else {
        return Err(AppError::NoData(format!(
            "no funding snapshot under {}",
            layout.data_dir().display()
        )));
    };

    let mut store = TimeSeriesStore::new(as_of, config.horizon());
    for (exchange, snapshot) in snapshots {
        store.register_exchange(exchange);
        for mut entry in snapshot.entries {
            entry.historical.sort_by_key(|o| o.timestamp);
            let interval = entry
                .funding_interval_hours
                .or(snapshot.funding_interval_hours)
                .filter(|h| h.is_finite() && *h > 0.0)
                .or_else(|| infer_sample_period_hours(&entry.historical))
                .unwrap_or(config.default_funding_interval_hours);
            store.insert(
                exchange,
                &entry.pair,
                ExchangeSeries::new(entry.current_rate, interval, entry.historical, entry.amplitude),
            );
        }
    }

    if config.perp_spot_enabled {
        for exchange in &config.spot_exchanges {
            match load_spot_listing(layout, exchange)? {
                Some(listing) => store.insert_spot_listing(exchange, listing.pairs),
                None => warn!(%exchange, "[PERSIST] no spot listing, exchange skipped"),
            }
        }
    }

    info!(
        as_of,
        exchanges = store.perpetual_exchanges().len(),
        series = store.series_count(),
        "[PERSIST] store loaded"
    );
    Ok(store)
}

/// Writes the result sets as JSON arrays under `result/`.
#[derive(Debug, Clone)]
pub struct JsonResultWriter {
    layout: RunLayout,
    perpetual_exchanges: Vec<ExchangeId>,
    perp_perp: bool,
    perp_spot: bool,
}

impl JsonResultWriter {
    pub fn new(layout: RunLayout, config: &AnalysisConfig) -> Self {
        Self {
            layout,
            perpetual_exchanges: config.perpetual_exchanges.clone(),
            perp_perp: config.perp_perp_enabled,
            perp_spot: config.perp_spot_enabled,
        }
    }

    fn write<T: Serialize>(&self, kind: &str, records: &[T]) -> Result<()> {
        let path = self.layout.result_path(kind, &self.perpetual_exchanges);
        save_json(&path, &records)?;
        info!(kind, records = records.len(), path = %path.display(), "[PERSIST] results written");
        Ok(())
    }
}

impl ResultSink for JsonResultWriter {
    fn persist(&self, results: &AnalysisResults) -> Result<()> {
        if self.perp_perp {
            self.write("perp_perp", &results.perp_perp)?;
        }
        if self.perp_spot {
            self.write("spot_perp_positive", &results.perp_spot_positive)?;
            self.write("spot_perp_negative", &results.perp_spot_negative)?;
        }
        Ok(())
    }
}

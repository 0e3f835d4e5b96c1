//! Fetch and analyze stages, selected once at startup.

use crate::aggregator::{self, AnalysisResults, ResultSink};
use crate::cex::{MarketDataProvider, provider_for};
use crate::config::{AnalysisConfig, AppConfig, FetchConfig, PipelinePhase};
use crate::errors::{AppError, Result};
use crate::models::{ExchangeId, Pair};
use crate::persistence::{
    self, ExchangeSnapshot, JsonResultWriter, RunLayout, SnapshotEntry, SpotListing,
};
use crate::utils::log_progress;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(config: &AppConfig) -> Result<()> {
    let layout = RunLayout::from_config(&config.storage)?;
    info!(phase = ?config.phase, root = %layout.root().display(), "[INIT] pipeline starting");
    match config.phase {
        PipelinePhase::Fetch => fetch_stage(config, &layout).await,
        PipelinePhase::Analyze => analyze_stage(config, &layout).await.map(drop),
        PipelinePhase::FetchAndAnalyze => {
            fetch_stage(config, &layout).await?;
            analyze_stage(config, &layout).await.map(drop)
        }
        PipelinePhase::RefreshCurrentRates => refresh_current_rates(config, &layout).await,
    }
}

/// Fetches every configured exchange and writes its snapshot. An exchange
/// whose listing cannot be fetched is skipped.
pub async fn fetch_stage(config: &AppConfig, layout: &RunLayout) -> Result<()> {
    let perpetual = resolve_providers(&config.analysis.perpetual_exchanges, &config.fetch)?;
    let spot = if config.analysis.perp_spot_enabled {
        resolve_providers(&config.analysis.spot_exchanges, &config.fetch)?
    } else {
        Vec::new()
    };

    for provider in &perpetual {
        match fetch_snapshot(provider.as_ref(), &config.analysis, &config.fetch).await {
            Ok(snapshot) => persistence::save_snapshot(layout, &snapshot)?,
            Err(e) => warn!(exchange = %provider.exchange(), error = %e, "[FETCH] exchange skipped"),
        }
    }
    for provider in &spot {
        match provider.spot_pairs().await {
            Ok(pairs) => persistence::save_spot_listing(
                layout,
                &SpotListing {
                    exchange: provider.exchange().clone(),
                    pairs,
                },
            )?,
            Err(e) => warn!(exchange = %provider.exchange(), error = %e, "[FETCH] spot listing skipped"),
        }
    }
    Ok(())
}

/// Loads the snapshots, analyzes them and writes the result sets.
pub async fn analyze_stage(config: &AppConfig, layout: &RunLayout) -> Result<AnalysisResults> {
    let store = persistence::load_store(layout, &config.analysis)?;
    let results = aggregator::analyze_concurrent(Arc::new(store), Arc::new(config.analysis.clone())).await?;
    JsonResultWriter::new(layout.clone(), &config.analysis).persist(&results)?;
    Ok(results)
}

/// Re-requests only the current rates of existing snapshots.
pub async fn refresh_current_rates(config: &AppConfig, layout: &RunLayout) -> Result<()> {
    let providers = resolve_providers(&config.analysis.perpetual_exchanges, &config.fetch)?;
    for provider in &providers {
        let Some(mut snapshot) = persistence::load_snapshot(layout, provider.exchange())? else {
            warn!(exchange = %provider.exchange(), "[FETCH] no snapshot to refresh");
            continue;
        };
        let refreshed = refresh_snapshot(provider.as_ref(), &mut snapshot, &config.analysis, &config.fetch).await;
        info!(exchange = %provider.exchange(), refreshed, "[FETCH] current rates refreshed");
        persistence::save_snapshot(layout, &snapshot)?;
    }
    Ok(())
}

fn resolve_providers(exchanges: &[ExchangeId], fetch: &FetchConfig) -> Result<Vec<Box<dyn MarketDataProvider>>> {
    exchanges.iter().map(|exchange| provider_for(exchange, fetch)).collect()
}

/// Builds one exchange's snapshot. Pairs whose history or bars cannot be
/// fetched are left out.
pub async fn fetch_snapshot(
    provider: &dyn MarketDataProvider,
    analysis: &AnalysisConfig,
    fetch: &FetchConfig,
) -> Result<ExchangeSnapshot> {
    let exchange = provider.exchange();
    let pairs: Vec<Pair> = provider
        .perpetual_pairs()
        .await?
        .into_iter()
        .filter(|pair| analysis.accepts_pair(pair))
        .collect();
    let total = pairs.len();
    info!(%exchange, pairs = total, "[FETCH] fetching funding data");

    let mut entries = Vec::with_capacity(total);
    let mut results = stream::iter(pairs)
        .map(|pair| fetch_entry(provider, pair, analysis, fetch.fetch_current_rate))
        .buffered(fetch.concurrency.max(1))
        .enumerate();
    while let Some((index, result)) = results.next().await {
        match result {
            Ok(entry) => entries.push(entry),
            Err((pair, e)) => warn!(%exchange, %pair, error = %e, "[FETCH] pair skipped"),
        }
        log_progress(exchange, index + 1, total);
    }

    Ok(ExchangeSnapshot {
        exchange: exchange.clone(),
        as_of: Utc::now().timestamp(),
        funding_interval_hours: provider.funding_interval_hours(),
        entries,
    })
}

async fn fetch_entry(
    provider: &dyn MarketDataProvider,
    pair: Pair,
    analysis: &AnalysisConfig,
    with_current_rate: bool,
) -> std::result::Result<SnapshotEntry, (Pair, AppError)> {
    let current = async {
        if !with_current_rate {
            return None;
        }
        match provider.current_rate(&pair).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(exchange = %provider.exchange(), %pair, error = %e, "[FETCH] current rate unavailable");
                None
            }
        }
    };
    let (current_rate, historical, amplitude) = tokio::join!(
        current,
        provider.historical_rates(&pair, analysis.historical_days),
        provider.amplitude(&pair, analysis.amplitude_days),
    );
    let historical = match historical {
        Ok(historical) => historical,
        Err(e) => return Err((pair, e)),
    };
    let amplitude = match amplitude {
        Ok(amplitude) => amplitude,
        Err(e) => return Err((pair, e)),
    };
    Ok(SnapshotEntry {
        pair,
        current_rate,
        funding_interval_hours: None,
        historical,
        amplitude,
    })
}

/// Updates the current rate of every filtered entry in place. Returns how
/// many entries got a rate. A failed request clears the entry's rate.
pub async fn refresh_snapshot(
    provider: &dyn MarketDataProvider,
    snapshot: &mut ExchangeSnapshot,
    analysis: &AnalysisConfig,
    fetch: &FetchConfig,
) -> usize {
    let targets: Vec<(usize, Pair)> = snapshot
        .entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| analysis.accepts_pair(&entry.pair))
        .map(|(index, entry)| (index, entry.pair.clone()))
        .collect();

    let rates: Vec<(usize, Option<f64>)> = stream::iter(targets)
        .map(|(index, pair)| async move {
            match provider.current_rate(&pair).await {
                Ok(rate) => (index, rate),
                Err(e) => {
                    warn!(exchange = %provider.exchange(), %pair, error = %e, "[FETCH] current rate unavailable");
                    (index, None)
                }
            }
        })
        .buffered(fetch.concurrency.max(1))
        .collect()
        .await;

    let mut refreshed = 0;
    for (index, rate) in rates {
        refreshed += usize::from(rate.is_some());
        snapshot.entries[index].current_rate = rate;
    }
    snapshot.as_of = Utc::now().timestamp();
    refreshed
}

//! Collects opportunity records across all pairs into the three ordered
//! result sets.

use crate::arbitrage::{OpportunityBuilder, PerpPerpOpportunity, PerpSpotOpportunity};
use crate::config::AnalysisConfig;
use crate::errors::Result;
use crate::models::Pair;
use crate::store::TimeSeriesStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResults {
    pub perp_perp: Vec<PerpPerpOpportunity>,
    pub perp_spot_positive: Vec<PerpSpotOpportunity>,
    pub perp_spot_negative: Vec<PerpSpotOpportunity>,
}

impl AnalysisResults {
    pub fn is_empty(&self) -> bool {
        self.perp_perp.is_empty() && self.perp_spot_positive.is_empty() && self.perp_spot_negative.is_empty()
    }
}

/// Receives the ordered result sets. Naming and location are the sink's
/// business.
pub trait ResultSink {
    fn persist(&self, results: &AnalysisResults) -> Result<()>;
}

type PairRecords = (Vec<PerpPerpOpportunity>, Vec<PerpSpotOpportunity>);

/// Splits perp-spot records by rate sign and orders all three sets.
pub fn assemble(mut perp_perp: Vec<PerpPerpOpportunity>, perp_spot: Vec<PerpSpotOpportunity>) -> AnalysisResults {
    perp_perp.sort_by(|a, b| b.rate_diff.total_cmp(&a.rate_diff).then_with(|| a.pair.cmp(&b.pair)));

    let (mut positive, mut negative): (Vec<_>, Vec<_>) = perp_spot
        .into_iter()
        .filter(|r| r.rate != 0.0)
        .partition(|r| r.rate > 0.0);
    positive.sort_by(|a, b| b.rate.total_cmp(&a.rate).then_with(|| a.pair.cmp(&b.pair)));
    negative.sort_by(|a, b| a.rate.total_cmp(&b.rate).then_with(|| a.pair.cmp(&b.pair)));

    AnalysisResults {
        perp_perp,
        perp_spot_positive: positive,
        perp_spot_negative: negative,
    }
}

/// Runs the analysis over every pair on the calling thread.
pub fn analyze(store: &TimeSeriesStore, config: &AnalysisConfig) -> AnalysisResults {
    let pairs = pairs_to_analyze(store, config);
    let mut perp_perp = Vec::new();
    let mut perp_spot = Vec::new();
    for pair in &pairs {
        let (pp, ps) = analyze_pair(store, config, pair);
        perp_perp.extend(pp);
        perp_spot.extend(ps);
    }
    finish(perp_perp, perp_spot, pairs.len())
}

/// Same output as [`analyze`], one blocking task per pair.
pub async fn analyze_concurrent(store: Arc<TimeSeriesStore>, config: Arc<AnalysisConfig>) -> Result<AnalysisResults> {
    let pairs = pairs_to_analyze(&store, &config);
    let total = pairs.len();

    let mut tasks = JoinSet::new();
    for (index, pair) in pairs.into_iter().enumerate() {
        let store = Arc::clone(&store);
        let config = Arc::clone(&config);
        tasks.spawn_blocking(move || (index, analyze_pair(&store, &config, &pair)));
    }

    let mut by_index: Vec<Option<PairRecords>> = vec![None; total];
    while let Some(joined) = tasks.join_next().await {
        let (index, records) = joined?;
        by_index[index] = Some(records);
    }

    let mut perp_perp = Vec::new();
    let mut perp_spot = Vec::new();
    for (pp, ps) in by_index.into_iter().flatten() {
        perp_perp.extend(pp);
        perp_spot.extend(ps);
    }
    Ok(finish(perp_perp, perp_spot, total))
}

fn pairs_to_analyze(store: &TimeSeriesStore, config: &AnalysisConfig) -> Vec<Pair> {
    if config.perp_perp_enabled && store.perpetual_exchanges().len() < 2 {
        warn!(
            exchanges = store.perpetual_exchanges().len(),
            "[ANALYZE] fewer than two perpetual exchanges, no perp-perp combinations possible"
        );
    }
    store.pairs().into_iter().filter(|p| config.accepts_pair(p)).collect()
}

fn analyze_pair(store: &TimeSeriesStore, config: &AnalysisConfig, pair: &Pair) -> PairRecords {
    let builder = OpportunityBuilder::new(store, config);
    let perp_perp = if config.perp_perp_enabled {
        builder.perp_perp_for_pair(pair)
    } else {
        Vec::new()
    };
    let perp_spot = if config.perp_spot_enabled {
        builder.perp_spot_for_pair(pair)
    } else {
        Vec::new()
    };
    debug!(%pair, perp_perp = perp_perp.len(), perp_spot = perp_spot.len(), "[ANALYZE] pair done");
    (perp_perp, perp_spot)
}

fn finish(perp_perp: Vec<PerpPerpOpportunity>, perp_spot: Vec<PerpSpotOpportunity>, pairs: usize) -> AnalysisResults {
    let results = assemble(perp_perp, perp_spot);
    info!(
        pairs,
        perp_perp = results.perp_perp.len(),
        perp_spot_positive = results.perp_spot_positive.len(),
        perp_spot_negative = results.perp_spot_negative.len(),
        "[ANALYZE] analysis complete"
    );
    results
}

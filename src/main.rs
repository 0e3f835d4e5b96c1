use anyhow::Result;
use funding_arbitrage_detector::{config::AppConfig, pipeline, utils};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = AppConfig::load()?;
    tracing::info!(
        phase = ?config.phase,
        perpetual = ?config.analysis.perpetual_exchanges,
        spot = ?config.analysis.spot_exchanges,
        windows = ?config.analysis.windows,
        "[INIT] funding-arbitrage-detector starting"
    );

    pipeline::run(&config).await?;
    tracing::info!("[INIT] done");
    Ok(())
}

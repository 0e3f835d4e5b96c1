//! Miscellaneous helper utilities.

use crate::models::ExchangeId;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Logs fetch progress: every step at debug, every tenth of the way at info.
pub fn log_progress(exchange: &ExchangeId, done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let step = (total / 10).max(1);
    if done % step == 0 || done == total {
        let percent = done * 100 / total;
        info!(%exchange, done, total, percent, "[FETCH] progress");
    } else {
        debug!(%exchange, done, total, "[FETCH] progress");
    }
}

/// `binance_gate_okx`, used in result file names.
pub fn join_exchange_ids(exchanges: &[ExchangeId]) -> String {
    exchanges
        .iter()
        .map(ExchangeId::as_str)
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_ids_join_with_underscores() {
        let ids = [ExchangeId::new("binance"), ExchangeId::new("gate")];
        assert_eq!(join_exchange_ids(&ids), "binance_gate");
        assert_eq!(join_exchange_ids(&[]), "");
    }
}

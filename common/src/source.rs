use async_trait::async_trait;

use crate::market::{CandleSeries, Timeframe};

/// Market data collaborator. Implementations return candles in ascending
/// timestamp order; validation happens downstream.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch up to `limit` of the most recent candles.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> anyhow::Result<CandleSeries>;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;
}

// Smoke test for the exchange connector
// Usage: fetch_candles [SYMBOL] [TIMEFRAME] [LIMIT]

use anyhow::{Context, Result};
use common::{CandleSource, Timeframe};
use data_ingestion::{BybitConfig, BybitConnector};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "BTC/USDT".to_string());
    let timeframe: Timeframe = args.next().as_deref().unwrap_or("4h").parse()?;
    let limit: usize = args
        .next()
        .map(|v| v.parse().context("LIMIT must be a number"))
        .transpose()?
        .unwrap_or(10);

    let config = BybitConfig {
        proxy_url: std::env::var("EXCHANGE_PROXY_URL").ok(),
        ..BybitConfig::default()
    };
    let connector = BybitConnector::new(config)?;

    info!("Fetching {} {} candles for {}", limit, timeframe, symbol);

    tokio::select! {
        result = connector.fetch_candles(&symbol, timeframe, limit) => {
            let series = result?;
            series.validate()?;
            for candle in &series.candles {
                println!(
                    "{}  O {:>12.4}  H {:>12.4}  L {:>12.4}  C {:>12.4}  V {:>14.2}",
                    candle.timestamp.format("%Y-%m-%d %H:%M"),
                    candle.open, candle.high, candle.low, candle.close, candle.volume
                );
            }
            info!("✅ {} candles", series.len());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Interrupted");
        }
    }

    Ok(())
}

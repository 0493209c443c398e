// Example: Confluence Scoring
// Builds a synthetic 4h history, enriches it and scores both directions

use chrono::{Duration, TimeZone, Utc};
use common::{Candle, CandleSeries, Timeframe};
use signal_generation::{
    enrich, ConfluenceScorer, MultiTimeframeSnapshot, ScoreOutcome, ScorerConfig,
};

fn synthetic_series(symbol: &str) -> CandleSeries {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut close = 100.0;
    let mut candles = Vec::new();

    for i in 0..240 {
        // slow climb, then a sharp pullback over the last 20 candles
        let drift = if i < 220 { 0.002 } else { -0.006 };
        let wobble = if i % 2 == 0 { 0.003 } else { -0.003 };
        let open = close;
        close *= 1.0 + drift + wobble;
        candles.push(Candle {
            timestamp: start + Duration::hours(4 * i),
            open,
            high: open.max(close) * 1.002,
            low: open.min(close) * 0.998,
            close,
            volume: 1_000.0 + (i % 5) as f64 * 150.0,
        });
    }

    CandleSeries::new(symbol, Timeframe::H4, candles)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Confluence Scoring Example ===\n");

    let series = synthetic_series("BTC/USDT");
    let enriched = enrich(&series)?;
    let latest = enriched
        .latest()
        .ok_or_else(|| anyhow::anyhow!("empty series"))?;

    println!("Latest 4h close: {:.2}", latest.close());
    println!("  RSI:     {:?}", latest.rsi.map(|v| (v * 10.0).round() / 10.0));
    println!("  EMA200:  {:?}", latest.ema_200.map(|v| (v * 100.0).round() / 100.0));
    println!("  BB mid:  {:?}", latest.bb_middle.map(|v| (v * 100.0).round() / 100.0));
    println!();

    let snapshot = MultiTimeframeSnapshot::new("BTC/USDT", Utc::now()).with_series(enriched);
    let scorer = ConfluenceScorer::new(ScorerConfig::default());

    for outcome in scorer.evaluate_both(&snapshot, Utc::now())? {
        match outcome {
            ScoreOutcome::Accepted(signal) => {
                println!("{} accepted with score {}", signal.direction, signal.score);
                println!(
                    "  entry {} / stop {} / target {} (R:R {})",
                    signal.entry_price, signal.stop_loss, signal.take_profit, signal.risk_reward
                );
                for reason in &signal.reasons {
                    println!("  - {}", reason);
                }
            }
            ScoreOutcome::Rejected(rejection) => {
                println!(
                    "{} rejected at {} (score {}): {}",
                    rejection.direction, rejection.stage, rejection.score, rejection.reason
                );
            }
        }
    }

    Ok(())
}

//! Renders the analyst prompt for a synthetic snapshot.
//!
//! With `ANTHROPIC_API_KEY` set the prompt is also sent to the Messages API
//! and the parsed reply is printed; otherwise a canned reply is parsed.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use common::{Candle, CandleSeries, Timeframe};
use research_agents::{parse_analyst_response, AnalysisRequest, AnalystConfig, ClaudeAnalyst, CompletionClient};
use signal_generation::{enrich, MultiTimeframeSnapshot};
use tracing::{info, Level};

fn synthetic(timeframe: Timeframe, n: usize) -> CandleSeries {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut close = 100.0;
    let candles = (0..n)
        .map(|i| {
            let open = close;
            close *= 1.0 + 0.01 * ((i % 9) as f64 - 4.2) / 4.0;
            Candle {
                timestamp: start + Duration::seconds(timeframe.seconds() * i as i64),
                open,
                high: open.max(close) * 1.002,
                low: open.min(close) * 0.998,
                close,
                volume: 1_000.0 + (i % 5) as f64 * 150.0,
            }
        })
        .collect();
    CandleSeries::new("DEMO/USDT", timeframe, candles)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let mut snapshot = MultiTimeframeSnapshot::new("DEMO/USDT", Utc::now());
    for timeframe in Timeframe::ALL {
        snapshot.insert(enrich(&synthetic(timeframe, 240))?);
    }

    let config = AnalystConfig::default();
    let request = AnalysisRequest::from_snapshot(&snapshot, &config)?;
    let prompt = request.prompt();
    println!("{}", prompt);

    let reply = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) => {
            info!("🤖 Sending prompt to {}", config.model);
            ClaudeAnalyst::new(config, key)?.complete(&prompt).await?
        }
        Err(_) => {
            info!("No ANTHROPIC_API_KEY, parsing a canned reply");
            r#"```json
{"signal": "LONG", "confidence": 6, "entry": 100, "stop_loss": 97, "take_profit": 106,
 "timeframe": "4h", "reasoning": ["Higher lows on the 4h"], "trade_type": "swing"}
```"#
                .to_string()
        }
    };

    match parse_analyst_response(&snapshot.symbol, &reply, Utc::now()) {
        Some(signal) => info!(
            "✅ {} {} entry {} stop {} target {} (R/R {}, confidence {}/10)",
            signal.direction,
            signal.symbol,
            signal.entry_price,
            signal.stop_loss,
            signal.take_profit,
            signal.risk_reward,
            signal.confidence
        ),
        None => info!("⏸️ No setup"),
    }

    Ok(())
}

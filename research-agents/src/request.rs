//! Analysis request and prompt rendering
//!
//! The request is a plain data view of one snapshot: the latest 4h close and
//! indicators plus a trailing window of candles per timeframe. The prompt
//! spells out the entry rules and the exact JSON shape the reply must use.

use chrono::{DateTime, Utc};
use common::{ScanError, ScanResult, Timeframe};
use serde::Serialize;
use signal_generation::{EnrichedCandle, EnrichedSeries, MultiTimeframeSnapshot};
use std::fmt::Write;

use crate::agent::AnalystConfig;

/// One candle as the analyst sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleDigest {
    /// `%Y-%m-%d %H:%M`, UTC
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub rsi: Option<f64>,
    pub ema_9: Option<f64>,
    pub ema_200: Option<f64>,
}

impl From<&EnrichedCandle> for CandleDigest {
    fn from(record: &EnrichedCandle) -> Self {
        Self {
            timestamp: record.candle.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            open: record.candle.open,
            high: record.candle.high,
            low: record.candle.low,
            close: record.candle.close,
            volume: record.candle.volume,
            rsi: record.rsi,
            ema_9: record.ema_9,
            ema_200: record.ema_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub current_price: f64,
    pub rsi_4h: Option<f64>,
    pub ema_200_4h: Option<f64>,
    pub candles_1h: Option<Vec<CandleDigest>>,
    pub candles_4h: Option<Vec<CandleDigest>>,
    pub candles_1d: Option<Vec<CandleDigest>>,
    pub macro_context: String,
    pub timestamp: DateTime<Utc>,
}

/// Trailing `n` candles, or `None` when the series is absent or shorter.
fn trailing(series: Option<&EnrichedSeries>, n: usize) -> Option<Vec<CandleDigest>> {
    let series = series?;
    if n == 0 || series.len() < n {
        return None;
    }
    Some(series.tail(n).iter().map(CandleDigest::from).collect())
}

fn format_price(price: f64) -> String {
    if price.abs() >= 1.0 {
        format!("{:.2}", price)
    } else {
        format!("{:.6}", price)
    }
}

fn render_candles(out: &mut String, label: &str, candles: &Option<Vec<CandleDigest>>) {
    let _ = writeln!(out, "**{} timeframe:**", label);
    match candles.as_ref().map(serde_json::to_string_pretty) {
        Some(Ok(json)) => {
            let _ = writeln!(out, "```json\n{}\n```\n", json);
        }
        _ => {
            let _ = writeln!(out, "Unavailable\n");
        }
    }
}

impl AnalysisRequest {
    pub fn from_snapshot(snapshot: &MultiTimeframeSnapshot, config: &AnalystConfig) -> ScanResult<Self> {
        let four_hour = snapshot.four_hour().ok_or_else(|| {
            ScanError::invariant(&snapshot.symbol, Timeframe::H4, "snapshot has no 4h series")
        })?;
        let latest = four_hour.latest().ok_or_else(|| {
            ScanError::invariant(&snapshot.symbol, Timeframe::H4, "4h series is empty")
        })?;

        Ok(Self {
            symbol: snapshot.symbol.clone(),
            current_price: latest.close(),
            rsi_4h: latest.rsi,
            ema_200_4h: latest.ema_200,
            candles_1h: trailing(snapshot.hourly(), config.candles_1h),
            candles_4h: trailing(Some(four_hour), config.candles_4h),
            candles_1d: trailing(snapshot.daily(), config.candles_1d),
            macro_context: config.macro_context.clone(),
            timestamp: snapshot.captured_at,
        })
    }

    /// Signed percent distance of the close from the 4h EMA200.
    pub fn ema_distance_pct(&self) -> Option<f64> {
        self.ema_200_4h
            .filter(|ema| *ema > 0.0)
            .map(|ema| (self.current_price - ema) / ema * 100.0)
    }

    pub fn prompt(&self) -> String {
        let mut out = String::with_capacity(4096);

        let _ = writeln!(
            out,
            "You are an experienced crypto trader. Analyse the data below and decide whether a valid trading setup exists.\n"
        );
        let _ = writeln!(out, "**INSTRUMENT:** {}", self.symbol);
        let _ = writeln!(out, "**CURRENT PRICE:** ${}", format_price(self.current_price));
        let _ = writeln!(out, "**DATE:** {}\n", self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));

        let _ = writeln!(out, "**MARKET DATA:**\n");
        render_candles(&mut out, "1H", &self.candles_1h);
        render_candles(&mut out, "4H", &self.candles_4h);
        render_candles(&mut out, "1D", &self.candles_1d);

        let _ = writeln!(out, "**CURRENT 4H INDICATORS:**");
        match self.rsi_4h {
            Some(rsi) => {
                let _ = writeln!(out, "- RSI: {:.1}", rsi);
            }
            None => {
                let _ = writeln!(out, "- RSI: n/a");
            }
        }
        match (self.ema_200_4h, self.ema_distance_pct()) {
            (Some(ema), Some(distance)) => {
                let _ = writeln!(out, "- EMA 200: ${}", format_price(ema));
                let _ = writeln!(out, "- Distance from EMA200: {:+.1}%\n", distance);
            }
            _ => {
                let _ = writeln!(out, "- EMA 200: n/a\n");
            }
        }

        let _ = writeln!(out, "**MARKET CONTEXT:**\n{}\n", self.macro_context);
        out.push_str(RULES);
        out.push_str(RESPONSE_FORMAT);
        out
    }
}

const RULES: &str = "**WHAT TO ASSESS:**

1. Macro trend (EMA 200, sequence of highs and lows)
2. Chart patterns (head and shoulders, wedges, flags, triangles)
3. Volume profile (rising or fading volume, climaxes)
4. RSI and divergences
5. Support and resistance (rejections, breaks)
6. Confluence (how many factors agree)

**HARD RULES:**

NO LONG when:
- price is more than 10% below EMA 200 in a confirmed downtrend
- a falling knife is active (-3% or worse per candle over 5 candles)
- heavy red volume dominates

NO SHORT when:
- price is more than 10% above EMA 200 in a strong uptrend
- a violent rally is under way (+3% or more per candle)
- bullish momentum is intact

A LONG needs a bullish structure or a bounce from major support, at least 3 confluent factors and a risk/reward of at least 1.5.
A SHORT needs a bearish structure or a rejection from resistance, at least 3 confluent factors and a risk/reward of at least 1.5.

";

const RESPONSE_FORMAT: &str = r#"**RESPONSE FORMAT:**

Reply with valid JSON only, nothing else:

```json
{
  "signal": "LONG" | "SHORT" | "NOTHING",
  "confidence": 1-10,
  "entry": entry_price,
  "stop_loss": stop_price,
  "take_profit": target_price,
  "risk_reward": ratio,
  "timeframe": "1h" | "4h" | "1d",
  "reasoning": ["short factual reason", "..."],
  "context": "one or two sentences on the macro picture",
  "confluence_factors": 3-7,
  "trade_type": "scalp" | "swing" | "position"
}
```

If there is no valid setup, reply:

```json
{"signal": "NOTHING", "reasoning": ["why not"]}
```

Be strict. No signal is often the right answer.
"#;

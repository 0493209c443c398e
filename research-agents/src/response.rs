//! Analyst reply parsing
//!
//! Replies are loosely structured: the JSON may be wrapped in markdown
//! fences or surrounded by prose, prices may arrive as numbers or strings,
//! and `reasoning` may be a list or a single sentence. Anything that does
//! not amount to a coherent LONG or SHORT plan is discarded.

use chrono::{DateTime, Utc};
use common::Timeframe;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::prelude::*;
use serde_json::{Map, Value};
use signal_generation::{AnalystSignal, Direction, PlanCoherenceValidator, TradeType};
use tracing::debug;

lazy_static! {
    static ref FENCED_BLOCK: Option<Regex> = Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok();
}

/// JSON body of a reply, with fences or surrounding prose removed.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some(inner) = FENCED_BLOCK
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
    {
        return inner.as_str().trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn number(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn reasoning(fields: &Map<String, Value>) -> Vec<String> {
    match fields.get("reasoning") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn price(fields: &Map<String, Value>, key: &str) -> Option<Decimal> {
    number(fields, key)
        .filter(|v| *v > 0.0)
        .and_then(Decimal::from_f64)
        .map(|d| d.round_dp(8))
}

fn trade_type(raw: &str) -> Option<TradeType> {
    match raw.to_ascii_lowercase().as_str() {
        "scalp" => Some(TradeType::Scalp),
        "swing" => Some(TradeType::Swing),
        "position" => Some(TradeType::Position),
        _ => None,
    }
}

/// Turn a raw reply into an analyst signal, or `None` when the reply says
/// NOTHING, is malformed, or describes an incoherent plan.
pub fn parse_analyst_response(symbol: &str, reply: &str, now: DateTime<Utc>) -> Option<AnalystSignal> {
    let body = extract_json(reply);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            let preview: String = reply.chars().take(200).collect();
            debug!(symbol, error = %e, preview = %preview, "Analyst reply is not valid JSON");
            return None;
        }
    };
    let Some(fields) = value.as_object() else {
        debug!(symbol, "Analyst reply is not a JSON object");
        return None;
    };

    let raw_signal = text(fields, "signal").unwrap_or_default();
    let direction = match raw_signal.parse::<Direction>() {
        Ok(direction) => direction,
        Err(_) => {
            debug!(symbol, signal = %raw_signal, "Analyst found no setup");
            return None;
        }
    };

    let (Some(entry), Some(stop), Some(target)) = (
        price(fields, "entry"),
        price(fields, "stop_loss"),
        price(fields, "take_profit"),
    ) else {
        debug!(symbol, %direction, "Analyst plan is missing a positive price");
        return None;
    };

    if !PlanCoherenceValidator::is_coherent(direction, entry, stop, target) {
        debug!(symbol, %direction, %entry, %stop, %target, "Analyst plan has levels on the wrong side");
        return None;
    }

    let risk_reward = number(fields, "risk_reward")
        .filter(|rr| *rr > 0.0)
        .and_then(Decimal::from_f64)
        .or_else(|| (target - entry).checked_div(entry - stop).map(|rr| rr.abs()))
        .map(|rr| rr.round_dp(2))
        .unwrap_or_default();

    let confidence = number(fields, "confidence")
        .map(|c| c.round().clamp(1.0, 10.0) as u8)
        .unwrap_or(1);

    let timeframe = text(fields, "timeframe")
        .and_then(|tf| tf.to_ascii_lowercase().parse::<Timeframe>().ok())
        .unwrap_or(Timeframe::H4);

    Some(AnalystSignal {
        symbol: symbol.to_string(),
        direction,
        timeframe,
        confidence,
        entry_price: entry,
        stop_loss: stop,
        take_profit: target,
        risk_reward,
        reasoning: reasoning(fields),
        context: text(fields, "context"),
        confluence_factors: number(fields, "confluence_factors")
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u32),
        trade_type: text(fields, "trade_type").and_then(|t| trade_type(&t)),
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    const LONG_REPLY: &str = r#"Here is my analysis:
```json
{
  "signal": "LONG",
  "confidence": 7,
  "entry": 64000,
  "stop_loss": 62500.5,
  "take_profit": 68000,
  "risk_reward": 2.67,
  "timeframe": "4h",
  "reasoning": ["Bounce from weekly support", "Bullish RSI divergence", "Volume climax on the flush"],
  "context": "Market consolidating after a sharp correction.",
  "confluence_factors": 4,
  "trade_type": "swing"
}
```"#;

    #[test]
    fn test_fenced_long_reply() {
        let signal = parse_analyst_response("BTC/USDT", LONG_REPLY, now()).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.confidence, 7);
        assert_eq!(signal.entry_price, dec!(64000));
        assert_eq!(signal.stop_loss, dec!(62500.5));
        assert_eq!(signal.take_profit, dec!(68000));
        assert_eq!(signal.risk_reward, dec!(2.67));
        assert_eq!(signal.timeframe, Timeframe::H4);
        assert_eq!(signal.reasoning.len(), 3);
        assert_eq!(signal.confluence_factors, Some(4));
        assert_eq!(signal.trade_type, Some(TradeType::Swing));
        assert_eq!(signal.created_at, now());
    }

    #[test]
    fn test_nothing_is_discarded() {
        let reply = r#"```json
{"signal": "NOTHING", "reasoning": ["Falling knife on the 4h"]}
```"#;
        assert!(parse_analyst_response("BTC/USDT", reply, now()).is_none());
    }

    #[test]
    fn test_malformed_replies_are_discarded() {
        assert!(parse_analyst_response("BTC/USDT", "I cannot help with that.", now()).is_none());
        assert!(parse_analyst_response("BTC/USDT", "```json\n{\"signal\": \"LONG\",\n```", now()).is_none());
        assert!(parse_analyst_response("BTC/USDT", "[1, 2, 3]", now()).is_none());
        assert!(parse_analyst_response("BTC/USDT", r#"{"signal": "BUY", "entry": 1}"#, now()).is_none());
    }

    #[test]
    fn test_incoherent_or_missing_prices_are_discarded() {
        // Stop above entry on a LONG
        let reply = r#"{"signal": "LONG", "entry": 100, "stop_loss": 105, "take_profit": 110}"#;
        assert!(parse_analyst_response("SOL/USDT", reply, now()).is_none());

        let reply = r#"{"signal": "SHORT", "entry": 100, "stop_loss": 0, "take_profit": 90}"#;
        assert!(parse_analyst_response("SOL/USDT", reply, now()).is_none());

        let reply = r#"{"signal": "SHORT", "entry": 100, "take_profit": 90}"#;
        assert!(parse_analyst_response("SOL/USDT", reply, now()).is_none());
    }

    #[test]
    fn test_signal_must_be_upper_case() {
        let reply = r#"{"signal": "long", "entry": 100, "stop_loss": 95, "take_profit": 110}"#;
        assert!(parse_analyst_response("BTC/USDT", reply, now()).is_none());

        let reply = r#"{"signal": "Short", "entry": 100, "stop_loss": 105, "take_profit": 90}"#;
        assert!(parse_analyst_response("BTC/USDT", reply, now()).is_none());

        let reply = r#"{"signal": "LONG", "entry": 100, "stop_loss": 95, "take_profit": 110}"#;
        assert!(parse_analyst_response("BTC/USDT", reply, now()).is_some());
    }

    #[test]
    fn test_loose_fields_are_normalised() {
        let reply = r#"{
            "signal": "SHORT",
            "confidence": 14,
            "entry": "$2,450.00",
            "stop_loss": "2520",
            "take_profit": 2310,
            "timeframe": "1D",
            "reasoning": "Rejected at resistance",
            "trade_type": "intraday"
        }"#;
        let signal = parse_analyst_response("ETH/USDT", reply, now()).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.confidence, 10);
        assert_eq!(signal.entry_price, dec!(2450));
        // (2310 - 2450) / (2450 - 2520) = 2
        assert_eq!(signal.risk_reward, dec!(2));
        assert_eq!(signal.timeframe, Timeframe::D1);
        assert_eq!(signal.reasoning, vec!["Rejected at resistance".to_string()]);
        assert_eq!(signal.trade_type, None);
        assert_eq!(signal.context, None);
    }

    #[test]
    fn test_low_confidence_clamps_to_one() {
        let reply = r#"{"signal": "LONG", "confidence": 0, "entry": 10, "stop_loss": 9, "take_profit": 12}"#;
        let signal = parse_analyst_response("LINK/USDT", reply, now()).unwrap();
        assert_eq!(signal.confidence, 1);
        assert_eq!(signal.risk_reward, dec!(2));
    }

    #[test]
    fn test_extract_json_without_fences() {
        assert_eq!(extract_json("Sure! {\"signal\": \"NOTHING\"} Hope that helps."), "{\"signal\": \"NOTHING\"}");
        assert_eq!(extract_json("  {\"a\": 1}  "), "{\"a\": 1}");
    }
}

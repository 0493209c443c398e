use chrono::{DateTime, Utc};
use common::{ScanResult, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::indicators::EnrichedSeries;
use crate::structure::MarketStructure;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Long, Direction::Short];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(anyhow::anyhow!("not a trade direction: {}", other)),
        }
    }
}

/// RSI of the latest candle on each timeframe at signal time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RsiSnapshot {
    pub h1: Option<f64>,
    pub h4: Option<f64>,
    pub d1: Option<f64>,
}

/// Trade plan produced by the confluence scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicSignal {
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    pub score: i32,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: Decimal,
    pub structure: MarketStructure,
    /// In evaluation order
    pub reasons: Vec<String>,
    pub rsi: RsiSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Holding horizon suggested by the external analyst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Scalp,
    Swing,
    Position,
}

/// Trade plan returned by the LLM analyst after validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystSignal {
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    /// 1 to 10
    pub confidence: u8,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: Decimal,
    pub reasoning: Vec<String>,
    pub context: Option<String>,
    pub confluence_factors: Option<u32>,
    pub trade_type: Option<TradeType>,
    pub created_at: DateTime<Utc>,
}

/// Any accepted setup, whichever path produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TradeSignal {
    Heuristic(HeuristicSignal),
    Analyst(AnalystSignal),
}

impl TradeSignal {
    pub fn symbol(&self) -> &str {
        match self {
            TradeSignal::Heuristic(s) => &s.symbol,
            TradeSignal::Analyst(s) => &s.symbol,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TradeSignal::Heuristic(s) => s.direction,
            TradeSignal::Analyst(s) => s.direction,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        match self {
            TradeSignal::Heuristic(s) => s.timeframe,
            TradeSignal::Analyst(s) => s.timeframe,
        }
    }

    pub fn entry_price(&self) -> Decimal {
        match self {
            TradeSignal::Heuristic(s) => s.entry_price,
            TradeSignal::Analyst(s) => s.entry_price,
        }
    }

    pub fn stop_loss(&self) -> Decimal {
        match self {
            TradeSignal::Heuristic(s) => s.stop_loss,
            TradeSignal::Analyst(s) => s.stop_loss,
        }
    }

    pub fn take_profit(&self) -> Decimal {
        match self {
            TradeSignal::Heuristic(s) => s.take_profit,
            TradeSignal::Analyst(s) => s.take_profit,
        }
    }

    pub fn risk_reward(&self) -> Decimal {
        match self {
            TradeSignal::Heuristic(s) => s.risk_reward,
            TradeSignal::Analyst(s) => s.risk_reward,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            TradeSignal::Heuristic(s) => &s.reasons,
            TradeSignal::Analyst(s) => &s.reasoning,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TradeSignal::Heuristic(s) => s.created_at,
            TradeSignal::Analyst(s) => s.created_at,
        }
    }

    /// Percent move from entry to target, positive when the target is on
    /// the profitable side.
    pub fn reward_pct(&self) -> Decimal {
        self.pct_move(self.take_profit())
    }

    /// Percent move from entry to stop, negative when the stop is on the
    /// losing side.
    pub fn risk_pct(&self) -> Decimal {
        self.pct_move(self.stop_loss())
    }

    fn pct_move(&self, level: Decimal) -> Decimal {
        let entry = self.entry_price();
        if entry.is_zero() {
            return Decimal::ZERO;
        }
        let raw = (level - entry) / entry * Decimal::ONE_HUNDRED;
        match self.direction() {
            Direction::Long => raw,
            Direction::Short => -raw,
        }
    }

    /// Cooldown key: one entry per instrument, direction and timeframe.
    pub fn dedupe_key(&self) -> String {
        format!("{}_{}_{}", self.symbol(), self.direction(), self.timeframe())
    }
}

/// Enriched series for one instrument captured at one scan instant.
/// The 4h series is mandatory for scoring; 1h and 1d are optional context.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiTimeframeSnapshot {
    pub symbol: String,
    pub captured_at: DateTime<Utc>,
    pub series: BTreeMap<Timeframe, EnrichedSeries>,
}

impl MultiTimeframeSnapshot {
    pub fn new(symbol: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            captured_at,
            series: BTreeMap::new(),
        }
    }

    pub fn with_series(mut self, series: EnrichedSeries) -> Self {
        self.insert(series);
        self
    }

    pub fn insert(&mut self, series: EnrichedSeries) {
        self.series.insert(series.timeframe, series);
    }

    pub fn get(&self, timeframe: Timeframe) -> Option<&EnrichedSeries> {
        self.series.get(&timeframe)
    }

    pub fn hourly(&self) -> Option<&EnrichedSeries> {
        self.get(Timeframe::H1)
    }

    pub fn four_hour(&self) -> Option<&EnrichedSeries> {
        self.get(Timeframe::H4)
    }

    pub fn daily(&self) -> Option<&EnrichedSeries> {
        self.get(Timeframe::D1)
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.series.keys().copied().collect()
    }
}

/// Anything that turns a snapshot into zero or more trade signals
#[async_trait::async_trait]
pub trait SignalDetector: Send + Sync {
    async fn detect(&self, snapshot: &MultiTimeframeSnapshot) -> ScanResult<Vec<TradeSignal>>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn heuristic(direction: Direction, entry: Decimal, stop: Decimal, target: Decimal) -> TradeSignal {
        TradeSignal::Heuristic(HeuristicSignal {
            symbol: "SOL/USDT".to_string(),
            direction,
            timeframe: Timeframe::H4,
            score: 9,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            risk_reward: dec!(1.67),
            structure: MarketStructure::Range,
            reasons: vec!["RSI 4h=24.0 (oversold)".to_string()],
            rsi: RsiSnapshot::default(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        })
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("LONG".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("SHORT".parse::<Direction>().unwrap(), Direction::Short);
        assert!("NOTHING".parse::<Direction>().is_err());
        assert!("long".parse::<Direction>().is_err());
        assert!(" SHORT ".parse::<Direction>().is_err());
    }

    #[test]
    fn test_dedupe_key_layout() {
        let signal = heuristic(Direction::Long, dec!(100), dec!(97), dec!(105));
        assert_eq!(signal.dedupe_key(), "SOL/USDT_LONG_4h");
    }

    #[test]
    fn test_percent_moves_follow_direction() {
        let long = heuristic(Direction::Long, dec!(100), dec!(97), dec!(105));
        assert_eq!(long.reward_pct(), dec!(5));
        assert_eq!(long.risk_pct(), dec!(-3));

        let short = heuristic(Direction::Short, dec!(100), dec!(103), dec!(95));
        assert_eq!(short.reward_pct(), dec!(5));
        assert_eq!(short.risk_pct(), dec!(-3));
    }

    #[test]
    fn test_signal_serializes_with_source_tag() {
        let signal = heuristic(Direction::Long, dec!(100), dec!(97), dec!(105));
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["source"], "heuristic");
        assert_eq!(json["direction"], "LONG");
        assert_eq!(json["timeframe"], "4h");
        assert_eq!(json["structure"], "range");
    }
}

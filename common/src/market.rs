use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ScanError, ScanResult};

/// Candle interval. The 4-hour series is the scoring reference; hourly and
/// daily are corroborating context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::H1, Timeframe::H4, Timeframe::D1];

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Length of one candle in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 4 * 3_600,
            Timeframe::D1 => 24 * 3_600,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(anyhow::anyhow!("unknown timeframe: {}", other)),
        }
    }
}

/// One OHLCV observation. Never mutated once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    fn check(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(format!("non-positive or non-finite price at {}", self.timestamp));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(format!("negative or non-finite volume at {}", self.timestamp));
        }
        if self.high < self.open.max(self.close) {
            return Err(format!("high below body at {}", self.timestamp));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!("low above body at {}", self.timestamp));
        }
        Ok(())
    }
}

/// Ordered candles for one (instrument, timeframe) pair, as fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Check the structural invariants every downstream stage relies on:
    /// strictly ascending timestamps and well-formed OHLCV values.
    pub fn validate(&self) -> ScanResult<()> {
        for candle in &self.candles {
            candle
                .check()
                .map_err(|detail| ScanError::invariant(&self.symbol, self.timeframe, detail))?;
        }

        if let Some(pair) = self
            .candles
            .windows(2)
            .find(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(ScanError::invariant(
                &self.symbol,
                self.timeframe,
                format!(
                    "timestamps not strictly ascending: {} then {}",
                    pair[0].timestamp, pair[1].timestamp
                ),
            ));
        }

        Ok(())
    }
}

// Market Structure Analyzer
// Pivot counting, RSI divergence, directional volume and rejection wicks

use common::Candle;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::EnrichedCandle;

/// Trend label derived from swing highs and lows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStructure {
    Uptrend,
    Downtrend,
    Range,
}

impl MarketStructure {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStructure::Uptrend => "uptrend",
            MarketStructure::Downtrend => "downtrend",
            MarketStructure::Range => "range",
        }
    }
}

impl fmt::Display for MarketStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw counts behind a structure classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwingCounts {
    pub higher_highs: usize,
    pub lower_highs: usize,
    pub higher_lows: usize,
    pub lower_lows: usize,
}

impl SwingCounts {
    pub fn classify(&self) -> MarketStructure {
        if self.higher_highs > self.lower_highs && self.higher_lows > self.lower_lows {
            MarketStructure::Uptrend
        } else if self.lower_highs > self.higher_highs && self.lower_lows > self.higher_lows {
            MarketStructure::Downtrend
        } else {
            MarketStructure::Range
        }
    }
}

/// Count three-candle runs of strictly rising/falling highs and lows over
/// the trailing `lookback` candles.
pub fn swing_counts(candles: &[Candle], lookback: usize) -> SwingCounts {
    let window = &candles[candles.len().saturating_sub(lookback)..];
    let mut counts = SwingCounts::default();

    for i in 2..window.len() {
        let (a, b, c) = (&window[i - 2], &window[i - 1], &window[i]);

        if c.high > b.high && b.high > a.high {
            counts.higher_highs += 1;
        } else if c.high < b.high && b.high < a.high {
            counts.lower_highs += 1;
        }

        if c.low > b.low && b.low > a.low {
            counts.higher_lows += 1;
        } else if c.low < b.low && b.low < a.low {
            counts.lower_lows += 1;
        }
    }

    counts
}

/// Classify the trailing `lookback` candles. Ties and mixed signals are
/// `Range`.
pub fn classify_structure(candles: &[Candle], lookback: usize) -> MarketStructure {
    swing_counts(candles, lookback).classify()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PivotKind {
    Low,
    High,
}

/// Indices (into `window`) of points strictly beyond their two neighbours on
/// each side.
fn pivots(window: &[EnrichedCandle], kind: PivotKind) -> Vec<usize> {
    if window.len() < 5 {
        return Vec::new();
    }

    (2..window.len() - 2)
        .filter(|&i| {
            let neighbours = [i - 2, i - 1, i + 1, i + 2];
            match kind {
                PivotKind::Low => {
                    let low = window[i].candle.low;
                    neighbours.iter().all(|&j| low < window[j].candle.low)
                }
                PivotKind::High => {
                    let high = window[i].candle.high;
                    neighbours.iter().all(|&j| high > window[j].candle.high)
                }
            }
        })
        .collect()
}

/// The two most recent pivots of `kind`, oldest first, with RSI defined at both.
fn last_two_pivots(window: &[EnrichedCandle], kind: PivotKind) -> Option<(usize, usize, f64, f64)> {
    let found = pivots(window, kind);
    let (&prev, &last) = match found.as_slice() {
        [.., prev, last] => (prev, last),
        _ => return None,
    };
    let prev_rsi = window[prev].rsi?;
    let last_rsi = window[last].rsi?;
    Some((prev, last, prev_rsi, last_rsi))
}

/// Price makes a lower low while RSI makes a higher low.
pub fn bullish_divergence(candles: &[EnrichedCandle], lookback: usize) -> bool {
    let window = &candles[candles.len().saturating_sub(lookback)..];
    match last_two_pivots(window, PivotKind::Low) {
        Some((prev, last, prev_rsi, last_rsi)) => {
            window[last].candle.low < window[prev].candle.low && last_rsi > prev_rsi
        }
        None => false,
    }
}

/// Price makes a higher high while RSI makes a lower high.
pub fn bearish_divergence(candles: &[EnrichedCandle], lookback: usize) -> bool {
    let window = &candles[candles.len().saturating_sub(lookback)..];
    match last_two_pivots(window, PivotKind::High) {
        Some((prev, last, prev_rsi, last_rsi)) => {
            window[last].candle.high > window[prev].candle.high && last_rsi < prev_rsi
        }
        None => false,
    }
}

/// Buy/sell volume split over a window. Candles with close == open count on
/// neither side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeSplit {
    pub green: f64,
    pub red: f64,
}

impl VolumeSplit {
    pub fn over(candles: &[Candle], lookback: usize) -> Self {
        let window = &candles[candles.len().saturating_sub(lookback)..];
        window.iter().fold(Self::default(), |mut split, c| {
            if c.is_green() {
                split.green += c.volume;
            } else if c.is_red() {
                split.red += c.volume;
            }
            split
        })
    }

    fn share(&self, side: f64) -> f64 {
        let total = self.green + self.red;
        if total > 0.0 {
            side / total
        } else {
            0.0
        }
    }

    /// Share of directional volume on green candles, in [0, 1]; 0 when empty.
    pub fn green_ratio(&self) -> f64 {
        self.share(self.green)
    }

    /// Share of directional volume on red candles, in [0, 1]; 0 when empty.
    pub fn red_ratio(&self) -> f64 {
        self.share(self.red)
    }
}

/// Green-candle share of volume over the trailing `lookback` candles.
pub fn directional_volume_ratio(candles: &[Candle], lookback: usize) -> f64 {
    VolumeSplit::over(candles, lookback).green_ratio()
}

/// Long lower wick: more than twice the body and more than half the range.
pub fn is_bullish_rejection(candle: &Candle) -> bool {
    let range = candle.range();
    if range <= 0.0 {
        return false;
    }
    let wick = candle.lower_wick();
    wick > 2.0 * candle.body() && wick > 0.5 * range
}

/// Long upper wick: more than twice the body and more than half the range.
pub fn is_bearish_rejection(candle: &Candle) -> bool {
    let range = candle.range();
    if range <= 0.0 {
        return false;
    }
    let wick = candle.upper_wick();
    wick > 2.0 * candle.body() && wick > 0.5 * range
}

/// Mean of consecutive close-to-close percent changes over the trailing
/// `window` candles. `None` with fewer than two closes.
pub fn mean_close_change_pct(candles: &[Candle], window: usize) -> Option<f64> {
    let tail = &candles[candles.len().saturating_sub(window)..];
    if tail.len() < 2 {
        return None;
    }
    let total: f64 = tail
        .windows(2)
        .map(|w| (w[1].close - w[0].close) / w[0].close * 100.0)
        .sum();
    Some(total / (tail.len() - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candle_at, enriched_at};

    fn highs_lows(pairs: &[(f64, f64)]) -> Vec<Candle> {
        pairs
            .iter()
            .enumerate()
            .map(|(i, &(high, low))| {
                let mid = (high + low) / 2.0;
                candle_at(i as i64, mid, high, low, mid, 1.0)
            })
            .collect()
    }

    #[test]
    fn test_rising_series_is_uptrend() {
        let pairs: Vec<(f64, f64)> = (0..10).map(|i| (110.0 + i as f64, 100.0 + i as f64)).collect();
        let candles = highs_lows(&pairs);
        let counts = swing_counts(&candles, 10);
        assert_eq!(counts.higher_highs, 8);
        assert_eq!(counts.higher_lows, 8);
        assert_eq!(classify_structure(&candles, 10), MarketStructure::Uptrend);
    }

    #[test]
    fn test_falling_series_is_downtrend() {
        let pairs: Vec<(f64, f64)> = (0..10).map(|i| (110.0 - i as f64, 100.0 - i as f64)).collect();
        assert_eq!(classify_structure(&highs_lows(&pairs), 10), MarketStructure::Downtrend);
    }

    #[test]
    fn test_alternating_series_is_range() {
        let pairs: Vec<(f64, f64)> = (0..10)
            .map(|i| if i % 2 == 0 { (110.0, 100.0) } else { (112.0, 102.0) })
            .collect();
        let candles = highs_lows(&pairs);
        assert_eq!(swing_counts(&candles, 10), SwingCounts::default());
        assert_eq!(classify_structure(&candles, 10), MarketStructure::Range);
    }

    #[test]
    fn test_mixed_highs_and_lows_resolve_to_range() {
        // highs rising, lows falling: a broadening range
        let pairs: Vec<(f64, f64)> = (0..10).map(|i| (110.0 + i as f64, 100.0 - i as f64)).collect();
        assert_eq!(classify_structure(&highs_lows(&pairs), 10), MarketStructure::Range);
    }

    #[test]
    fn test_structure_only_reads_trailing_window() {
        let mut pairs: Vec<(f64, f64)> = (0..30).map(|i| (200.0 - i as f64, 190.0 - i as f64)).collect();
        pairs.extend((0..10).map(|i| (110.0 + i as f64, 100.0 + i as f64)));
        assert_eq!(classify_structure(&highs_lows(&pairs), 10), MarketStructure::Uptrend);
    }

    fn divergence_window(lows: &[f64], rsis: &[f64]) -> Vec<EnrichedCandle> {
        lows.iter()
            .zip(rsis)
            .enumerate()
            .map(|(i, (&low, &rsi))| enriched_at(i as i64, low + 2.0, low + 3.0, low, low + 1.0, Some(rsi)))
            .collect()
    }

    #[test]
    fn test_bullish_divergence_detected() {
        // low pivots at 3 (low 95, rsi 25) and 9 (low 93, rsi 31)
        let lows = [100.0, 99.0, 98.0, 95.0, 98.0, 99.0, 98.0, 97.0, 96.0, 93.0, 96.0, 97.0];
        let rsis = [40.0, 38.0, 33.0, 25.0, 33.0, 36.0, 35.0, 34.0, 33.0, 31.0, 35.0, 38.0];
        let window = divergence_window(&lows, &rsis);
        assert!(bullish_divergence(&window, 20));
    }

    #[test]
    fn test_no_bullish_divergence_when_rsi_confirms() {
        let lows = [100.0, 99.0, 98.0, 95.0, 98.0, 99.0, 98.0, 97.0, 96.0, 93.0, 96.0, 97.0];
        let rsis = [40.0, 38.0, 33.0, 25.0, 33.0, 36.0, 35.0, 34.0, 33.0, 20.0, 35.0, 38.0];
        assert!(!bullish_divergence(&divergence_window(&lows, &rsis), 20));
    }

    #[test]
    fn test_single_pivot_is_no_divergence() {
        let lows = [100.0, 99.0, 95.0, 99.0, 100.0, 101.0, 102.0];
        let rsis = [40.0; 7];
        assert!(!bullish_divergence(&divergence_window(&lows, &rsis), 20));
    }

    #[test]
    fn test_bearish_divergence_detected() {
        // high pivots at 3 (high 110, rsi 75) and 9 (high 112, rsi 68)
        let highs = [100.0, 102.0, 105.0, 110.0, 105.0, 103.0, 104.0, 106.0, 108.0, 112.0, 107.0, 104.0];
        let rsis = [55.0, 60.0, 66.0, 75.0, 66.0, 60.0, 61.0, 63.0, 65.0, 68.0, 62.0, 58.0];
        let window: Vec<EnrichedCandle> = highs
            .iter()
            .zip(&rsis)
            .enumerate()
            .map(|(i, (&high, &rsi))| enriched_at(i as i64, high - 2.0, high, high - 3.0, high - 1.0, Some(rsi)))
            .collect();
        assert!(bearish_divergence(&window, 20));
        assert!(!bullish_divergence(&window, 20));
    }

    #[test]
    fn test_volume_ratio_ignores_doji() {
        let candles = vec![
            candle_at(0, 100.0, 102.0, 99.0, 101.0, 30.0), // green
            candle_at(1, 101.0, 102.0, 99.0, 100.0, 70.0), // red
            candle_at(2, 100.0, 101.0, 99.0, 100.0, 500.0), // doji
        ];
        let split = VolumeSplit::over(&candles, 10);
        assert_eq!(split.green, 30.0);
        assert_eq!(split.red, 70.0);
        assert!((directional_volume_ratio(&candles, 10) - 0.3).abs() < 1e-12);
        assert!((split.red_ratio() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_volume_ratio_zero_volume_is_zero() {
        let candles = vec![candle_at(0, 100.0, 102.0, 99.0, 101.0, 0.0)];
        assert_eq!(directional_volume_ratio(&candles, 10), 0.0);
        assert_eq!(VolumeSplit::over(&candles, 10).red_ratio(), 0.0);
    }

    #[test]
    fn test_rejection_wicks() {
        // hammer: body 0.5, lower wick 7, range 8.5
        let hammer = candle_at(0, 100.0, 101.5, 93.0, 100.5, 1.0);
        assert!(is_bullish_rejection(&hammer));
        assert!(!is_bearish_rejection(&hammer));

        // shooting star: body 0.5, upper wick 7, range 8.5
        let star = candle_at(0, 100.5, 107.5, 99.0, 100.0, 1.0);
        assert!(is_bearish_rejection(&star));
        assert!(!is_bullish_rejection(&star));
    }

    #[test]
    fn test_zero_range_candle_never_rejects() {
        let flat = candle_at(0, 100.0, 100.0, 100.0, 100.0, 1.0);
        assert!(!is_bullish_rejection(&flat));
        assert!(!is_bearish_rejection(&flat));
    }

    #[test]
    fn test_mean_close_change() {
        let candles: Vec<Candle> = [100.0, 98.0, 99.0, 97.02]
            .iter()
            .enumerate()
            .map(|(i, &c)| candle_at(i as i64, c, c, c, c, 1.0))
            .collect();
        // -2%, +1.0204%, -2%
        let mean = mean_close_change_pct(&candles, 5).unwrap();
        assert!((mean - (-2.0 + 100.0 / 98.0 - 2.0) / 3.0).abs() < 1e-9);
        assert_eq!(mean_close_change_pct(&candles[..1], 5), None);
    }
}

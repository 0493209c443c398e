// Indicator Engine
// Attaches RSI, EMA and Bollinger fields to a validated candle series

use common::{Candle, CandleSeries, ScanResult, Timeframe};
use serde::{Deserialize, Serialize};
use tracing::trace;

pub const RSI_PERIOD: usize = 14;
pub const EMA_FAST: usize = 9;
pub const EMA_MID: usize = 18;
pub const EMA_LONG: usize = 200;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_MULTIPLIER: f64 = 2.0;

/// A candle plus its derived indicator fields.
///
/// Every derived field is `None` until its window is full; nothing is ever
/// computed from fewer observations than the window asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCandle {
    pub candle: Candle,
    pub rsi: Option<f64>,
    pub ema_9: Option<f64>,
    pub ema_18: Option<f64>,
    pub ema_200: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    /// (close - bb_lower) / close * 100
    pub dist_bb_lower: Option<f64>,
    /// (bb_upper - close) / close * 100
    pub dist_bb_upper: Option<f64>,
}

impl EnrichedCandle {
    pub fn close(&self) -> f64 {
        self.candle.close
    }
}

/// Output of the engine: same candles, same order, with derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<EnrichedCandle>,
}

impl EnrichedSeries {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&EnrichedCandle> {
        self.candles.last()
    }

    /// The trailing `n` records (or all of them when shorter).
    pub fn tail(&self, n: usize) -> &[EnrichedCandle] {
        let start = self.candles.len().saturating_sub(n);
        &self.candles[start..]
    }

    /// Indicator fields still undefined on the latest record.
    pub fn missing_on_latest(&self) -> Vec<&'static str> {
        let Some(latest) = self.latest() else {
            return vec!["candles"];
        };
        let mut missing = Vec::new();
        if latest.rsi.is_none() {
            missing.push("rsi");
        }
        if latest.ema_200.is_none() {
            missing.push("ema_200");
        }
        if latest.bb_middle.is_none() {
            missing.push("bollinger");
        }
        missing
    }
}

/// RSI over a trailing simple mean of clamped gains and losses.
///
/// Index `i` is defined once `period` price deltas exist (`i >= period`).
/// A zero average loss yields exactly 100.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    for i in period..closes.len() {
        // deltas[k] is close[k+1] - close[k]
        let window = &deltas[i - period..i];
        let avg_gain = window.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
        let avg_loss = window.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

        out[i] = Some(if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        });
    }

    out
}

/// EMA with alpha = 2/(span+1), seeded from the first close.
///
/// The recurrence runs from the first record but values are only reported
/// once `span` observations have been folded in.
pub fn ema(closes: &[f64], span: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if span == 0 {
        return out;
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut value = 0.0;

    for (i, &close) in closes.iter().enumerate() {
        value = if i == 0 {
            close
        } else {
            value + alpha * (close - value)
        };
        if i + 1 >= span {
            out[i] = Some(value);
        }
    }

    out
}

/// Simple moving average over full windows only.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        out[i] = Some(window.iter().sum::<f64>() / period as f64);
    }
    out
}

/// Rolling sample standard deviation (n - 1 denominator).
pub fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period < 2 {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
        out[i] = Some(variance.sqrt());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBand {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> Vec<Option<BollingerBand>> {
    sma(closes, period)
        .into_iter()
        .zip(rolling_std(closes, period))
        .map(|(mean, std)| match (mean, std) {
            (Some(middle), Some(std)) => Some(BollingerBand {
                upper: middle + num_std * std,
                middle,
                lower: middle - num_std * std,
            }),
            _ => None,
        })
        .collect()
}

/// Validate a raw series and attach every indicator field.
///
/// Short series are not an error: leading records simply keep `None`
/// fields. Broken series are rejected with an invariant violation.
pub fn enrich(series: &CandleSeries) -> ScanResult<EnrichedSeries> {
    series.validate()?;

    let closes = series.closes();
    let rsi_values = rsi(&closes, RSI_PERIOD);
    let ema_9 = ema(&closes, EMA_FAST);
    let ema_18 = ema(&closes, EMA_MID);
    let ema_200 = ema(&closes, EMA_LONG);
    let bands = bollinger(&closes, BB_PERIOD, BB_STD_MULTIPLIER);

    let candles = series
        .candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let band = bands[i];
            let close = candle.close;
            EnrichedCandle {
                candle: *candle,
                rsi: rsi_values[i],
                ema_9: ema_9[i],
                ema_18: ema_18[i],
                ema_200: ema_200[i],
                bb_upper: band.map(|b| b.upper),
                bb_middle: band.map(|b| b.middle),
                bb_lower: band.map(|b| b.lower),
                dist_bb_lower: band.map(|b| (close - b.lower) / close * 100.0),
                dist_bb_upper: band.map(|b| (b.upper - close) / close * 100.0),
            }
        })
        .collect();

    let enriched = EnrichedSeries {
        symbol: series.symbol.clone(),
        timeframe: series.timeframe,
        candles,
    };

    trace!(
        symbol = %enriched.symbol,
        timeframe = %enriched.timeframe,
        len = enriched.len(),
        missing = ?enriched.missing_on_latest(),
        "series enriched"
    );

    Ok(enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{series_from_closes, zigzag_closes};

    #[test]
    fn test_rsi_warmup_is_undefined() {
        let closes = zigzag_closes(30, 100.0);
        let values = rsi(&closes, RSI_PERIOD);
        assert!(values[..RSI_PERIOD].iter().all(|v| v.is_none()));
        assert!(values[RSI_PERIOD..].iter().all(|v| v.is_some()));
    }

    #[test]
    fn test_rsi_stays_in_bounds() {
        let closes = zigzag_closes(120, 250.0);
        for value in rsi(&closes, RSI_PERIOD).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value), "rsi out of bounds: {}", value);
        }
    }

    #[test]
    fn test_rsi_is_100_without_losses() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let values = rsi(&closes, RSI_PERIOD);
        assert_eq!(values[19], Some(100.0));
    }

    #[test]
    fn test_rsi_is_0_without_gains() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let values = rsi(&closes, RSI_PERIOD);
        assert_eq!(values[19], Some(0.0));
    }

    #[test]
    fn test_rsi_uses_simple_mean_of_window() {
        // 7 gains of 2 and 7 losses of 1 inside the window: RS = 2, RSI = 66.67
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let value = rsi(&closes, RSI_PERIOD)[14].unwrap();
        assert!((value - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_matches_recurrence_seeded_from_first_close() {
        // alpha = 0.5 for span 3
        let values = ema(&[10.0, 11.0, 12.0, 13.0], 3);
        assert_eq!(values, vec![None, None, Some(11.25), Some(12.125)]);
    }

    #[test]
    fn test_ema_of_constant_series_is_constant() {
        let closes = vec![42.5; 250];
        for span in [EMA_FAST, EMA_MID, EMA_LONG] {
            for value in ema(&closes, span).into_iter().flatten() {
                assert_eq!(value, 42.5);
            }
        }
    }

    #[test]
    fn test_ema_200_needs_200_points() {
        let closes = zigzag_closes(199, 100.0);
        assert!(ema(&closes, EMA_LONG).iter().all(|v| v.is_none()));

        let closes = zigzag_closes(200, 100.0);
        let values = ema(&closes, EMA_LONG);
        assert!(values[198].is_none());
        assert!(values[199].is_some());
    }

    #[test]
    fn test_bollinger_uses_sample_std() {
        let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let band = bollinger(&closes, BB_PERIOD, BB_STD_MULTIPLIER)[19].unwrap();
        // sample std of 1..=20 is sqrt(35)
        let expected_std = 35.0_f64.sqrt();
        assert!((band.middle - 10.5).abs() < 1e-12);
        assert!((band.upper - (10.5 + 2.0 * expected_std)).abs() < 1e-9);
        assert!((band.lower - (10.5 - 2.0 * expected_std)).abs() < 1e-9);
    }

    #[test]
    fn test_bands_are_ordered() {
        let closes = zigzag_closes(80, 30.0);
        for band in bollinger(&closes, BB_PERIOD, BB_STD_MULTIPLIER).into_iter().flatten() {
            assert!(band.lower <= band.middle && band.middle <= band.upper);
        }
    }

    #[test]
    fn test_enrich_keeps_order_and_attaches_distances() {
        let series = series_from_closes("BTC/USDT", Timeframe::H4, &zigzag_closes(220, 100.0));
        let enriched = enrich(&series).unwrap();

        assert_eq!(enriched.len(), 220);
        for (raw, rich) in series.candles.iter().zip(&enriched.candles) {
            assert_eq!(*raw, rich.candle);
        }

        let latest = enriched.latest().unwrap();
        assert!(enriched.missing_on_latest().is_empty());
        let lower = latest.bb_lower.unwrap();
        let expected = (latest.close() - lower) / latest.close() * 100.0;
        assert_eq!(latest.dist_bb_lower, Some(expected));
    }

    #[test]
    fn test_enrich_short_series_reports_missing_fields() {
        let series = series_from_closes("BTC/USDT", Timeframe::D1, &zigzag_closes(30, 100.0));
        let enriched = enrich(&series).unwrap();
        assert_eq!(enriched.missing_on_latest(), vec!["ema_200"]);
        assert!(enriched.candles[0].rsi.is_none());
    }

    #[test]
    fn test_enrich_rejects_broken_series() {
        let mut series = series_from_closes("BTC/USDT", Timeframe::H4, &zigzag_closes(30, 100.0));
        series.candles.swap(3, 4);
        let err = enrich(&series).unwrap_err();
        assert!(err.is_fatal());
    }
}

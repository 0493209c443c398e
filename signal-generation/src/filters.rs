// Confluence filters
// Each step either adjusts the score or vetoes the setup outright

use common::{Candle, ScanError, ScanResult, Timeframe};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{AnalyzerConfig, ScorerConfig};
use crate::indicators::EnrichedSeries;
use crate::signals::{Direction, MultiTimeframeSnapshot, RsiSnapshot};
use crate::structure::{
    bearish_divergence, bullish_divergence, classify_structure, is_bearish_rejection,
    is_bullish_rejection, mean_close_change_pct, MarketStructure, VolumeSplit,
};

const EMA_ALIGNED_POINTS: i32 = 3;
const EMA_CAUTION_PENALTY: i32 = -2;
const STRUCTURE_TREND_POINTS: i32 = 2;
const STRUCTURE_RANGE_POINTS: i32 = 1;
const RSI_EXTREME_POINTS: i32 = 2;
const RSI_GATE_POINTS: i32 = 1;
const DIVERGENCE_POINTS: i32 = 3;
const VOLUME_AGAINST_PENALTY: i32 = -2;
const VOLUME_WITH_POINTS: i32 = 1;
const WICK_POINTS: i32 = 2;
const BAND_POINTS: i32 = 2;
const DAILY_RSI_POINTS: i32 = 2;
const DAILY_TREND_POINTS: i32 = 1;
const KNIFE_PENALTY: i32 = -1;

/// Latest daily values used for higher-timeframe confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyReading {
    pub close: f64,
    pub rsi: Option<f64>,
    pub ema_200: Option<f64>,
}

/// Everything the filters look at, computed once per snapshot and shared by
/// the LONG and SHORT evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketReading {
    pub symbol: String,
    pub close: f64,
    pub rsi: RsiSnapshot,
    pub ema_200: f64,
    pub bb_middle: f64,
    pub dist_bb_lower: f64,
    pub dist_bb_upper: f64,
    pub structure: MarketStructure,
    pub bullish_divergence: bool,
    pub bearish_divergence: bool,
    pub volume: VolumeSplit,
    pub bullish_wick: bool,
    pub bearish_wick: bool,
    /// Mean per-candle close change over the knife window, percent
    pub recent_change_pct: Option<f64>,
    pub daily: Option<DailyReading>,
}

impl MarketReading {
    /// Analyze a snapshot. The 4h series must be present and non-empty;
    /// its latest record must carry RSI, EMA200 and Bollinger values.
    pub fn from_snapshot(
        snapshot: &MultiTimeframeSnapshot,
        config: &AnalyzerConfig,
    ) -> ScanResult<Self> {
        let symbol = snapshot.symbol.as_str();
        let series = snapshot.four_hour().ok_or_else(|| {
            ScanError::invariant(symbol, Timeframe::H4, "4h series missing from snapshot")
        })?;
        let latest = series.latest().ok_or_else(|| {
            ScanError::invariant(symbol, Timeframe::H4, "4h series has no candles")
        })?;

        let (Some(rsi_4h), Some(ema_200), Some(bb_middle), Some(dist_bb_lower), Some(dist_bb_upper)) = (
            latest.rsi,
            latest.ema_200,
            latest.bb_middle,
            latest.dist_bb_lower,
            latest.dist_bb_upper,
        ) else {
            return Err(ScanError::insufficient(
                symbol,
                Timeframe::H4,
                format!("latest candle lacks {}", series.missing_on_latest().join(", ")),
            ));
        };

        let candles: Vec<Candle> = series.candles.iter().map(|c| c.candle).collect();

        Ok(Self {
            symbol: symbol.to_string(),
            close: latest.close(),
            rsi: RsiSnapshot {
                h1: latest_rsi(snapshot.hourly()),
                h4: Some(rsi_4h),
                d1: latest_rsi(snapshot.daily()),
            },
            ema_200,
            bb_middle,
            dist_bb_lower,
            dist_bb_upper,
            structure: classify_structure(&candles, config.structure_lookback),
            bullish_divergence: bullish_divergence(&series.candles, config.divergence_lookback),
            bearish_divergence: bearish_divergence(&series.candles, config.divergence_lookback),
            volume: VolumeSplit::over(&candles, config.volume_lookback),
            bullish_wick: is_bullish_rejection(&latest.candle),
            bearish_wick: is_bearish_rejection(&latest.candle),
            recent_change_pct: mean_close_change_pct(&candles, config.knife_window),
            daily: snapshot.daily().and_then(|s| s.latest()).map(|d| DailyReading {
                close: d.close(),
                rsi: d.rsi,
                ema_200: d.ema_200,
            }),
        })
    }
}

fn latest_rsi(series: Option<&EnrichedSeries>) -> Option<f64> {
    series.and_then(|s| s.latest()).and_then(|c| c.rsi)
}

/// One stage of the confluence evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStep {
    /// Veto when price sits too far on the wrong side of EMA200
    Trend,
    /// Veto against the prevailing 4h structure
    Structure,
    /// Veto unless 4h RSI is stretched in the trade's favour
    Momentum,
    Divergence,
    Volume,
    RejectionWick,
    BandProximity,
    /// Daily RSI and daily EMA200 context, skipped without daily data
    HigherTimeframe,
    /// Veto when the last few candles move too violently against the trade
    FallingKnife,
    ScoreGate,
}

impl FilterStep {
    pub fn name(&self) -> &'static str {
        match self {
            FilterStep::Trend => "trend",
            FilterStep::Structure => "structure",
            FilterStep::Momentum => "momentum",
            FilterStep::Divergence => "divergence",
            FilterStep::Volume => "volume",
            FilterStep::RejectionWick => "rejection_wick",
            FilterStep::BandProximity => "band_proximity",
            FilterStep::HigherTimeframe => "higher_timeframe",
            FilterStep::FallingKnife => "falling_knife",
            FilterStep::ScoreGate => "score_gate",
        }
    }

    /// Evaluate this step given the score accumulated so far.
    pub fn evaluate(&self, ctx: &StepContext<'_>, score: i32) -> StepOutcome {
        match self {
            FilterStep::Trend => trend(ctx),
            FilterStep::Structure => structure(ctx),
            FilterStep::Momentum => momentum(ctx),
            FilterStep::Divergence => divergence(ctx),
            FilterStep::Volume => volume(ctx),
            FilterStep::RejectionWick => rejection_wick(ctx),
            FilterStep::BandProximity => band_proximity(ctx),
            FilterStep::HigherTimeframe => higher_timeframe(ctx),
            FilterStep::FallingKnife => falling_knife(ctx),
            FilterStep::ScoreGate => score_gate(ctx, score),
        }
    }
}

impl fmt::Display for FilterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Evaluation order. Vetoes short-circuit everything after them, so the
/// position of each step changes which setups survive.
pub const CONFLUENCE_PIPELINE: [FilterStep; 10] = [
    FilterStep::Trend,
    FilterStep::Structure,
    FilterStep::Momentum,
    FilterStep::Divergence,
    FilterStep::Volume,
    FilterStep::RejectionWick,
    FilterStep::BandProximity,
    FilterStep::HigherTimeframe,
    FilterStep::FallingKnife,
    FilterStep::ScoreGate,
];

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Continue { delta: i32, reasons: Vec<String> },
    Reject(String),
}

impl StepOutcome {
    pub fn pass() -> Self {
        StepOutcome::Continue {
            delta: 0,
            reasons: Vec::new(),
        }
    }

    fn adjust(delta: i32, reason: String) -> Self {
        StepOutcome::Continue {
            delta,
            reasons: vec![reason],
        }
    }
}

/// A reading viewed from one direction.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub direction: Direction,
    pub reading: &'a MarketReading,
    pub config: &'a ScorerConfig,
}

impl StepContext<'_> {
    /// Re-sign a price move so that positive hurts the trade.
    fn against(&self, value: f64) -> f64 {
        match self.direction {
            Direction::Long => -value,
            Direction::Short => value,
        }
    }

    fn rsi_4h(&self) -> f64 {
        self.reading.rsi.h4.unwrap_or(50.0)
    }
}

fn trend(ctx: &StepContext<'_>) -> StepOutcome {
    let r = ctx.reading;
    let against = ctx.against((r.close - r.ema_200) / r.ema_200 * 100.0);
    let (bad_side, good_side) = match ctx.direction {
        Direction::Long => ("below", "above"),
        Direction::Short => ("above", "below"),
    };

    if against > ctx.config.ema_veto_pct {
        StepOutcome::Reject(format!(
            "Price {:.1}% {} EMA200 (limit {:.1}%)",
            against, bad_side, ctx.config.ema_veto_pct
        ))
    } else if against >= 0.0 {
        StepOutcome::adjust(
            EMA_CAUTION_PENALTY,
            format!("Caution: price {:.1}% {} EMA200", against, bad_side),
        )
    } else {
        StepOutcome::adjust(
            EMA_ALIGNED_POINTS,
            format!("Price {:.1}% {} EMA200", -against, good_side),
        )
    }
}

fn structure(ctx: &StepContext<'_>) -> StepOutcome {
    let current = ctx.reading.structure;
    let (with, against) = match ctx.direction {
        Direction::Long => (MarketStructure::Uptrend, MarketStructure::Downtrend),
        Direction::Short => (MarketStructure::Downtrend, MarketStructure::Uptrend),
    };

    if current == against {
        StepOutcome::Reject(format!(
            "Structure {} over last {} 4h candles",
            current, ctx.config.analyzer.structure_lookback
        ))
    } else if current == with {
        StepOutcome::adjust(STRUCTURE_TREND_POINTS, format!("Structure {} (4h)", current))
    } else {
        StepOutcome::adjust(STRUCTURE_RANGE_POINTS, format!("Structure {} (4h)", current))
    }
}

fn momentum(ctx: &StepContext<'_>) -> StepOutcome {
    let rsi = ctx.rsi_4h();
    let gate = ctx.config.rsi_gate;
    let extreme = ctx.config.rsi_extreme;

    match ctx.direction {
        Direction::Long => {
            if rsi < extreme {
                StepOutcome::adjust(RSI_EXTREME_POINTS, format!("RSI 4h={:.1} (deeply oversold)", rsi))
            } else if rsi < gate {
                StepOutcome::adjust(RSI_GATE_POINTS, format!("RSI 4h={:.1} (oversold)", rsi))
            } else {
                StepOutcome::Reject(format!("RSI 4h={:.1} not oversold (needs < {:.0})", rsi, gate))
            }
        }
        Direction::Short => {
            if rsi > 100.0 - extreme {
                StepOutcome::adjust(RSI_EXTREME_POINTS, format!("RSI 4h={:.1} (deeply overbought)", rsi))
            } else if rsi > 100.0 - gate {
                StepOutcome::adjust(RSI_GATE_POINTS, format!("RSI 4h={:.1} (overbought)", rsi))
            } else {
                StepOutcome::Reject(format!(
                    "RSI 4h={:.1} not overbought (needs > {:.0})",
                    rsi,
                    100.0 - gate
                ))
            }
        }
    }
}

fn divergence(ctx: &StepContext<'_>) -> StepOutcome {
    match ctx.direction {
        Direction::Long if ctx.reading.bullish_divergence => {
            StepOutcome::adjust(DIVERGENCE_POINTS, "Bullish RSI divergence (4h)".to_string())
        }
        Direction::Short if ctx.reading.bearish_divergence => {
            StepOutcome::adjust(DIVERGENCE_POINTS, "Bearish RSI divergence (4h)".to_string())
        }
        _ => StepOutcome::pass(),
    }
}

fn volume(ctx: &StepContext<'_>) -> StepOutcome {
    let split = ctx.reading.volume;
    let (ratio, side, opposing) = match ctx.direction {
        Direction::Long => (split.green_ratio(), "buy", "Selling"),
        Direction::Short => (split.red_ratio(), "sell", "Buying"),
    };
    let pct = ratio * 100.0;

    if ratio < ctx.config.volume_weak_ratio {
        StepOutcome::adjust(
            VOLUME_AGAINST_PENALTY,
            format!("{} pressure dominates ({} volume {:.0}%)", opposing, side, pct),
        )
    } else if ratio < ctx.config.volume_strong_ratio {
        StepOutcome::adjust(0, format!("Neutral volume ({} volume {:.0}%)", side, pct))
    } else {
        StepOutcome::adjust(
            VOLUME_WITH_POINTS,
            format!(
                "Volume confirms ({} volume {:.0}% over last {} candles)",
                side, pct, ctx.config.analyzer.volume_lookback
            ),
        )
    }
}

fn rejection_wick(ctx: &StepContext<'_>) -> StepOutcome {
    match ctx.direction {
        Direction::Long if ctx.reading.bullish_wick => {
            StepOutcome::adjust(WICK_POINTS, "Bullish rejection wick on latest 4h candle".to_string())
        }
        Direction::Short if ctx.reading.bearish_wick => {
            StepOutcome::adjust(WICK_POINTS, "Bearish rejection wick on latest 4h candle".to_string())
        }
        _ => StepOutcome::pass(),
    }
}

fn band_proximity(ctx: &StepContext<'_>) -> StepOutcome {
    let (distance, band) = match ctx.direction {
        Direction::Long => (ctx.reading.dist_bb_lower, "lower"),
        Direction::Short => (ctx.reading.dist_bb_upper, "upper"),
    };
    if distance < ctx.config.band_distance_pct {
        StepOutcome::adjust(
            BAND_POINTS,
            format!("Price {:.1}% from {} Bollinger band", distance, band),
        )
    } else {
        StepOutcome::pass()
    }
}

fn higher_timeframe(ctx: &StepContext<'_>) -> StepOutcome {
    let Some(daily) = ctx.reading.daily else {
        return StepOutcome::pass();
    };

    let mut delta = 0;
    let mut reasons = Vec::new();

    if let Some(rsi) = daily.rsi {
        let confirms = match ctx.direction {
            Direction::Long => rsi < ctx.config.daily_rsi,
            Direction::Short => rsi > 100.0 - ctx.config.daily_rsi,
        };
        if confirms {
            delta += DAILY_RSI_POINTS;
            reasons.push(format!("RSI 1d={:.1} confirms", rsi));
        }
    }

    if let Some(ema) = daily.ema_200 {
        let aligned = match ctx.direction {
            Direction::Long => daily.close > ema,
            Direction::Short => daily.close < ema,
        };
        let side = if daily.close > ema { "above" } else { "below" };
        if aligned {
            delta += DAILY_TREND_POINTS;
            reasons.push(format!("Daily close {} EMA200", side));
        } else {
            delta -= DAILY_TREND_POINTS;
            reasons.push(format!("Daily close {} EMA200 (against trade)", side));
        }
    }

    StepOutcome::Continue { delta, reasons }
}

fn falling_knife(ctx: &StepContext<'_>) -> StepOutcome {
    let Some(change) = ctx.reading.recent_change_pct else {
        return StepOutcome::pass();
    };
    let against = ctx.against(change);
    let label = match ctx.direction {
        Direction::Long => "Falling knife",
        Direction::Short => "Violent rally",
    };

    if against > ctx.config.knife_veto_pct {
        StepOutcome::Reject(format!(
            "{}: average {:+.2}% per candle over last {} 4h candles",
            label, change, ctx.config.analyzer.knife_window
        ))
    } else if against > ctx.config.knife_penalty_pct {
        StepOutcome::adjust(
            KNIFE_PENALTY,
            format!("Strong momentum against trade ({:+.2}% per candle)", change),
        )
    } else {
        StepOutcome::pass()
    }
}

fn score_gate(ctx: &StepContext<'_>, score: i32) -> StepOutcome {
    let minimum = match ctx.direction {
        Direction::Long => ctx.config.min_score_long,
        Direction::Short => ctx.config.min_score_short,
    };
    if score < minimum {
        StepOutcome::Reject(format!(
            "Score {} below minimum {} (short by {})",
            score,
            minimum,
            minimum - score
        ))
    } else {
        StepOutcome::pass()
    }
}

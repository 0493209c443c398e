//! Scoring thresholds
//!
//! Every magnitude the confluence filters compare against lives here so it
//! can be tuned from the scanner's TOML file. Point weights stay fixed in
//! `filters.rs`.

use common::Timeframe;
use serde::{Deserialize, Serialize};

/// Window sizes for the market structure analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Candles used for higher-high / lower-low counting
    #[serde(default = "default_structure_lookback")]
    pub structure_lookback: usize,

    /// Candles searched for RSI divergence pivots
    #[serde(default = "default_divergence_lookback")]
    pub divergence_lookback: usize,

    /// Candles used for the green/red volume split
    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: usize,

    /// Candles used for the falling-knife / violent-rally guard
    #[serde(default = "default_knife_window")]
    pub knife_window: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            structure_lookback: 10,
            divergence_lookback: 20,
            volume_lookback: 10,
            knife_window: 5,
        }
    }
}

fn default_structure_lookback() -> usize {
    10
}

fn default_divergence_lookback() -> usize {
    20
}

fn default_volume_lookback() -> usize {
    10
}

fn default_knife_window() -> usize {
    5
}

/// Thresholds for the LONG evaluation. SHORT mirrors them (RSI around 100,
/// percentages with the sign flipped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Loaded from its own `[structure]` section
    #[serde(skip)]
    pub analyzer: AnalyzerConfig,

    /// Distance beyond EMA200 (percent, against the trade) that vetoes outright
    #[serde(default = "default_ema_veto_pct")]
    pub ema_veto_pct: f64,

    /// 4h RSI must be below this for LONG (above 100 - this for SHORT)
    #[serde(default = "default_rsi_gate")]
    pub rsi_gate: f64,

    /// 4h RSI below this scores the stronger momentum bonus
    #[serde(default = "default_rsi_extreme")]
    pub rsi_extreme: f64,

    /// Green-volume share below this is dominant selling pressure
    #[serde(default = "default_volume_weak_ratio")]
    pub volume_weak_ratio: f64,

    /// Green-volume share at or above this scores a bonus
    #[serde(default = "default_volume_strong_ratio")]
    pub volume_strong_ratio: f64,

    /// Distance to the relevant Bollinger band (percent) that counts as "at the band"
    #[serde(default = "default_band_distance_pct")]
    pub band_distance_pct: f64,

    /// Daily RSI below this confirms a LONG (above 100 - this for SHORT)
    #[serde(default = "default_daily_rsi")]
    pub daily_rsi: f64,

    /// Mean per-candle move (percent) against the trade that vetoes outright
    #[serde(default = "default_knife_veto_pct")]
    pub knife_veto_pct: f64,

    /// Mean per-candle move (percent) against the trade that costs a point
    #[serde(default = "default_knife_penalty_pct")]
    pub knife_penalty_pct: f64,

    #[serde(default = "default_min_score")]
    pub min_score_long: i32,

    #[serde(default = "default_min_score")]
    pub min_score_short: i32,

    /// Stop distance from entry, percent
    #[serde(default = "default_stop_pct")]
    pub stop_pct: f64,

    /// Fixed target distance from entry, percent
    #[serde(default = "default_target_pct")]
    pub target_pct: f64,

    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            ema_veto_pct: 5.0,
            rsi_gate: 30.0,
            rsi_extreme: 25.0,
            volume_weak_ratio: 0.3,
            volume_strong_ratio: 0.4,
            band_distance_pct: 2.0,
            daily_rsi: 35.0,
            knife_veto_pct: 2.0,
            knife_penalty_pct: 1.0,
            min_score_long: 8,
            min_score_short: 8,
            stop_pct: 3.0,
            target_pct: 6.0,
            min_risk_reward: 1.5,
        }
    }
}

fn default_ema_veto_pct() -> f64 {
    5.0
}

fn default_rsi_gate() -> f64 {
    30.0
}

fn default_rsi_extreme() -> f64 {
    25.0
}

fn default_volume_weak_ratio() -> f64 {
    0.3
}

fn default_volume_strong_ratio() -> f64 {
    0.4
}

fn default_band_distance_pct() -> f64 {
    2.0
}

fn default_daily_rsi() -> f64 {
    35.0
}

fn default_knife_veto_pct() -> f64 {
    2.0
}

fn default_knife_penalty_pct() -> f64 {
    1.0
}

fn default_min_score() -> i32 {
    8
}

fn default_stop_pct() -> f64 {
    3.0
}

fn default_target_pct() -> f64 {
    6.0
}

fn default_min_risk_reward() -> f64 {
    1.5
}

/// Data requirements and delivery policy for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Timeframes fetched per instrument; 4h is always required
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Series shorter than this are dropped before enrichment
    #[serde(default = "default_min_candles")]
    pub min_candles: usize,

    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,

    /// Total attempts per fetch, including the first
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeframes: default_timeframes(),
            fetch_limit: default_fetch_limit(),
            min_candles: default_min_candles(),
            cooldown_hours: default_cooldown_hours(),
            fetch_attempts: default_fetch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl EvaluatorConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours)
    }
}

fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::ALL.to_vec()
}

fn default_fetch_limit() -> usize {
    250
}

fn default_min_candles() -> usize {
    200
}

fn default_cooldown_hours() -> i64 {
    6
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

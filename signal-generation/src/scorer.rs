// Confluence Scorer
// Runs the ordered filter steps for one direction and builds the trade plan

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ScanResult, Timeframe};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::config::ScorerConfig;
use crate::filters::{FilterStep, MarketReading, StepContext, StepOutcome, CONFLUENCE_PIPELINE};
use crate::signals::{
    Direction, HeuristicSignal, MultiTimeframeSnapshot, SignalDetector, TradeSignal,
};

const PRICE_DP: u32 = 8;
const RATIO_DP: u32 = 2;

/// Where an evaluation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    Filter(FilterStep),
    /// Trade plan could not be built, or its ratio is below the minimum
    RiskReward,
}

impl fmt::Display for RejectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionStage::Filter(step) => write!(f, "{}", step),
            RejectionStage::RiskReward => f.write_str("risk_reward"),
        }
    }
}

/// A quiet, expected "no setup" result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub symbol: String,
    pub direction: Direction,
    pub stage: RejectionStage,
    pub reason: String,
    /// Score accumulated before the rejecting step
    pub score: i32,
    /// Reasons collected before the rejecting step
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Accepted(HeuristicSignal),
    Rejected(Rejection),
}

impl ScoreOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ScoreOutcome::Accepted(_))
    }

    pub fn signal(&self) -> Option<&HeuristicSignal> {
        match self {
            ScoreOutcome::Accepted(signal) => Some(signal),
            ScoreOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ScoreOutcome::Accepted(_) => None,
            ScoreOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Entry, stop and target for a setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradePlan {
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Unrounded reward over risk, signed so a target on the losing side is negative
    pub risk_reward: Decimal,
}

/// Build the plan from the latest 4h close and Bollinger middle band.
///
/// The target is whichever of the middle band and the fixed percentage
/// target is closer to entry. Returns `None` when a price cannot be
/// represented or the stop distance is not positive.
pub fn build_trade_plan(
    direction: Direction,
    close: f64,
    bb_middle: f64,
    config: &ScorerConfig,
) -> Option<TradePlan> {
    let entry = Decimal::from_f64(close)?.round_dp(PRICE_DP);
    let middle = Decimal::from_f64(bb_middle)?;
    let stop_frac = Decimal::from_f64(config.stop_pct)? / Decimal::ONE_HUNDRED;
    let target_frac = Decimal::from_f64(config.target_pct)? / Decimal::ONE_HUNDRED;

    let (stop_loss, take_profit) = match direction {
        Direction::Long => (
            entry * (Decimal::ONE - stop_frac),
            (entry * (Decimal::ONE + target_frac)).min(middle),
        ),
        Direction::Short => (
            entry * (Decimal::ONE + stop_frac),
            (entry * (Decimal::ONE - target_frac)).max(middle),
        ),
    };
    let stop_loss = stop_loss.round_dp(PRICE_DP);
    let take_profit = take_profit.round_dp(PRICE_DP);

    let (reward, risk) = match direction {
        Direction::Long => (take_profit - entry, entry - stop_loss),
        Direction::Short => (entry - take_profit, stop_loss - entry),
    };
    if risk <= Decimal::ZERO {
        return None;
    }

    Some(TradePlan {
        entry,
        stop_loss,
        take_profit,
        risk_reward: reward.checked_div(risk)?,
    })
}

/// Deterministic confluence scorer. Pure: no I/O, no hidden clock.
#[derive(Debug, Clone)]
pub struct ConfluenceScorer {
    config: ScorerConfig,
    steps: Vec<FilterStep>,
}

impl ConfluenceScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            steps: CONFLUENCE_PIPELINE.to_vec(),
        }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn steps(&self) -> &[FilterStep] {
        &self.steps
    }

    /// Analyze a snapshot into the reading both directions share.
    pub fn read(&self, snapshot: &MultiTimeframeSnapshot) -> ScanResult<MarketReading> {
        MarketReading::from_snapshot(snapshot, &self.config.analyzer)
    }

    /// Evaluate one direction on a snapshot.
    pub fn evaluate(
        &self,
        snapshot: &MultiTimeframeSnapshot,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> ScanResult<ScoreOutcome> {
        let reading = self.read(snapshot)?;
        Ok(self.score(&reading, direction, now))
    }

    /// Evaluate LONG then SHORT. The two runs never influence each other.
    pub fn evaluate_both(
        &self,
        snapshot: &MultiTimeframeSnapshot,
        now: DateTime<Utc>,
    ) -> ScanResult<Vec<ScoreOutcome>> {
        let reading = self.read(snapshot)?;
        Ok(Direction::BOTH
            .iter()
            .map(|&direction| self.score(&reading, direction, now))
            .collect())
    }

    /// Run the filter steps in order, stopping at the first veto.
    pub fn score(
        &self,
        reading: &MarketReading,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> ScoreOutcome {
        let ctx = StepContext {
            direction,
            reading,
            config: &self.config,
        };

        let mut score = 0;
        let mut reasons = Vec::new();

        for step in &self.steps {
            match step.evaluate(&ctx, score) {
                StepOutcome::Continue { delta, reasons: step_reasons } => {
                    score += delta;
                    reasons.extend(step_reasons);
                }
                StepOutcome::Reject(reason) => {
                    return self.reject(reading, direction, RejectionStage::Filter(*step), reason, score, reasons);
                }
            }
        }

        let Some(plan) = build_trade_plan(direction, reading.close, reading.bb_middle, &self.config) else {
            let reason = format!(
                "No valid trade plan (close {}, bb_middle {}, stop {}%)",
                reading.close, reading.bb_middle, self.config.stop_pct
            );
            return self.reject(reading, direction, RejectionStage::RiskReward, reason, score, reasons);
        };

        let ratio = plan.risk_reward.to_f64().unwrap_or(f64::MIN);
        if ratio < self.config.min_risk_reward {
            let reason = format!(
                "Risk/reward {} below minimum {}",
                plan.risk_reward.round_dp(RATIO_DP),
                self.config.min_risk_reward
            );
            return self.reject(reading, direction, RejectionStage::RiskReward, reason, score, reasons);
        }

        ScoreOutcome::Accepted(HeuristicSignal {
            symbol: reading.symbol.clone(),
            direction,
            timeframe: Timeframe::H4,
            score,
            entry_price: plan.entry,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            risk_reward: plan.risk_reward.round_dp(RATIO_DP),
            structure: reading.structure,
            reasons,
            rsi: reading.rsi,
            created_at: now,
        })
    }

    fn reject(
        &self,
        reading: &MarketReading,
        direction: Direction,
        stage: RejectionStage,
        reason: String,
        score: i32,
        reasons: Vec<String>,
    ) -> ScoreOutcome {
        debug!(
            symbol = %reading.symbol,
            direction = %direction,
            stage = %stage,
            score,
            reason = %reason,
            "setup rejected"
        );
        ScoreOutcome::Rejected(Rejection {
            symbol: reading.symbol.clone(),
            direction,
            stage,
            reason,
            score,
            reasons,
        })
    }
}

impl Default for ConfluenceScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

/// Heuristic detection path: the confluence scorer in both directions.
pub struct ConfluenceDetector {
    scorer: ConfluenceScorer,
    clock: Arc<dyn Clock>,
}

impl ConfluenceDetector {
    pub fn new(scorer: ConfluenceScorer, clock: Arc<dyn Clock>) -> Self {
        Self { scorer, clock }
    }

    pub fn scorer(&self) -> &ConfluenceScorer {
        &self.scorer
    }
}

#[async_trait]
impl SignalDetector for ConfluenceDetector {
    async fn detect(&self, snapshot: &MultiTimeframeSnapshot) -> ScanResult<Vec<TradeSignal>> {
        let outcomes = self.scorer.evaluate_both(snapshot, self.clock.now())?;
        Ok(outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                ScoreOutcome::Accepted(signal) => Some(TradeSignal::Heuristic(signal)),
                ScoreOutcome::Rejected(_) => None,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "confluence"
    }
}

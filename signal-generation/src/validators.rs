// Signal Validators
// Last checks on a trade plan before it is claimed and delivered

use super::signals::{Direction, TradeSignal};
use anyhow::Result;
use rust_decimal::prelude::*;
use tracing::debug;

/// Trait for signal validators
#[async_trait::async_trait]
pub trait SignalValidator: Send + Sync {
    async fn validate(&self, signal: &TradeSignal) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// Stop on the losing side of entry, target on the winning side, every
/// price positive.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanCoherenceValidator;

impl PlanCoherenceValidator {
    pub fn is_coherent(direction: Direction, entry: Decimal, stop: Decimal, target: Decimal) -> bool {
        if entry <= Decimal::ZERO || stop <= Decimal::ZERO || target <= Decimal::ZERO {
            return false;
        }
        match direction {
            Direction::Long => stop < entry && entry < target,
            Direction::Short => target < entry && entry < stop,
        }
    }
}

#[async_trait::async_trait]
impl SignalValidator for PlanCoherenceValidator {
    async fn validate(&self, signal: &TradeSignal) -> Result<bool> {
        let passes = Self::is_coherent(
            signal.direction(),
            signal.entry_price(),
            signal.stop_loss(),
            signal.take_profit(),
        );
        debug!(
            "Plan coherence for {} {}: entry {} stop {} target {} => {}",
            signal.symbol(),
            signal.direction(),
            signal.entry_price(),
            signal.stop_loss(),
            signal.take_profit(),
            passes
        );
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "plan_coherence"
    }
}

/// Configuration for risk/reward validator
#[derive(Debug, Clone)]
pub struct RiskRewardConfig {
    pub min_risk_reward: Decimal,
}

impl Default for RiskRewardConfig {
    fn default() -> Self {
        Self {
            min_risk_reward: Decimal::new(15, 1), // 1.5
        }
    }
}

/// Recomputes reward over risk from the plan prices rather than trusting
/// the reported ratio.
pub struct RiskRewardValidator {
    config: RiskRewardConfig,
}

impl RiskRewardValidator {
    pub fn new(config: RiskRewardConfig) -> Self {
        Self { config }
    }

    pub fn ratio(signal: &TradeSignal) -> Option<Decimal> {
        let risk = -signal.risk_pct();
        if risk <= Decimal::ZERO {
            return None;
        }
        signal.reward_pct().checked_div(risk)
    }
}

impl Default for RiskRewardValidator {
    fn default() -> Self {
        Self::new(RiskRewardConfig::default())
    }
}

#[async_trait::async_trait]
impl SignalValidator for RiskRewardValidator {
    async fn validate(&self, signal: &TradeSignal) -> Result<bool> {
        let ratio = Self::ratio(signal);
        let passes = ratio.is_some_and(|r| r >= self.config.min_risk_reward);
        debug!(
            "Risk/reward for {}: {:?} >= {}? {}",
            signal.symbol(),
            ratio.map(|r| r.round_dp(2)),
            self.config.min_risk_reward,
            passes
        );
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "risk_reward"
    }
}

/// Minimum analyst confidence. Heuristic signals carry a score instead and
/// always pass.
pub struct ConfidenceValidator {
    min_confidence: u8,
}

impl ConfidenceValidator {
    pub fn new(min_confidence: u8) -> Self {
        Self { min_confidence }
    }
}

#[async_trait::async_trait]
impl SignalValidator for ConfidenceValidator {
    async fn validate(&self, signal: &TradeSignal) -> Result<bool> {
        let passes = match signal {
            TradeSignal::Heuristic(_) => true,
            TradeSignal::Analyst(s) => s.confidence >= self.min_confidence,
        };
        debug!("Confidence check for {}: {}", signal.symbol(), passes);
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "confidence"
    }
}

/// Composite validator that requires every inner validator to pass
pub struct CompositeValidator {
    validators: Vec<Box<dyn SignalValidator>>,
}

impl CompositeValidator {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn add(mut self, validator: Box<dyn SignalValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Default for CompositeValidator {
    fn default() -> Self {
        Self::new()
            .add(Box::new(PlanCoherenceValidator))
            .add(Box::new(RiskRewardValidator::default()))
    }
}

#[async_trait::async_trait]
impl SignalValidator for CompositeValidator {
    async fn validate(&self, signal: &TradeSignal) -> Result<bool> {
        for validator in &self.validators {
            if !validator.validate(signal).await? {
                debug!("{} rejected by {}", signal.symbol(), validator.name());
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{AnalystSignal, TradeType};
    use crate::test_support::{at_hour, heuristic_signal};
    use common::Timeframe;
    use rust_decimal_macros::dec;

    fn analyst_signal(confidence: u8) -> TradeSignal {
        TradeSignal::Analyst(AnalystSignal {
            symbol: "SOL/USDT".to_string(),
            direction: Direction::Short,
            timeframe: Timeframe::H1,
            confidence,
            entry_price: dec!(150),
            stop_loss: dec!(155),
            take_profit: dec!(140),
            risk_reward: dec!(2),
            reasoning: vec!["Lower high under resistance".to_string()],
            context: None,
            confluence_factors: Some(4),
            trade_type: Some(TradeType::Scalp),
            created_at: at_hour(0),
        })
    }

    #[test]
    fn test_coherence_rules() {
        assert!(PlanCoherenceValidator::is_coherent(Direction::Long, dec!(100), dec!(97), dec!(105)));
        assert!(!PlanCoherenceValidator::is_coherent(Direction::Long, dec!(100), dec!(101), dec!(105)));
        assert!(!PlanCoherenceValidator::is_coherent(Direction::Long, dec!(100), dec!(97), dec!(99)));
        assert!(PlanCoherenceValidator::is_coherent(Direction::Short, dec!(100), dec!(103), dec!(94)));
        assert!(!PlanCoherenceValidator::is_coherent(Direction::Short, dec!(100), dec!(103), dec!(0)));
    }

    #[tokio::test]
    async fn test_risk_reward_validator() {
        let validator = RiskRewardValidator::default();

        let good = heuristic_signal(Direction::Long, dec!(100), dec!(97), dec!(105));
        assert_eq!(RiskRewardValidator::ratio(&good).map(|r| r.round_dp(2)), Some(dec!(1.67)));
        assert!(validator.validate(&good).await.unwrap());

        let thin = heuristic_signal(Direction::Long, dec!(100), dec!(97), dec!(104));
        assert!(!validator.validate(&thin).await.unwrap());

        let short = analyst_signal(8);
        assert!(validator.validate(&short).await.unwrap());
    }

    #[tokio::test]
    async fn test_confidence_validator() {
        let validator = ConfidenceValidator::new(7);
        assert!(validator.validate(&analyst_signal(8)).await.unwrap());
        assert!(!validator.validate(&analyst_signal(5)).await.unwrap());

        let heuristic = heuristic_signal(Direction::Long, dec!(100), dec!(97), dec!(105));
        assert!(validator.validate(&heuristic).await.unwrap());
    }

    #[tokio::test]
    async fn test_composite_stops_at_first_failure() {
        let composite = CompositeValidator::default();
        assert_eq!(composite.len(), 2);

        let backwards = heuristic_signal(Direction::Long, dec!(100), dec!(103), dec!(94));
        assert!(!composite.validate(&backwards).await.unwrap());

        let fine = heuristic_signal(Direction::Long, dec!(100), dec!(97), dec!(106));
        assert!(composite.validate(&fine).await.unwrap());
    }
}

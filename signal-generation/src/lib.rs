// Signal Generation Framework
// Indicators, market structure, confluence scoring and the scan pipeline

pub mod clock;
pub mod config;
pub mod filters;
pub mod indicators;
pub mod pipeline;
pub mod scorer;
pub mod signals;
pub mod storage;
pub mod structure;
pub mod validators;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AnalyzerConfig, EvaluatorConfig, ScorerConfig};
pub use filters::{DailyReading, FilterStep, MarketReading, StepOutcome, CONFLUENCE_PIPELINE};
pub use indicators::{enrich, EnrichedCandle, EnrichedSeries};
pub use pipeline::{Notifier, ScanSummary, SignalEvaluator};
pub use scorer::{
    build_trade_plan, ConfluenceDetector, ConfluenceScorer, Rejection, RejectionStage, ScoreOutcome,
    TradePlan,
};
pub use signals::{
    AnalystSignal, Direction, HeuristicSignal, MultiTimeframeSnapshot, RsiSnapshot, SignalDetector,
    TradeSignal, TradeType,
};
pub use storage::{InMemoryLedger, SignalLedger};
pub use structure::{MarketStructure, SwingCounts, VolumeSplit};
pub use validators::{
    CompositeValidator, ConfidenceValidator, PlanCoherenceValidator, RiskRewardConfig,
    RiskRewardValidator, SignalValidator,
};

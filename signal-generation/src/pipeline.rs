// Signal Evaluation Pipeline
// Fetch, enrich, detect, validate, dedupe and deliver, one instrument at a time

use super::clock::Clock;
use super::config::EvaluatorConfig;
use super::indicators::enrich;
use super::signals::{Direction, MultiTimeframeSnapshot, SignalDetector, TradeSignal};
use super::storage::SignalLedger;
use super::validators::{CompositeValidator, SignalValidator};
use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{CandleSeries, CandleSource, ScanError, ScanResult, Timeframe};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delivery side of the pipeline. Implementations render and send; they
/// never alter score or price fields.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_signal(&self, signal: &TradeSignal) -> Result<()>;

    async fn send_error(&self, message: &str) -> Result<()>;

    async fn send_summary(&self, summary: &ScanSummary) -> Result<()>;
}

/// Counters for one scan (or several, once absorbed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scans: usize,
    pub instruments: usize,
    /// Insufficient data or exhausted fetch retries
    pub skipped: Vec<String>,
    /// Invariant violations
    pub failed: Vec<String>,
    pub detected: usize,
    pub longs: usize,
    pub shorts: usize,
    pub invalid: usize,
    pub emitted: usize,
    pub suppressed: usize,
    pub delivery_failures: usize,
}

impl ScanSummary {
    fn record_detected(&mut self, signal: &TradeSignal) {
        self.detected += 1;
        match signal.direction() {
            Direction::Long => self.longs += 1,
            Direction::Short => self.shorts += 1,
        }
    }

    /// Fold a later scan into this one.
    pub fn absorb(&mut self, other: &ScanSummary) {
        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.finished_at = match (self.finished_at, other.finished_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.scans += other.scans;
        self.instruments += other.instruments;
        self.skipped.extend(other.skipped.iter().cloned());
        self.failed.extend(other.failed.iter().cloned());
        self.detected += other.detected;
        self.longs += other.longs;
        self.shorts += other.shorts;
        self.invalid += other.invalid;
        self.emitted += other.emitted;
        self.suppressed += other.suppressed;
        self.delivery_failures += other.delivery_failures;
    }
}

/// Signal evaluator
pub struct SignalEvaluator {
    config: EvaluatorConfig,
    source: Arc<dyn CandleSource>,
    detector: Arc<dyn SignalDetector>,
    ledger: Arc<dyn SignalLedger>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    validator: CompositeValidator,
}

impl SignalEvaluator {
    pub fn new(
        config: EvaluatorConfig,
        source: Arc<dyn CandleSource>,
        detector: Arc<dyn SignalDetector>,
        ledger: Arc<dyn SignalLedger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Signal evaluator using {} detector over {} data",
            detector.name(),
            source.name()
        );
        Self {
            config,
            source,
            detector,
            ledger,
            notifier,
            clock,
            validator: CompositeValidator::default(),
        }
    }

    /// Add a signal validator on top of the plan coherence and risk/reward checks
    pub fn add_validator(mut self, validator: Box<dyn SignalValidator>) -> Self {
        info!("Adding signal validator: {}", validator.name());
        self.validator = self.validator.add(validator);
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Scan every instrument sequentially. Per-instrument failures are
    /// logged and counted; nothing here aborts the scan.
    pub async fn scan(&self, watchlist: &[String]) -> ScanSummary {
        let mut summary = ScanSummary {
            started_at: Some(self.clock.now()),
            scans: 1,
            ..ScanSummary::default()
        };
        info!("Scanning {} instruments", watchlist.len());

        for symbol in watchlist {
            summary.instruments += 1;
            match self.evaluate_symbol(symbol).await {
                Ok(signals) => {
                    for signal in signals {
                        summary.record_detected(&signal);
                        self.dispatch(&signal, &mut summary).await;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("Aborting {}: {}", symbol, e);
                    summary.failed.push(symbol.clone());
                }
                Err(e) => {
                    warn!("Skipping {}: {}", symbol, e);
                    summary.skipped.push(symbol.clone());
                }
            }
        }

        summary.finished_at = Some(self.clock.now());
        info!(
            instruments = summary.instruments,
            detected = summary.detected,
            longs = summary.longs,
            shorts = summary.shorts,
            emitted = summary.emitted,
            suppressed = summary.suppressed,
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Scan complete"
        );
        summary
    }

    /// Snapshot and detect for one instrument.
    pub async fn evaluate_symbol(&self, symbol: &str) -> ScanResult<Vec<TradeSignal>> {
        let snapshot = self.snapshot(symbol).await?;
        let signals = self.detector.detect(&snapshot).await?;
        debug!("{}: {} signal(s) from {}", symbol, signals.len(), self.detector.name());
        Ok(signals)
    }

    /// Fetch and enrich every configured timeframe. Optional timeframes that
    /// fail or come back short are dropped; the 4h series is mandatory.
    pub async fn snapshot(&self, symbol: &str) -> ScanResult<MultiTimeframeSnapshot> {
        let mut snapshot = MultiTimeframeSnapshot::new(symbol, self.clock.now());

        for &timeframe in &self.config.timeframes {
            let required = timeframe == Timeframe::H4;

            let series = match self.fetch_with_retry(symbol, timeframe).await {
                Ok(series) => series,
                Err(e) if required => return Err(ScanError::external(symbol, &e)),
                Err(e) => {
                    warn!("Dropping {} {}: {:#}", symbol, timeframe, e);
                    continue;
                }
            };

            if series.len() < self.config.min_candles {
                let detail = format!(
                    "only {} candles (need {})",
                    series.len(),
                    self.config.min_candles
                );
                if required {
                    return Err(ScanError::insufficient(symbol, timeframe, detail));
                }
                debug!("Dropping {} {}: {}", symbol, timeframe, detail);
                continue;
            }

            snapshot.insert(enrich(&series)?);
        }

        if snapshot.four_hour().is_none() {
            return Err(ScanError::insufficient(
                symbol,
                Timeframe::H4,
                "4h timeframe not configured",
            ));
        }
        Ok(snapshot)
    }

    async fn fetch_with_retry(&self, symbol: &str, timeframe: Timeframe) -> Result<CandleSeries> {
        let attempts = self.config.fetch_attempts.max(1);
        let mut delay = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;

        loop {
            match self
                .source
                .fetch_candles(symbol, timeframe, self.config.fetch_limit)
                .await
            {
                Ok(series) => return Ok(series),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Fetch {} {} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        symbol, timeframe, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(&self, signal: &TradeSignal, summary: &mut ScanSummary) {
        match self.validator.validate(signal).await {
            Ok(true) => {}
            Ok(false) => {
                summary.invalid += 1;
                return;
            }
            Err(e) => {
                warn!("Validation error for {}: {:#}", signal.symbol(), e);
                summary.invalid += 1;
                return;
            }
        }

        let key = signal.dedupe_key();
        let claimed = match self
            .ledger
            .try_claim(&key, self.clock.now(), self.config.cooldown())
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("Ledger unavailable for {}: {:#}", key, e);
                summary.delivery_failures += 1;
                return;
            }
        };

        if !claimed {
            info!("{} already sent inside the cooldown, skipping", key);
            summary.suppressed += 1;
            return;
        }

        // the ledger entry stays even if delivery fails
        match self.notifier.send_signal(signal).await {
            Ok(()) => {
                info!("{} signal sent for {}", signal.direction(), signal.symbol());
                summary.emitted += 1;
            }
            Err(e) => {
                error!("Failed to deliver {}: {:#}", key, e);
                summary.delivery_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::InMemoryLedger;
    use crate::test_support::{at_hour, heuristic_signal, series_from_closes, zigzag_closes};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Canned series per (symbol, timeframe); anything else errors.
    #[derive(Default)]
    struct StubSource {
        series: HashMap<(String, Timeframe), CandleSeries>,
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn with(mut self, symbol: &str, timeframe: Timeframe, len: usize) -> Self {
            let series = series_from_closes(symbol, timeframe, &zigzag_closes(len, 100.0));
            self.series.insert((symbol.to_string(), timeframe), series);
            self
        }
    }

    #[async_trait::async_trait]
    impl CandleSource for StubSource {
        async fn fetch_candles(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            _limit: usize,
        ) -> Result<CandleSeries> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                anyhow::bail!("connection reset");
            }
            self.series
                .get(&(symbol.to_string(), timeframe))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no data for {} {}", symbol, timeframe))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    /// Emits one fixed LONG per snapshot and records which timeframes it saw.
    #[derive(Default)]
    struct StubDetector {
        seen: Mutex<Vec<Vec<Timeframe>>>,
    }

    #[async_trait::async_trait]
    impl SignalDetector for StubDetector {
        async fn detect(&self, snapshot: &MultiTimeframeSnapshot) -> ScanResult<Vec<TradeSignal>> {
            self.seen.lock().unwrap().push(snapshot.timeframes());
            let mut signal = heuristic_signal(Direction::Long, dec!(100), dec!(97), dec!(105));
            if let TradeSignal::Heuristic(s) = &mut signal {
                s.symbol = snapshot.symbol.clone();
            }
            Ok(vec![signal])
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<TradeSignal>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_signal(&self, signal: &TradeSignal) -> Result<()> {
            if self.fail {
                anyhow::bail!("telegram down");
            }
            self.sent.lock().unwrap().push(signal.clone());
            Ok(())
        }

        async fn send_error(&self, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn send_summary(&self, _summary: &ScanSummary) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        evaluator: SignalEvaluator,
        notifier: Arc<RecordingNotifier>,
        detector: Arc<StubDetector>,
        clock: Arc<FixedClock>,
    }

    fn harness(source: StubSource, notifier: RecordingNotifier) -> Harness {
        let config = EvaluatorConfig {
            retry_backoff_ms: 1,
            ..EvaluatorConfig::default()
        };
        let notifier = Arc::new(notifier);
        let detector = Arc::new(StubDetector::default());
        let clock = Arc::new(FixedClock::new(at_hour(0)));
        let evaluator = SignalEvaluator::new(
            config,
            Arc::new(source),
            detector.clone(),
            Arc::new(InMemoryLedger::new()),
            notifier.clone(),
            clock.clone(),
        );
        Harness {
            evaluator,
            notifier,
            detector,
            clock,
        }
    }

    fn watchlist(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_within_six_hours() {
        let source = StubSource::default().with("BTC/USDT", Timeframe::H4, 220);
        let h = harness(source, RecordingNotifier::default());
        let list = watchlist(&["BTC/USDT"]);

        let first = h.evaluator.scan(&list).await;
        assert_eq!(first.emitted, 1);

        h.clock.set(at_hour(5));
        let second = h.evaluator.scan(&list).await;
        assert_eq!(second.emitted, 0);
        assert_eq!(second.suppressed, 1);

        h.clock.set(at_hour(7));
        let third = h.evaluator.scan(&list).await;
        assert_eq!(third.emitted, 1);

        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_short_four_hour_series_skips_instrument() {
        let source = StubSource::default()
            .with("BTC/USDT", Timeframe::H4, 150)
            .with("ETH/USDT", Timeframe::H4, 220);
        let h = harness(source, RecordingNotifier::default());

        let summary = h.evaluator.scan(&watchlist(&["BTC/USDT", "ETH/USDT"])).await;
        assert_eq!(summary.instruments, 2);
        assert_eq!(summary.skipped, vec!["BTC/USDT".to_string()]);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.emitted, 1);
    }

    #[tokio::test]
    async fn test_optional_timeframes_dropped_when_short() {
        let source = StubSource::default()
            .with("BTC/USDT", Timeframe::H1, 220)
            .with("BTC/USDT", Timeframe::H4, 220)
            .with("BTC/USDT", Timeframe::D1, 120);
        let h = harness(source, RecordingNotifier::default());

        h.evaluator.scan(&watchlist(&["BTC/USDT"])).await;
        let seen = h.detector.seen.lock().unwrap();
        assert_eq!(seen[0], vec![Timeframe::H1, Timeframe::H4]);
    }

    #[tokio::test]
    async fn test_broken_series_is_counted_as_failure() {
        let mut source = StubSource::default().with("BTC/USDT", Timeframe::H4, 220);
        if let Some(series) = source.series.get_mut(&("BTC/USDT".to_string(), Timeframe::H4)) {
            series.candles.swap(10, 11);
        }
        let h = harness(source, RecordingNotifier::default());

        let summary = h.evaluator.scan(&watchlist(&["BTC/USDT"])).await;
        assert_eq!(summary.failed, vec!["BTC/USDT".to_string()]);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.detected, 0);
    }

    #[tokio::test]
    async fn test_transient_fetch_errors_are_retried() {
        let source = StubSource {
            failures_before_success: 2,
            ..StubSource::default()
        }
        .with("BTC/USDT", Timeframe::H1, 220)
        .with("BTC/USDT", Timeframe::H4, 220)
        .with("BTC/USDT", Timeframe::D1, 220);
        let h = harness(source, RecordingNotifier::default());

        let summary = h.evaluator.scan(&watchlist(&["BTC/USDT"])).await;
        assert_eq!(summary.emitted, 1);
        // the first timeframe needed all three attempts
        let seen = h.detector.seen.lock().unwrap();
        assert_eq!(seen[0], Timeframe::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_instrument() {
        let source = StubSource::default();
        let h = harness(source, RecordingNotifier::default());

        let err = h.evaluator.evaluate_symbol("DOGE/USDT").await.unwrap_err();
        assert!(matches!(err, ScanError::ExternalCall { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_counted_not_fatal() {
        let source = StubSource::default()
            .with("BTC/USDT", Timeframe::H4, 220)
            .with("ETH/USDT", Timeframe::H4, 220);
        let notifier = RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        };
        let h = harness(source, notifier);

        let summary = h.evaluator.scan(&watchlist(&["BTC/USDT", "ETH/USDT"])).await;
        assert_eq!(summary.detected, 2);
        assert_eq!(summary.delivery_failures, 2);
        assert_eq!(summary.emitted, 0);
    }

    #[test]
    fn test_summary_absorb() {
        let mut day = ScanSummary::default();
        let scan = ScanSummary {
            started_at: Some(at_hour(1)),
            finished_at: Some(at_hour(1)),
            scans: 1,
            instruments: 15,
            detected: 2,
            longs: 1,
            shorts: 1,
            emitted: 2,
            ..ScanSummary::default()
        };
        day.absorb(&scan);
        day.absorb(&scan);
        assert_eq!(day.scans, 2);
        assert_eq!(day.instruments, 30);
        assert_eq!(day.emitted, 4);
        assert_eq!(day.started_at, Some(at_hour(1)));
    }
}

use anyhow::{anyhow, Result};
use data_ingestion::BybitConnector;
use notifier::{StartupInfo, TelegramNotifier};
use research_agents::{AnalystDetector, ClaudeAnalyst};
use signal_generation::{
    Clock, ConfidenceValidator, ConfluenceDetector, ConfluenceScorer, InMemoryLedger, Notifier,
    ScanSummary, SignalDetector, SignalEvaluator, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

mod config;

use config::{config_path, load_or_default, ScanMode, ScannerConfig};

/// Scans folded since the last summary went out. `every == 0` keeps
/// nothing.
#[derive(Debug)]
struct SummaryWindow {
    every: usize,
    pending: ScanSummary,
}

impl SummaryWindow {
    fn new(every: usize) -> Self {
        Self {
            every,
            pending: ScanSummary::default(),
        }
    }

    /// Fold in one scan; hands back the accumulated summary once `every`
    /// scans have been seen.
    fn push(&mut self, summary: &ScanSummary) -> Option<ScanSummary> {
        if self.every == 0 {
            return None;
        }
        self.pending.absorb(summary);
        if self.pending.scans >= self.every {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }
}

/// Scan loop state shared across ticks
struct Scanner {
    config: ScannerConfig,
    evaluator: Arc<SignalEvaluator>,
    notifier: Arc<TelegramNotifier>,
    summaries: SummaryWindow,
}

impl Scanner {
    fn build(config: ScannerConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier = Arc::new(TelegramNotifier::new(config.telegram.clone(), clock.clone())?);
        let source = Arc::new(BybitConnector::new(config.exchange.clone())?);
        let ledger = Arc::new(InMemoryLedger::new());

        let detector: Arc<dyn SignalDetector> = match config.scanner.mode {
            ScanMode::Heuristic => Arc::new(ConfluenceDetector::new(
                ConfluenceScorer::new(config.scorer_config()),
                clock.clone(),
            )),
            ScanMode::Analyst => {
                let key = config
                    .anthropic_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY is required in analyst mode"))?;
                let analyst = Arc::new(ClaudeAnalyst::new(config.analyst.clone(), key)?);
                Arc::new(AnalystDetector::new(analyst, config.analyst.clone(), clock.clone()))
            }
        };

        let mut evaluator = SignalEvaluator::new(
            config.evaluator_config(),
            source,
            detector,
            ledger,
            notifier.clone(),
            clock,
        );
        if config.scanner.mode == ScanMode::Analyst {
            evaluator = evaluator.add_validator(Box::new(ConfidenceValidator::new(
                config.analyst.min_confidence,
            )));
        }

        Ok(Self {
            summaries: SummaryWindow::new(config.scanner.summary_every_scans),
            config,
            evaluator: Arc::new(evaluator),
            notifier,
        })
    }

    async fn announce(&self) {
        let info = StartupInfo {
            mode: self.config.scanner.mode.to_string(),
            instruments: self.config.scanner.watchlist.len(),
            interval_minutes: self.config.scanner.scan_interval_minutes,
        };
        if let Err(e) = self.notifier.send_startup(&info).await {
            warn!("Startup message not delivered: {:#}", e);
        }
    }

    async fn report_error(&self, message: &str) {
        error!("{}", message);
        if let Err(e) = self.notifier.send_error(message).await {
            error!("Error notification not delivered: {:#}", e);
        }
    }

    /// One scan on its own task so a panic inside a collaborator is
    /// reported instead of ending the loop.
    async fn run_once(&mut self) {
        let evaluator = self.evaluator.clone();
        let watchlist = self.config.scanner.watchlist.clone();
        let summary = match tokio::spawn(async move { evaluator.scan(&watchlist).await }).await {
            Ok(summary) => summary,
            Err(e) => {
                self.report_error(&format!("Scan aborted: {}", e)).await;
                return;
            }
        };

        if !summary.failed.is_empty() {
            self.report_error(&format!(
                "Invalid market data for: {}",
                summary.failed.join(", ")
            ))
            .await;
        }
        if summary.instruments > 0 && summary.skipped.len() + summary.failed.len() == summary.instruments {
            self.report_error(&format!(
                "No instrument could be scanned ({} skipped)",
                summary.skipped.len()
            ))
            .await;
        }

        if let Some(window) = self.summaries.push(&summary) {
            if let Err(e) = self.notifier.send_summary(&window).await {
                warn!("Summary not delivered: {:#}", e);
            }
        }

        info!(
            "⏰ Next scan in {} minutes",
            self.config.scanner.scan_interval_minutes
        );
    }

    async fn run(&mut self) {
        let period = Duration::from_secs(self.config.scanner.scan_interval_minutes * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let mut config = load_or_default(&path)?;
    config.apply_env();

    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();

    info!("🚀 Starting market structure scanner");
    info!("Configuration: {}", path);

    config.validate()?;

    info!(
        "📊 Watching {} instruments on {:?}, mode {}",
        config.scanner.watchlist.len(),
        config.scanner.timeframes,
        config.scanner.mode
    );

    let mut scanner = Scanner::build(config)?;
    scanner.announce().await;

    tokio::select! {
        _ = scanner.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Shutting down gracefully...");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_scan() -> ScanSummary {
        ScanSummary {
            scans: 1,
            instruments: 2,
            skipped: vec!["DOGE/USDT".to_string()],
            emitted: 1,
            ..ScanSummary::default()
        }
    }

    #[test]
    fn test_summary_window_releases_every_n_scans() {
        let mut window = SummaryWindow::new(3);
        assert!(window.push(&one_scan()).is_none());
        assert!(window.push(&one_scan()).is_none());

        let released = window.push(&one_scan()).unwrap();
        assert_eq!(released.scans, 3);
        assert_eq!(released.instruments, 6);
        assert_eq!(released.skipped.len(), 3);
        assert_eq!(released.emitted, 3);

        // the next window starts empty
        assert!(window.push(&one_scan()).is_none());
        assert_eq!(window.pending.scans, 1);
        assert_eq!(window.pending.skipped.len(), 1);
    }

    #[test]
    fn test_disabled_summaries_keep_nothing() {
        let mut window = SummaryWindow::new(0);
        for _ in 0..100 {
            assert!(window.push(&one_scan()).is_none());
        }
        assert_eq!(window.pending, ScanSummary::default());
    }
}

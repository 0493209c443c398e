//! Analyst detector
//!
//! Lets the evaluator run the LLM analyst in place of the confluence
//! scorer: one completion per snapshot, at most one signal back.
//! Transport failures are retried with doubling backoff. A reply that
//! fails validation is final.

use async_trait::async_trait;
use common::{ScanError, ScanResult};
use signal_generation::{Clock, MultiTimeframeSnapshot, SignalDetector, TradeSignal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::{AnalystConfig, CompletionClient};
use crate::request::AnalysisRequest;
use crate::response::parse_analyst_response;

pub struct AnalystDetector {
    client: Arc<dyn CompletionClient>,
    config: AnalystConfig,
    clock: Arc<dyn Clock>,
}

impl AnalystDetector {
    pub fn new(client: Arc<dyn CompletionClient>, config: AnalystConfig, clock: Arc<dyn Clock>) -> Self {
        Self { client, config, clock }
    }

    async fn complete_with_retry(&self, symbol: &str, prompt: &str) -> anyhow::Result<String> {
        let attempts = self.config.call_attempts.max(1);
        let mut delay = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;

        loop {
            match self.client.complete(prompt).await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Analyst call for {} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        symbol, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl SignalDetector for AnalystDetector {
    async fn detect(&self, snapshot: &MultiTimeframeSnapshot) -> ScanResult<Vec<TradeSignal>> {
        let request = AnalysisRequest::from_snapshot(snapshot, &self.config)?;
        let prompt = request.prompt();

        debug!(symbol = %snapshot.symbol, model = self.client.model(), "Requesting analyst review");

        let reply = match self.complete_with_retry(&snapshot.symbol, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(symbol = %snapshot.symbol, error = %e, "Analyst call failed");
                return Err(ScanError::external(&snapshot.symbol, &e));
            }
        };

        let Some(signal) = parse_analyst_response(&snapshot.symbol, &reply, self.clock.now()) else {
            return Ok(Vec::new());
        };

        info!(
            symbol = %signal.symbol,
            direction = %signal.direction,
            confidence = signal.confidence,
            "Analyst proposed a setup"
        );
        Ok(vec![TradeSignal::Analyst(signal)])
    }

    fn name(&self) -> &'static str {
        "analyst"
    }
}

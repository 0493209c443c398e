//! Analyst agent abstractions
//!
//! An analyst agent hands a fully rendered prompt to a text-generation
//! backend and gets free text back. The backend is a trait so the detector
//! can be exercised against canned completions.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Text-generation backend used by the analyst
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one user prompt, return the first text block of the reply.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// `[analyst]` section of the scanner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Sent as the `anthropic-version` header
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Trailing candles included per timeframe
    #[serde(default = "default_candles_1h")]
    pub candles_1h: usize,

    #[serde(default = "default_candles_4h")]
    pub candles_4h: usize,

    #[serde(default = "default_candles_1d")]
    pub candles_1d: usize,

    /// Free-form macro backdrop appended to every prompt
    #[serde(default = "default_macro_context")]
    pub macro_context: String,

    /// Calls per snapshot before a transport failure skips the instrument
    #[serde(default = "default_call_attempts")]
    pub call_attempts: u32,

    /// First retry delay, doubled after each failure
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Replies below this confidence are not delivered
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_url: default_api_url(),
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            candles_1h: default_candles_1h(),
            candles_4h: default_candles_4h(),
            candles_1d: default_candles_1d(),
            macro_context: default_macro_context(),
            call_attempts: default_call_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f64 {
    0.3
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_candles_1h() -> usize {
    20
}

fn default_candles_4h() -> usize {
    15
}

fn default_candles_1d() -> usize {
    10
}

fn default_macro_context() -> String {
    "Standard analysis".to_string()
}

fn default_call_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_min_confidence() -> u8 {
    1
}

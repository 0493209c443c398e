//! Scanner configuration
//!
//! One TOML file with a section per component. Every field has a default,
//! so a missing or empty file yields a working setup; secrets only ever
//! come from the environment.

use anyhow::{bail, Context};
use common::Timeframe;
use data_ingestion::BybitConfig;
use notifier::TelegramConfig;
use research_agents::AnalystConfig;
use serde::{Deserialize, Serialize};
use signal_generation::{AnalyzerConfig, EvaluatorConfig, ScorerConfig};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

pub const CONFIG_PATH_ENV: &str = "SCANNER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "scanner.toml";

/// Which detector the evaluator runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Heuristic,
    Analyst,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Heuristic => f.write_str("heuristic"),
            ScanMode::Analyst => f.write_str("analyst"),
        }
    }
}

/// `[scanner]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerSection {
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,

    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    #[serde(default = "default_scan_interval_minutes")]
    pub scan_interval_minutes: u64,

    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    #[serde(default = "default_min_candles")]
    pub min_candles: usize,

    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,

    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub mode: ScanMode,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scans folded into one summary message; 0 disables summaries
    #[serde(default = "default_summary_every_scans")]
    pub summary_every_scans: usize,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            timeframes: default_timeframes(),
            scan_interval_minutes: default_scan_interval_minutes(),
            fetch_limit: default_fetch_limit(),
            min_candles: default_min_candles(),
            cooldown_hours: default_cooldown_hours(),
            fetch_attempts: default_fetch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            mode: ScanMode::default(),
            log_level: default_log_level(),
            summary_every_scans: default_summary_every_scans(),
        }
    }
}

fn default_watchlist() -> Vec<String> {
    [
        "BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "XRP/USDT", "ADA/USDT", "DOGE/USDT",
        "LINK/USDT", "AVAX/USDT", "POL/USDT", "DOT/USDT", "UNI/USDT", "LTC/USDT", "ATOM/USDT",
        "ETC/USDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::ALL.to_vec()
}

fn default_scan_interval_minutes() -> u64 {
    30
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

fn default_log_level() -> String {
    "info".to_string()
}

fn default_summary_every_scans() -> usize {
    48
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub scanner: ScannerSection,

    #[serde(default)]
    pub scorer: ScorerConfig,

    #[serde(default)]
    pub structure: AnalyzerConfig,

    #[serde(default)]
    pub exchange: BybitConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub analyst: AnalystConfig,

    #[serde(skip)]
    pub anthropic_api_key: Option<String>,
}

impl ScannerConfig {
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            timeframes: self.scanner.timeframes.clone(),
            fetch_limit: self.scanner.fetch_limit,
            min_candles: self.scanner.min_candles,
            cooldown_hours: self.scanner.cooldown_hours,
            fetch_attempts: self.scanner.fetch_attempts,
            retry_backoff_ms: self.scanner.retry_backoff_ms,
        }
    }

    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            analyzer: self.structure.clone(),
            ..self.scorer.clone()
        }
    }

    pub fn log_level(&self) -> Level {
        Level::from_str(self.scanner.log_level.trim()).unwrap_or(Level::INFO)
    }

    /// Pull secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(key);
        }
        if let Some(proxy) = get("EXCHANGE_PROXY_URL") {
            self.exchange.proxy_url = Some(proxy);
        }
    }

    /// Startup checks. Missing Telegram credentials always fail; a missing
    /// API key fails only in analyst mode.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scanner.watchlist.is_empty() {
            bail!("[scanner] watchlist is empty");
        }
        if !self.scanner.timeframes.contains(&Timeframe::H4) {
            bail!("[scanner] timeframes must include 4h");
        }
        if self.scanner.scan_interval_minutes == 0 {
            bail!("[scanner] scan_interval_minutes must be positive");
        }
        if self.scanner.fetch_attempts == 0 {
            bail!("[scanner] fetch_attempts must be at least 1");
        }
        if self.analyst.call_attempts == 0 {
            bail!("[analyst] call_attempts must be at least 1");
        }
        if self.scanner.min_candles > self.scanner.fetch_limit {
            bail!(
                "[scanner] min_candles ({}) exceeds fetch_limit ({})",
                self.scanner.min_candles,
                self.scanner.fetch_limit
            );
        }
        if self.telegram.bot_token.as_deref().map_or(true, str::is_empty) {
            bail!("TELEGRAM_BOT_TOKEN is not set");
        }
        if self.telegram.chat_id.as_deref().map_or(true, str::is_empty) {
            bail!("TELEGRAM_CHAT_ID is not set");
        }
        if self.scanner.mode == ScanMode::Analyst && self.anthropic_api_key.is_none() {
            bail!("ANTHROPIC_API_KEY is required in analyst mode");
        }
        Ok(())
    }
}

/// Path from `SCANNER_CONFIG_PATH`, else `scanner.toml`.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<ScannerConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    let config: ScannerConfig =
        toml::from_str(&content).with_context(|| format!("invalid configuration in {}", path))?;
    Ok(config)
}

/// Load the file when it exists, defaults otherwise.
pub fn load_or_default(path: &str) -> anyhow::Result<ScannerConfig> {
    if Path::new(path).exists() {
        load_config(path)
    } else {
        Ok(ScannerConfig::default())
    }
}

/// Save configuration to TOML file. Secrets are never written.
pub fn save_config(config: &ScannerConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path))?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE).with_context(|| format!("failed to write {}", path))?;
    Ok(())
}

pub const CONFIG_TEMPLATE: &str = r#"# Market structure scanner configuration
# Secrets come from the environment:
#   TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID, ANTHROPIC_API_KEY, EXCHANGE_PROXY_URL

[scanner]
watchlist = [
    "BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "XRP/USDT",
    "ADA/USDT", "DOGE/USDT", "LINK/USDT", "AVAX/USDT", "POL/USDT",
    "DOT/USDT", "UNI/USDT", "LTC/USDT", "ATOM/USDT", "ETC/USDT",
]
# 4h is mandatory; 1h and 1d add context
timeframes = ["1h", "4h", "1d"]
scan_interval_minutes = 30
fetch_limit = 250
# Series shorter than this are dropped (EMA200 needs 200 candles)
min_candles = 200
# Same symbol, direction and timeframe are not re-sent within this window
cooldown_hours = 6
fetch_attempts = 3
retry_backoff_ms = 2000
# heuristic | analyst
mode = "heuristic"
log_level = "info"
# One summary message every N scans (48 x 30 min = daily), 0 disables
summary_every_scans = 48

[scorer]
# Veto when price is this far beyond EMA200 against the trade (%)
ema_veto_pct = 5.0
# 4h RSI gate for LONG (SHORT uses 100 - value)
rsi_gate = 30.0
rsi_extreme = 25.0
volume_weak_ratio = 0.3
volume_strong_ratio = 0.4
band_distance_pct = 2.0
daily_rsi = 35.0
# Mean per-candle move against the trade (%)
knife_veto_pct = 2.0
knife_penalty_pct = 1.0
min_score_long = 8
min_score_short = 8
stop_pct = 3.0
target_pct = 6.0
min_risk_reward = 1.5

[structure]
structure_lookback = 10
divergence_lookback = 20
volume_lookback = 10
knife_window = 5

[exchange]
base_url = "https://api.bybit.com"
category = "spot"
request_spacing_ms = 300
timeout_secs = 15
# proxy_url = "socks5://127.0.0.1:1080"

[telegram]
api_base = "https://api.telegram.org"
timeout_secs = 10
disable_web_page_preview = true

[analyst]
model = "claude-sonnet-4-20250514"
api_url = "https://api.anthropic.com/v1/messages"
api_version = "2023-06-01"
max_tokens = 2000
temperature = 0.3
timeout_secs = 60
candles_1h = 20
candles_4h = 15
candles_1d = 10
macro_context = "Standard analysis"
call_attempts = 3
retry_backoff_ms = 2000
min_confidence = 1
"#;

// Telegram Bot API delivery

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use signal_generation::{Clock, Notifier, ScanSummary, TradeSignal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::format::{render_error, render_signal, render_startup, render_summary, truncate_message, StartupInfo};

/// `[telegram]` section. Credentials are normally injected from the
/// environment and never written back to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_disable_preview")]
    pub disable_web_page_preview: bool,

    #[serde(default, skip_serializing)]
    pub bot_token: Option<String>,

    #[serde(default, skip_serializing)]
    pub chat_id: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            disable_web_page_preview: default_disable_preview(),
            bot_token: None,
            chat_id: None,
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.bot_token, &self.chat_id), (Some(t), Some(c)) if !t.is_empty() && !c.is_empty())
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_disable_preview() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    config: TelegramConfig,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        if !config.is_configured() {
            warn!("Telegram credentials missing, messages will only be logged");
        }

        Ok(Self { config, client, clock })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendMessage", self.config.api_base.trim_end_matches('/'), token)
    }

    /// Post one HTML message. Without credentials the message is logged and
    /// dropped.
    pub async fn send_message(&self, html: &str) -> Result<()> {
        let (token, chat_id) = match (&self.config.bot_token, &self.config.chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => (token, chat_id),
            _ => {
                info!("Telegram not configured, message not sent");
                debug!("{}", html);
                return Ok(());
            }
        };

        let text = truncate_message(html);
        let payload = SendMessage {
            chat_id,
            text: &text,
            parse_mode: "HTML",
            disable_web_page_preview: self.config.disable_web_page_preview,
        };

        let response = self
            .client
            .post(self.endpoint(token))
            .json(&payload)
            .send()
            .await
            .context("Telegram request failed")?;

        let status = response.status();
        let reply: Option<ApiReply> = response.json().await.ok();

        match reply {
            Some(ApiReply { ok: true, .. }) if status.is_success() => {
                debug!("Telegram message delivered");
                Ok(())
            }
            Some(ApiReply { description, .. }) => Err(anyhow!(
                "Telegram rejected message ({}): {}",
                status,
                description.unwrap_or_default()
            )),
            None => Err(anyhow!("Telegram returned {}", status)),
        }
    }

    pub async fn send_startup(&self, info: &StartupInfo) -> Result<()> {
        self.send_message(&render_startup(info, self.clock.now())).await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_signal(&self, signal: &TradeSignal) -> Result<()> {
        self.send_message(&render_signal(signal)).await
    }

    async fn send_error(&self, message: &str) -> Result<()> {
        self.send_message(&render_error(message, self.clock.now())).await
    }

    async fn send_summary(&self, summary: &ScanSummary) -> Result<()> {
        self.send_message(&render_summary(summary, self.clock.now())).await
    }
}

//! Anthropic Messages API client

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::agent::{AnalystConfig, CompletionClient};

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

pub struct ClaudeAnalyst {
    config: AnalystConfig,
    api_key: String,
    client: Client,
}

impl ClaudeAnalyst {
    pub fn new(config: AnalystConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            api_key: api_key.into(),
            client,
        })
    }

    pub fn config(&self) -> &AnalystConfig {
        &self.config
    }
}

/// First `text` block of a Messages API reply.
fn first_text_block(body: &str) -> Result<String> {
    let reply: MessagesResponse =
        serde_json::from_str(body).context("unexpected Messages API payload")?;
    reply
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .ok_or_else(|| anyhow!("Messages API reply has no text block"))
}

#[async_trait]
impl CompletionClient for ClaudeAnalyst {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.config.model, prompt_chars = prompt.len(), "Calling Messages API");

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&request)
            .send()
            .await
            .context("Messages API request failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read Messages API response")?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => anyhow!(
                    "Messages API returned {} ({}): {}",
                    status,
                    envelope.error.kind,
                    envelope.error.message
                ),
                Err(_) => anyhow!("Messages API returned {}", status),
            });
        }

        first_text_block(&body)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_text_block_skips_other_blocks() {
        let body = r#"{
            "id": "msg_01",
            "type": "message",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "{\"signal\": \"NOTHING\"}"},
                {"type": "text", "text": "ignored"}
            ]
        }"#;
        assert_eq!(first_text_block(body).unwrap(), r#"{"signal": "NOTHING"}"#);
    }

    #[test]
    fn test_reply_without_text_is_an_error() {
        assert!(first_text_block(r#"{"content": []}"#).is_err());
        assert!(first_text_block("not json").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let request = MessagesRequest {
            model: "claude-sonnet-4-20250514",
            max_tokens: 2000,
            temperature: 0.3,
            messages: vec![Message {
                role: "user",
                content: "hello",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 2000);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_new_keeps_config() {
        let analyst = ClaudeAnalyst::new(AnalystConfig::default(), "sk-test").unwrap();
        assert_eq!(analyst.model(), "claude-sonnet-4-20250514");
        assert_eq!(analyst.config().timeout_secs, 60);
    }
}

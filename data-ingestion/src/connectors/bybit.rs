use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::{Candle, CandleSeries, CandleSource, Timeframe};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Bybit v5 REST settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BybitConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// `spot`, `linear` or `inverse`
    #[serde(default = "default_category")]
    pub category: String,

    /// Minimum gap between two requests
    #[serde(default = "default_request_spacing_ms")]
    pub request_spacing_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// HTTP or SOCKS5 proxy, e.g. `socks5://127.0.0.1:1080`
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            category: default_category(),
            request_spacing_ms: default_request_spacing_ms(),
            timeout_secs: default_timeout_secs(),
            proxy_url: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_category() -> String {
    "spot".to_string()
}

fn default_request_spacing_ms() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    15
}

/// Kline envelope. `list` rows are
/// `[startTime, open, high, low, close, volume, turnover]`, newest first.
#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

/// Bybit spot kline connector
pub struct BybitConnector {
    config: BybitConfig,
    client: Client,
    last_request: Mutex<Option<Instant>>,
}

impl BybitConnector {
    pub fn new(config: BybitConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy url")?);
            info!("Routing Bybit requests through proxy");
        }
        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            last_request: Mutex::new(None),
        })
    }

    /// `BTC/USDT` -> `BTCUSDT`
    pub fn market_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    pub fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::H1 => "60",
            Timeframe::H4 => "240",
            Timeframe::D1 => "D",
        }
    }

    async fn throttle(&self) {
        let spacing = Duration::from_millis(self.config.request_spacing_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn parse_klines(symbol: &str, timeframe: Timeframe, body: KlineResponse) -> Result<CandleSeries> {
        if body.ret_code != 0 {
            return Err(anyhow!(
                "Bybit error {} for {} {}: {}",
                body.ret_code,
                symbol,
                timeframe,
                body.ret_msg
            ));
        }
        let rows = body.result.map(|r| r.list).unwrap_or_default();

        let mut candles = rows
            .iter()
            .map(|row| parse_row(row))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("malformed kline for {} {}", symbol, timeframe))?;
        candles.reverse();

        Ok(CandleSeries::new(symbol, timeframe, candles))
    }
}

fn parse_row(row: &[String]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(anyhow!("expected at least 6 fields, got {}", row.len()));
    }
    let field = |i: usize, name: &str| -> Result<f64> {
        row[i]
            .parse::<f64>()
            .with_context(|| format!("bad {} value {:?}", name, row[i]))
    };

    let millis: i64 = row[0]
        .parse()
        .with_context(|| format!("bad start time {:?}", row[0]))?;
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("start time out of range: {}", millis))?;

    Ok(Candle {
        timestamp,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}

#[async_trait]
impl CandleSource for BybitConnector {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries> {
        self.throttle().await;

        let url = format!("{}/v5/market/kline", self.config.base_url.trim_end_matches('/'));
        let market = Self::market_symbol(symbol);
        let limit = limit.to_string();
        debug!("Fetching {} {} klines for {}", limit, timeframe, market);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("category", self.config.category.as_str()),
                ("symbol", market.as_str()),
                ("interval", Self::interval(timeframe)),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("kline request for {} failed", market))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Bybit API error: {} for {} {}",
                response.status(),
                symbol,
                timeframe
            ));
        }

        let body: KlineResponse = response
            .json()
            .await
            .with_context(|| format!("undecodable kline response for {}", market))?;

        let series = Self::parse_klines(symbol, timeframe, body)?;
        debug!("Fetched {} candles for {} {}", series.len(), symbol, timeframe);
        Ok(series)
    }

    fn name(&self) -> &str {
        "bybit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "retCode": 0,
        "retMsg": "OK",
        "result": {
            "category": "spot",
            "symbol": "BTCUSDT",
            "list": [
                ["1704081600000", "42350.5", "42510", "42200.1", "42480", "152.3", "6450000"],
                ["1704067200000", "42100", "42400", "42050", "42350.5", "201.7", "8510000"],
                ["1704052800000", "41980", "42150", "41900", "42100", "188.0", "7900000"]
            ]
        },
        "time": 1704082000000
    }"#;

    #[test]
    fn test_symbol_and_interval_mapping() {
        assert_eq!(BybitConnector::market_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(BybitConnector::market_symbol("pepe/usdt"), "PEPEUSDT");
        assert_eq!(BybitConnector::interval(Timeframe::H1), "60");
        assert_eq!(BybitConnector::interval(Timeframe::H4), "240");
        assert_eq!(BybitConnector::interval(Timeframe::D1), "D");
    }

    #[test]
    fn test_parse_reverses_to_ascending() {
        let body: KlineResponse = serde_json::from_str(SAMPLE).unwrap();
        let series = BybitConnector::parse_klines("BTC/USDT", Timeframe::H4, body).unwrap();

        assert_eq!(series.len(), 3);
        assert_eq!(series.symbol, "BTC/USDT");
        assert_eq!(series.candles[0].close, 42100.0);
        assert_eq!(series.candles[2].close, 42480.0);
        assert!(series.candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(series.validate().is_ok());
    }

    #[test]
    fn test_nonzero_ret_code_is_error() {
        let body: KlineResponse = serde_json::from_str(
            r#"{"retCode": 10001, "retMsg": "params error: symbol invalid", "result": {}}"#,
        )
        .unwrap();
        let err = BybitConnector::parse_klines("FOO/USDT", Timeframe::H1, body).unwrap_err();
        assert!(err.to_string().contains("10001"));
    }

    #[test]
    fn test_malformed_row_is_error() {
        let body: KlineResponse = serde_json::from_str(
            r#"{"retCode": 0, "retMsg": "OK", "result": {"list": [["1704081600000", "abc", "1", "1", "1", "1", "1"]]}}"#,
        )
        .unwrap();
        assert!(BybitConnector::parse_klines("BTC/USDT", Timeframe::H4, body).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: BybitConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.category, "spot");
        assert_eq!(config.request_spacing_ms, 300);
        assert!(config.proxy_url.is_none());
        assert!(BybitConnector::new(config).is_ok());
    }
}

//! HTTP decision engine client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::DecisionEngine;
use crate::config::EngineConfig;
use crate::domain::{MarketSnapshot, SignalAction, TradeSignal};
use crate::error::{Result, StewardError};

/// Remote analysis service speaking a small JSON request/response pair.
pub struct HttpDecisionEngine {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct SignalResponse {
    action: SignalAction,
    confidence: f64,
    #[serde(default)]
    suggested_qty_pct: Option<rust_decimal::Decimal>,
    #[serde(default)]
    target_price: Option<rust_decimal::Decimal>,
    #[serde(default)]
    stop_loss: Option<rust_decimal::Decimal>,
    #[serde(default)]
    reasoning: String,
}

impl HttpDecisionEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DecisionEngine for HttpDecisionEngine {
    async fn analyze_opportunity(
        &self,
        symbol: &str,
        market_data: &MarketSnapshot,
        news_context: Option<&str>,
        strategy_context: Option<&str>,
    ) -> Result<TradeSignal> {
        let body = json!({
            "symbol": symbol,
            "price": market_data.price,
            "bid": market_data.bid,
            "ask": market_data.ask,
            "volume": market_data.volume,
            "timestamp": market_data.timestamp,
            "news_context": news_context,
            "strategy_context": strategy_context,
        });

        let response = self
            .http
            .post(format!("{}/analyze", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    StewardError::DecisionEngineUnavailable(e.to_string())
                } else {
                    StewardError::from(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(StewardError::DecisionEngineUnavailable(format!(
                "engine returned {}",
                response.status()
            )));
        }

        let parsed: SignalResponse = response.json().await?;
        debug!(
            "engine signal for {}: {} confidence={:.2}",
            symbol, parsed.action, parsed.confidence
        );

        Ok(TradeSignal {
            symbol: symbol.to_string(),
            action: parsed.action,
            confidence: parsed.confidence,
            suggested_qty_pct: parsed.suggested_qty_pct.unwrap_or_default(),
            target_price: parsed.target_price,
            stop_loss: parsed.stop_loss,
            reasoning: parsed.reasoning,
        })
    }
}

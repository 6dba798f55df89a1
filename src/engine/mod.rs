//! Decision engine boundary.
//!
//! The orchestrator treats the engine as an opaque signal source: hand it
//! a market snapshot, get back a trade signal with a confidence score.
//! Whatever reasoning produced the signal stays behind this trait.

pub mod http;

use async_trait::async_trait;

use crate::domain::{MarketSnapshot, TradeSignal};
use crate::error::Result;

pub use http::HttpDecisionEngine;

/// Signal source contract
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Produce a trade signal for one symbol from current market data.
    ///
    /// Optional context strings let the caller thread through news or
    /// strategy notes without this trait knowing their shape.
    async fn analyze_opportunity(
        &self,
        symbol: &str,
        market_data: &MarketSnapshot,
        news_context: Option<&str>,
        strategy_context: Option<&str>,
    ) -> Result<TradeSignal>;
}

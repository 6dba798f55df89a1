//! Execution audit trail

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Action a decision-to-action attempt resolved into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    Buy,
    Sell,
    Hold,
    Skip,
}

impl std::fmt::Display for ExecutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionAction::Buy => write!(f, "buy"),
            ExecutionAction::Sell => write!(f, "sell"),
            ExecutionAction::Hold => write!(f, "hold"),
            ExecutionAction::Skip => write!(f, "skip"),
        }
    }
}

/// Outcome record of one decision-to-action attempt.
///
/// Every skipped or failed trade carries a reason; there is no silent
/// failure path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub action: ExecutionAction,
    pub symbol: String,
    pub reason: String,
    pub order_id: Option<String>,
    pub qty: Option<Decimal>,
    pub price: Option<Decimal>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn skipped(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            action: ExecutionAction::Skip,
            symbol: symbol.into(),
            reason: reason.into(),
            order_id: None,
            qty: None,
            price: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn traded(
        symbol: impl Into<String>,
        action: ExecutionAction,
        reason: impl Into<String>,
        order_id: Option<String>,
        qty: Option<Decimal>,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            success: true,
            action,
            symbol: symbol.into(),
            reason: reason.into(),
            order_id,
            qty,
            price,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        symbol: impl Into<String>,
        action: ExecutionAction,
        reason: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            action,
            symbol: symbol.into(),
            reason: reason.into(),
            order_id: None,
            qty: None,
            price: None,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only, bounded history of execution results for operator
/// visibility. Oldest entries drop beyond the retention count.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<ExecutionResult>,
    retention: usize,
}

impl ExecutionHistory {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(retention.min(1024)),
            retention,
        }
    }

    pub fn push(&mut self, result: ExecutionResult) {
        if self.entries.len() >= self.retention {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionResult> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.entries.iter()
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(500)
    }
}

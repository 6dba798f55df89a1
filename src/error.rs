use thiserror::Error;

/// Main error type for the trading steward
#[derive(Error, Debug)]
pub enum StewardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order timeout: {0}")]
    OrderTimeout(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Job queue errors
    #[error("Work item not found: {0}")]
    WorkItemNotFound(uuid::Uuid),

    #[error("Invalid work item transition: {from} -> {to}")]
    InvalidWorkItemTransition { from: String, to: String },

    // Decision engine errors
    #[error("Decision engine unavailable: {0}")]
    DecisionEngineUnavailable(String),

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("Kill switch active: {0}")]
    KillSwitchActive(String),

    // Orchestrator errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for StewardError
pub type Result<T> = std::result::Result<T, StewardError>;

/// Specific error types for risk management
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("Max position size exceeded: limit {limit}%, requested {requested}%")]
    MaxPositionSize {
        limit: rust_decimal::Decimal,
        requested: rust_decimal::Decimal,
    },

    #[error("Max total exposure exceeded: limit {limit}%, projected {projected}%")]
    MaxTotalExposure {
        limit: rust_decimal::Decimal,
        projected: rust_decimal::Decimal,
    },

    #[error("Max positions count reached: {count} >= {limit}")]
    MaxPositionsCount { count: usize, limit: u32 },

    #[error("Daily loss limit reached: {loss_pct}% >= {limit_pct}%")]
    DailyLossLimit {
        loss_pct: rust_decimal::Decimal,
        limit_pct: rust_decimal::Decimal,
    },

    #[error("Insufficient buying power: requested ${requested}, available ${available}")]
    InsufficientBuyingPower {
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },
}

impl From<RiskError> for StewardError {
    fn from(err: RiskError) -> Self {
        StewardError::RiskLimitExceeded(err.to_string())
    }
}

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::risk::RiskLimits;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub engine: EngineConfig,
    pub execution: ExecutionConfig,
    pub risk: RiskLimitsConfig,
    #[serde(default)]
    pub rules: PositionRulesConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Admin API port (default: 8080)
    #[serde(default)]
    pub admin_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// REST API endpoint for trading
    pub rest_url: String,
    /// REST API endpoint for market data
    #[serde(default)]
    pub data_url: Option<String>,
    /// API key id
    pub api_key: String,
    /// API secret
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Decision engine endpoint
    pub url: String,
    /// Minimum signal confidence required to act (0..1)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Watchlist of symbols fed into the analysis cycle
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_engine_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_engine_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Fill tracking timeout in milliseconds
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,
    /// Polling interval for order status in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum remediation attempts per rejected order
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Consecutive rejection failures before the circuit breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,
    /// Cooldown before the breaker auto-closes (seconds, 0 = manual reset only)
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

fn default_fill_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    300
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_timeout_ms: default_fill_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

/// Basis for the daily-loss-limit denominator.
///
/// The source system divided absolute loss by a fixed notional baseline;
/// dividing by live equity scales with the actual account. Both are kept
/// as a configuration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyLossBasis {
    LiveEquity,
    FixedBaseline,
}

impl Default for DailyLossBasis {
    fn default() -> Self {
        DailyLossBasis::LiveEquity
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskLimitsConfig {
    /// Maximum single position size as percent of portfolio value
    pub max_position_size_pct: Decimal,
    /// Maximum total exposure as percent of portfolio value
    pub max_total_exposure_pct: Decimal,
    /// Maximum number of concurrent open positions
    pub max_positions_count: u32,
    /// Daily loss limit as percent of the reference baseline
    pub daily_loss_limit_pct: Decimal,
    #[serde(default)]
    pub daily_loss_basis: DailyLossBasis,
    /// Reference equity when `daily_loss_basis = fixed_baseline`
    #[serde(default = "default_fixed_baseline")]
    pub fixed_baseline: Decimal,
}

fn default_fixed_baseline() -> Decimal {
    Decimal::from(100_000)
}

impl RiskLimitsConfig {
    pub fn to_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_size_pct: self.max_position_size_pct,
            max_total_exposure_pct: self.max_total_exposure_pct,
            max_positions_count: self.max_positions_count,
            daily_loss_limit_pct: self.daily_loss_limit_pct,
            kill_switch_active: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionRulesConfig {
    /// Hard stop-loss floor as a fraction of entry price (default 0.03 = 3%)
    #[serde(default = "default_hard_stop_pct")]
    pub hard_stop_loss_pct: Decimal,
    /// Emergency full-close threshold on unrealized loss percent (default 8)
    #[serde(default = "default_emergency_stop_pct")]
    pub emergency_stop_pct: Decimal,
    /// Gain percent above which the trailing stop starts ratcheting (default 5)
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: Decimal,
    /// Default trailing distance as a fraction of price (default 0.05 = 5%)
    #[serde(default = "default_trailing_distance_pct")]
    pub default_trailing_pct: Decimal,
}

fn default_hard_stop_pct() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_emergency_stop_pct() -> Decimal {
    Decimal::from(8)
}

fn default_trailing_activation_pct() -> Decimal {
    Decimal::from(5)
}

fn default_trailing_distance_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

impl Default for PositionRulesConfig {
    fn default() -> Self {
        Self {
            hard_stop_loss_pct: default_hard_stop_pct(),
            emergency_stop_pct: default_emergency_stop_pct(),
            trailing_activation_pct: default_trailing_activation_pct(),
            default_trailing_pct: default_trailing_distance_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    /// Allocation drift (percentage points) that triggers a rebalance
    #[serde(default = "default_drift_threshold_pct")]
    pub drift_threshold_pct: Decimal,
}

fn default_drift_threshold_pct() -> Decimal {
    Decimal::from(2)
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            drift_threshold_pct: default_drift_threshold_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between analysis cycles (seconds)
    #[serde(default = "default_analysis_interval_secs")]
    pub analysis_interval_secs: u64,
    /// Interval between position-management cycles (seconds)
    #[serde(default = "default_position_interval_secs")]
    pub position_interval_secs: u64,
    /// Heartbeat interval (seconds)
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// No completed analysis cycle within this window counts as stale (seconds)
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Consecutive heartbeat errors before self-heal
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Cooldown between stop and restart during self-heal (seconds)
    #[serde(default = "default_heal_cooldown_secs")]
    pub heal_cooldown_secs: u64,
    /// Restart automatically after self-heal
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_analysis_interval_secs() -> u64 {
    60
}

fn default_position_interval_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_stale_threshold_secs() -> u64 {
    120
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_heal_cooldown_secs() -> u64 {
    5
}

fn default_auto_start() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: default_analysis_interval_secs(),
            position_interval_secs: default_position_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            heal_cooldown_secs: default_heal_cooldown_secs(),
            auto_start: default_auto_start(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Default attempt ceiling before a failed item is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for retry backoff (seconds)
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Maximum retry backoff (seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Interval between janitor passes over failed items (seconds)
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_secs() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    3600
}

fn default_janitor_interval_secs() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real orders)
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Optional directory for rolling file output
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment.
    ///
    /// Layering: `config/default.toml`, then `config/{STEWARD_ENV}.toml`
    /// if present, then `STEWARD__`-prefixed environment variables.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env_name = std::env::var("STEWARD_ENV").unwrap_or_else(|_| "default".to_string());

        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false));

        if env_name != "default" {
            let env_file = format!("config/{}", env_name);
            if Path::new(&format!("{}.toml", env_file)).exists() {
                builder = builder.add_source(File::with_name(&env_file));
            }
        }

        builder
            .add_source(Environment::with_prefix("STEWARD").separator("__"))
            .build()?
            .try_deserialize()
    }
}

//! Order execution pipeline: submission, fill tracking, rejection
//! recovery, and the system-wide circuit breaker.

pub mod circuit_breaker;
pub mod executor;
pub mod fill_tracker;
pub mod rejection;

pub use circuit_breaker::{BreakerState, BreakerStats, CircuitBreaker};
pub use executor::{ExecutionMetrics, MetricsSnapshot, OrderExecutor};
pub use fill_tracker::{FillOutcome, FillTracker};
pub use rejection::{RejectionCategory, RejectionHandler, RetryOutcome};

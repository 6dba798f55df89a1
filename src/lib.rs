//! Steward: an autonomous trading agent's execution and resilience core.
//!
//! The orchestrator runs periodic analysis and position-management
//! cycles, routes every trade through a pre-trade risk gate and a
//! durable idempotent job queue, tracks fills defensively, remediates
//! broker rejections behind a circuit breaker, and restarts itself when
//! its own loops go quiet.

pub mod api;
pub mod broker;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod persistence;
pub mod position;
pub mod queue;
pub mod risk;

pub use config::AppConfig;
pub use error::{Result, StewardError};
pub use orchestrator::{Orchestrator, OrchestratorSettings};

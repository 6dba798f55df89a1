//! Admin HTTP surface.
//!
//! Operator controls for the running agent: lifecycle, kill switch,
//! risk limits, queue inspection, and the circuit breaker. Everything is
//! JSON over a small axum router.

pub mod handlers;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub fn router(orchestrator: Orchestrator) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/api/history", get(handlers::history))
        .route("/api/positions", get(handlers::positions))
        .route("/api/agent/start", post(handlers::start_agent))
        .route("/api/agent/stop", post(handlers::stop_agent))
        .route("/api/agent/pause", post(handlers::pause_agent))
        .route("/api/agent/resume", post(handlers::resume_agent))
        .route("/api/agent/mode", post(handlers::set_mode))
        .route("/api/kill-switch/activate", post(handlers::activate_kill_switch))
        .route("/api/kill-switch/deactivate", post(handlers::deactivate_kill_switch))
        .route("/api/risk/limits", get(handlers::get_limits))
        .route("/api/risk/limits", put(handlers::put_limits))
        .route("/api/rebalance/targets", put(handlers::put_rebalance_targets))
        .route("/api/orders", post(handlers::submit_order))
        .route("/api/orders/:broker_order_id/cancel", post(handlers::cancel_order))
        .route("/api/orders/:broker_order_id/retry", post(handlers::retry_order))
        .route("/api/queue/counts", get(handlers::queue_counts))
        .route("/api/queue/items/:id", get(handlers::get_work_item))
        .route("/api/queue/items/:id/requeue", post(handlers::requeue_work_item))
        .route("/api/queue/items/:id/dead-letter", post(handlers::dead_letter_work_item))
        .route("/api/breaker", get(handlers::breaker_stats))
        .route("/api/breaker/reset", post(handlers::reset_breaker))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{OrderRequest, OrderSide};
use crate::error::StewardError;
use crate::orchestrator::{CancelOrderPayload, OperatingMode, SubmitOrderPayload};
use crate::queue::JobType;
use crate::risk::RiskLimits;

use super::AppState;

/// Error envelope; maps domain errors onto HTTP status codes.
pub struct ApiError(StewardError);

impl From<StewardError> for ApiError {
    fn from(err: StewardError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StewardError::Validation(_) => StatusCode::BAD_REQUEST,
            StewardError::WorkItemNotFound(_) | StewardError::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StewardError::InvalidWorkItemTransition { .. }
            | StewardError::InvalidStateTransition { .. }
            | StewardError::KillSwitchActive(_) => StatusCode::CONFLICT,
            StewardError::CircuitBreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.orchestrator.status().await;
    let metrics = state.orchestrator.executor().metrics().snapshot();
    let breaker = state.orchestrator.executor().breaker().stats().await;
    Json(json!({
        "agent": status,
        "execution": metrics,
        "breaker": breaker,
    }))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    Json(state.orchestrator.recent_history(params.limit.min(500)).await)
}

pub async fn positions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.positions().await)
}

pub async fn start_agent(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.orchestrator.start().await?;
    Ok(Json(json!({ "running": true })))
}

pub async fn stop_agent(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.stop().await;
    Json(json!({ "running": false }))
}

pub async fn pause_agent(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.pause().await;
    Json(json!({ "mode": state.orchestrator.mode().await }))
}

pub async fn resume_agent(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.resume().await;
    Json(json!({ "mode": state.orchestrator.mode().await }))
}

#[derive(Deserialize)]
pub struct ModeRequest {
    pub mode: OperatingMode,
}

pub async fn set_mode(
    State(state): State<AppState>,
    Json(body): Json<ModeRequest>,
) -> impl IntoResponse {
    state.orchestrator.set_mode(body.mode).await;
    Json(json!({ "mode": body.mode }))
}

#[derive(Deserialize)]
pub struct KillSwitchRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn activate_kill_switch(
    State(state): State<AppState>,
    Json(body): Json<KillSwitchRequest>,
) -> impl IntoResponse {
    let reason = body.reason.unwrap_or_else(|| "operator request".to_string());
    state.orchestrator.activate_kill_switch(&reason).await;
    Json(json!({ "kill_switch_active": true }))
}

pub async fn deactivate_kill_switch(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.deactivate_kill_switch().await;
    Json(json!({ "kill_switch_active": false }))
}

pub async fn get_limits(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.limits().await)
}

pub async fn put_limits(
    State(state): State<AppState>,
    Json(limits): Json<RiskLimits>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.update_limits(limits).await?;
    Ok(Json(state.orchestrator.limits().await))
}

#[derive(Deserialize, Serialize)]
pub struct ManualOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub notional: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Operator-submitted order; queued like any other trade so it gets the
/// same idempotency and retry treatment.
pub async fn submit_order(
    State(state): State<AppState>,
    Json(body): Json<ManualOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = match (body.qty, body.notional) {
        (Some(qty), None) if qty > Decimal::ZERO => {
            OrderRequest::market(&body.symbol, body.side, qty)
        }
        (None, Some(notional)) if notional > Decimal::ZERO => {
            OrderRequest::market_notional(&body.symbol, body.side, notional)
        }
        _ => {
            return Err(StewardError::Validation(
                "exactly one of qty or notional must be set and positive".to_string(),
            )
            .into())
        }
    };

    let payload = serde_json::to_value(SubmitOrderPayload {
        request,
        reason: body.reason.unwrap_or_else(|| "manual order".to_string()),
    })
    .map_err(StewardError::from)?;

    let result = state
        .orchestrator
        .job_store()
        .enqueue(JobType::SubmitOrder, payload, None)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "work_item_id": result.item().id,
            "duplicate": result.is_duplicate(),
        })),
    ))
}

/// Queue a cancel for a broker order. Keyed per order id, so repeated
/// requests for the same order collapse into one work item.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(broker_order_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let payload = serde_json::to_value(CancelOrderPayload {
        broker_order_id: broker_order_id.clone(),
    })
    .map_err(StewardError::from)?;

    let result = state
        .orchestrator
        .job_store()
        .enqueue(
            JobType::CancelOrder,
            payload,
            Some(format!("cancel:{}", broker_order_id)),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "work_item_id": result.item().id,
            "duplicate": result.is_duplicate(),
        })),
    ))
}

/// Per-symbol allocation targets for the rebalancer, in percent of
/// portfolio value. Symbols without a target fall back to the single
/// position cap.
pub async fn put_rebalance_targets(
    State(state): State<AppState>,
    Json(targets): Json<std::collections::HashMap<String, Decimal>>,
) -> ApiResult<impl IntoResponse> {
    for (symbol, target) in &targets {
        if *target < Decimal::ZERO || *target > Decimal::from(100) {
            return Err(StewardError::Validation(format!(
                "target for {} must be between 0 and 100",
                symbol
            ))
            .into());
        }
    }
    state.orchestrator.set_rebalance_targets(targets).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Resubmit an unfilled terminal order under a fresh client id.
pub async fn retry_order(
    State(state): State<AppState>,
    Path(broker_order_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let result = state.orchestrator.retry_order(&broker_order_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "work_item_id": result.item().id,
            "duplicate": result.is_duplicate(),
        })),
    ))
}

pub async fn queue_counts(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let counts = state.orchestrator.job_store().counts().await?;
    let view: std::collections::HashMap<&'static str, u64> = counts
        .into_iter()
        .map(|(status, n)| (status.as_str(), n))
        .collect();
    Ok(Json(view))
}

pub async fn get_work_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let item = state.orchestrator.job_store().get(id).await?;
    Ok(Json(item))
}

/// Operator requeue of a failed or dead-lettered item; attempts reset.
pub async fn requeue_work_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let item = state.orchestrator.job_store().requeue(id).await?;
    Ok(Json(item))
}

/// Operator decision to stop retrying a failed item.
pub async fn dead_letter_work_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let item = state.orchestrator.job_store().bury(id).await?;
    Ok(Json(item))
}

pub async fn breaker_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.executor().breaker().stats().await)
}

pub async fn reset_breaker(State(state): State<AppState>) -> impl IntoResponse {
    let breaker = state.orchestrator.executor().breaker();
    breaker.reset().await;
    Json(breaker.stats().await)
}

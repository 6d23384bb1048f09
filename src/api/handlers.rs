//! Request handlers. Each one parses its input, calls one pipeline entry point and
//! renders the result as JSON.

use super::{AppState, error::ApiError};
use crate::{
    core::{
        approval::{self, AddressCollectionOutcome, DecisionOutcome, DecisionRequest},
        executions::{get_rule, propose_execution},
        orchestrator,
        report::{MaintenanceSummary, OrchestratorSummary, ProcessorSummary},
        scheduled_orders,
        timing::RunOptions,
    },
    models::{GiftProduct, ShippingAddress},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn run_options(body: Option<Json<RunOptions>>) -> RunOptions {
    body.map(|Json(options)| options).unwrap_or_default()
}

/// POST /jobs/auto-gift
pub async fn run_auto_gift(
    State(state): State<AppState>,
    body: Option<Json<RunOptions>>,
) -> ApiResult<OrchestratorSummary> {
    Ok(Json(orchestrator::run(&state.pipeline, run_options(body)).await?))
}

/// POST /jobs/scheduled-orders
pub async fn run_scheduled_orders(
    State(state): State<AppState>,
    body: Option<Json<RunOptions>>,
) -> ApiResult<ProcessorSummary> {
    Ok(Json(
        scheduled_orders::run(&state.pipeline, run_options(body)).await?,
    ))
}

/// POST /jobs/approval-maintenance
pub async fn run_approval_maintenance(
    State(state): State<AppState>,
    body: Option<Json<RunOptions>>,
) -> ApiResult<MaintenanceSummary> {
    Ok(Json(
        approval::run_maintenance(&state.pipeline, run_options(body)).await?,
    ))
}

/// Body of `POST /rules/{id}/executions`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalBody {
    occurrence_date: NaiveDate,
    products: Vec<GiftProduct>,
    #[serde(flatten)]
    options: RunOptions,
}

/// Body of a created proposal
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalOutcome {
    execution_id: i64,
    status: String,
    total_amount_cents: i64,
}

/// POST /rules/{id}/executions
pub async fn propose(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(body): Json<ProposalBody>,
) -> Result<(StatusCode, Json<ProposalOutcome>), ApiError> {
    let db = &state.pipeline.db;
    let rule = get_rule(db, rule_id).await?;
    let execution = propose_execution(
        db,
        &rule,
        body.occurrence_date,
        &body.products,
        body.options.is_simulated(),
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ProposalOutcome {
            execution_id: execution.id,
            status: execution.status,
            total_amount_cents: execution.total_amount_cents,
        }),
    ))
}

/// Body of `POST /executions/{id}/decision`
#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    #[serde(flatten)]
    request: DecisionRequest,
    #[serde(flatten)]
    options: RunOptions,
}

/// POST /executions/{id}/decision
pub async fn decide(
    State(state): State<AppState>,
    Path(execution_id): Path<i64>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<DecisionOutcome> {
    Ok(Json(
        approval::decide(&state.pipeline, execution_id, body.request, body.options).await?,
    ))
}

/// POST /address-collection/{token}?simulatedDate=YYYY-MM-DD
pub async fn collect_address(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(options): Query<RunOptions>,
    Json(address): Json<ShippingAddress>,
) -> ApiResult<AddressCollectionOutcome> {
    Ok(Json(
        approval::record_collected_address(&state.pipeline, &token, address, options).await?,
    ))
}

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::debt_monitor::{self, SweepReport};
use crate::engine::directory;
use crate::engine::lifecycle::{self, DisputeResolution};
use crate::engine::settlement;
use crate::error::AppError;
use crate::models::courier::Courier;
use crate::models::order::Order;
use crate::models::settlement::{DailySettlementSummary, PaymentReceipt, Settlement};
use crate::state::AppState;

/// Mounted under `/admin`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers/blocked", get(blocked_couriers))
        .route("/couriers/:id/approve", post(approve_courier))
        .route("/couriers/:id/reject", post(reject_courier))
        .route("/couriers/:id/block", post(block_courier))
        .route("/couriers/:id/unblock", post(unblock_courier))
        .route("/settlements/daily", get(daily_summary))
        .route("/settlements/history", get(settlement_history))
        .route("/settlements/:courier_id/pay", post(mark_as_paid))
        .route("/debt-check", post(debt_check))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/disputes", get(list_disputes))
        .route("/disputes/:id/resolve", post(resolve_dispute))
}

#[derive(Deserialize)]
pub struct AdminRequest {
    pub admin_id: Uuid,
}

#[derive(Deserialize)]
pub struct RejectCourierRequest {
    pub admin_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct BlockRequest {
    pub admin_id: Uuid,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct UnblockRequest {
    pub admin_id: Uuid,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct DailyQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub courier_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct PayRequest {
    pub admin_id: Uuid,
    pub amount: Option<Decimal>,
}

#[derive(Deserialize, Serialize)]
pub struct Settings {
    pub commission_amount: Decimal,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub admin_id: Uuid,
    pub resolution: DisputeResolution,
    pub notes: Option<String>,
}

async fn blocked_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    Json(directory::list_blocked(&state))
}

async fn approve_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdminRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::approve(&state, id, payload.admin_id).map(Json)
}

async fn reject_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::reject(&state, id, payload.admin_id, payload.reason.as_deref()).map(Json)
}

async fn block_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BlockRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::block(&state, id, payload.admin_id, &payload.reason).map(Json)
}

async fn unblock_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UnblockRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::unblock(&state, id, payload.admin_id, payload.force).map(Json)
}

async fn daily_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DailyQuery>,
) -> Json<DailySettlementSummary> {
    let date = query
        .date
        .unwrap_or_else(|| state.clock.now().date_naive());
    Json(settlement::daily_summary(&state, date))
}

async fn settlement_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Settlement>> {
    Json(settlement::history(&state, query.courier_id))
}

async fn mark_as_paid(
    State(state): State<Arc<AppState>>,
    Path(courier_id): Path<Uuid>,
    Json(payload): Json<PayRequest>,
) -> Result<Json<PaymentReceipt>, AppError> {
    settlement::mark_as_paid(&state, courier_id, payload.admin_id, payload.amount).map(Json)
}

async fn debt_check(State(state): State<Arc<AppState>>) -> Json<SweepReport> {
    Json(debt_monitor::run_end_of_day_sweep(&state))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(Settings {
        commission_amount: state.commission.current(),
    })
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Settings>,
) -> Result<Json<Settings>, AppError> {
    let commission_amount = state.commission.set(payload.commission_amount)?;
    tracing::info!(commission_amount = %commission_amount, "commission amount updated");
    Ok(Json(Settings { commission_amount }))
}

async fn list_disputes(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(lifecycle::list_disputes(&state))
}

async fn resolve_dispute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<Order>, AppError> {
    lifecycle::resolve_dispute(
        &state,
        id,
        payload.admin_id,
        payload.resolution,
        payload.notes.as_deref(),
    )
    .map(Json)
}

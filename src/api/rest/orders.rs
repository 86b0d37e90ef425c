use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::engine::dispatch::{self, MatchStarted};
use crate::engine::lifecycle::{self, OrderFilter};
use crate::error::AppError;
use crate::models::order::{NewOrder, Order};
use crate::models::Actor;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/match", post(start_matching))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/pickup", post(pickup))
        .route("/orders/:id/enroute", post(depart))
        .route("/orders/:id/deliver", post(deliver))
        .route("/orders/:id/complete", post(complete))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/dispute", post(dispute))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    pub order: NewOrder,
    /// Starts matching straight away when present.
    pub zone: Option<String>,
}

#[derive(Serialize)]
pub struct CreateOrderResponse {
    pub order: Order,
    pub matching: Option<MatchStarted>,
}

#[derive(Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: usize,
}

#[derive(Deserialize)]
pub struct MatchRequest {
    pub zone: String,
}

#[derive(Deserialize)]
pub struct CourierRequest {
    pub courier_id: Uuid,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub courier_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct PickupRequest {
    pub courier_id: Uuid,
    pub invoice_image_url: String,
    pub actual_price: Option<Decimal>,
}

#[derive(Deserialize)]
pub struct DeliverRequest {
    pub courier_id: Uuid,
    pub delivery_code: String,
    pub pod_image_url: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub rating: Option<u8>,
    pub comment: Option<String>,
    #[serde(default)]
    pub admin_override: bool,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Option<Actor>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct DisputeRequest {
    pub actor: Option<Actor>,
    pub reason: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, AppError> {
    let order = lifecycle::create_order(&state, payload.order)?;

    let matching = match payload.zone.as_deref() {
        Some(zone) => match dispatch::spawn_matching(&state, order.id, zone) {
            Ok(started) => Some(started),
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "could not start matching for new order");
                None
            }
        },
        None => None,
    };

    Ok(Json(CreateOrderResponse { order, matching }))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
) -> Json<OrderPage> {
    let (orders, total) = lifecycle::list_orders(&state, &filter);
    Json(OrderPage { orders, total })
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    lifecycle::get_order(&state, id).map(Json)
}

async fn start_matching(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MatchRequest>,
) -> Result<Json<MatchStarted>, AppError> {
    dispatch::spawn_matching(&state, id, &payload.zone).map(Json)
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierRequest>,
) -> Result<Json<Order>, AppError> {
    dispatch::accept_order(&state, id, payload.courier_id).map(Json)
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Value>, AppError> {
    dispatch::reject_order(&state, id, payload.courier_id, payload.reason)?;
    Ok(Json(json!({ "order_id": id, "rejected": true })))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PickupRequest>,
) -> Result<Json<Order>, AppError> {
    lifecycle::pickup(
        &state,
        id,
        payload.courier_id,
        &payload.invoice_image_url,
        payload.actual_price,
    )
    .map(Json)
}

async fn depart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierRequest>,
) -> Result<Json<Order>, AppError> {
    lifecycle::depart(&state, id, payload.courier_id).map(Json)
}

async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DeliverRequest>,
) -> Result<Json<Order>, AppError> {
    lifecycle::deliver(
        &state,
        id,
        payload.courier_id,
        &payload.delivery_code,
        payload.pod_image_url,
    )
    .map(Json)
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Order>, AppError> {
    lifecycle::complete(
        &state,
        id,
        payload.rating,
        payload.comment,
        payload.admin_override,
    )
    .map(Json)
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    let actor = payload.actor.unwrap_or(Actor::SYSTEM);
    lifecycle::cancel(&state, id, actor, payload.reason.as_deref()).map(Json)
}

async fn dispute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DisputeRequest>,
) -> Result<Json<Order>, AppError> {
    let actor = payload.actor.unwrap_or(Actor::SYSTEM);
    lifecycle::dispute(&state, id, actor, &payload.reason).map(Json)
}

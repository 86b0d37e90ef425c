use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::directory::{self, CourierFilter};
use crate::engine::settlement;
use crate::error::AppError;
use crate::models::courier::{Courier, DebtStatus, GeoPoint, NewCourier};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/availability", patch(update_availability))
        .route("/couriers/:id/location", patch(update_location))
        .route("/couriers/:id/zones", patch(update_zones))
        .route("/couriers/:id/debt-status", get(debt_status))
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub is_available: bool,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct ZonesRequest {
    pub working_areas: BTreeSet<String>,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewCourier>,
) -> Result<Json<Courier>, AppError> {
    directory::register_courier(&state, payload).map(Json)
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<CourierFilter>,
) -> Json<Vec<Courier>> {
    Json(directory::list_couriers(&state, &filter))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    directory::get_courier(&state, id).map(Json)
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::set_availability(&state, id, payload.is_available).map(Json)
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::update_location(&state, id, payload.location).map(Json)
}

async fn update_zones(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ZonesRequest>,
) -> Result<Json<Courier>, AppError> {
    directory::update_zones(&state, id, payload.working_areas).map(Json)
}

async fn debt_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DebtStatus>, AppError> {
    settlement::debt_status(&state, id).map(Json)
}

use std::collections::BTreeSet;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::courier::{AccountStatus, BlockKind, Courier, GeoPoint, NewCourier};
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierFilter {
    pub available: Option<bool>,
    pub blocked: Option<bool>,
    pub account_status: Option<AccountStatus>,
    pub zone: Option<String>,
}

fn normalize_zones(zones: BTreeSet<String>) -> BTreeSet<String> {
    zones
        .into_iter()
        .map(|zone| zone.trim().to_string())
        .filter(|zone| !zone.is_empty())
        .collect()
}

fn warn_unknown_zones(courier_id: Uuid, zones: &BTreeSet<String>) {
    for zone in zones.iter().filter(|zone| !geo::is_known_zone(zone)) {
        warn!(courier_id = %courier_id, zone = %zone, "zone has no adjacency data");
    }
}

/// New couriers start offline and pending review.
pub fn register_courier(state: &AppState, new_courier: NewCourier) -> Result<Courier, AppError> {
    if new_courier.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if new_courier.phone.trim().is_empty() {
        return Err(AppError::Validation("phone cannot be empty".to_string()));
    }

    let mut courier = new_courier.into_courier(state.clock.now());
    courier.working_areas = normalize_zones(std::mem::take(&mut courier.working_areas));

    // The phone entry guard is held across the insert so two registrations
    // with the same number cannot both pass.
    match state.courier_phones.entry(courier.phone.clone()) {
        Entry::Occupied(_) => {
            return Err(AppError::Conflict(format!(
                "phone {} is already registered",
                courier.phone
            )));
        }
        Entry::Vacant(slot) => {
            state.couriers.insert(courier.id, courier.clone());
            slot.insert(courier.id);
        }
    }

    warn_unknown_zones(courier.id, &courier.working_areas);
    info!(courier_id = %courier.id, zones = courier.working_areas.len(), "courier registered");
    Ok(courier)
}

pub fn get_courier(state: &AppState, courier_id: Uuid) -> Result<Courier, AppError> {
    state
        .couriers
        .get(&courier_id)
        .map(|courier| courier.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))
}

/// Newest registrations first.
pub fn list_couriers(state: &AppState, filter: &CourierFilter) -> Vec<Courier> {
    let mut couriers: Vec<Courier> = state
        .couriers
        .iter()
        .filter(|entry| {
            let courier = entry.value();
            filter.available.is_none_or(|available| courier.is_available == available)
                && filter.blocked.is_none_or(|blocked| courier.is_blocked() == blocked)
                && filter
                    .account_status
                    .is_none_or(|status| courier.account_status == status)
                && filter
                    .zone
                    .as_deref()
                    .is_none_or(|zone| courier.working_areas.contains(zone))
        })
        .map(|entry| entry.value().clone())
        .collect();
    couriers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    couriers
}

pub fn list_blocked(state: &AppState) -> Vec<Courier> {
    list_couriers(
        state,
        &CourierFilter {
            blocked: Some(true),
            ..CourierFilter::default()
        },
    )
}

fn update(
    state: &AppState,
    courier_id: Uuid,
    change: impl FnOnce(&mut Courier) -> Result<(), AppError>,
) -> Result<Courier, AppError> {
    let mut courier = state
        .couriers
        .get_mut(&courier_id)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    let mut candidate = courier.clone();
    change(&mut candidate)?;
    candidate.updated_at = state.clock.now();
    *courier = candidate.clone();
    Ok(candidate)
}

/// Going online is refused while blocked or not yet approved.
pub fn set_availability(state: &AppState, courier_id: Uuid, available: bool) -> Result<Courier, AppError> {
    let now = state.clock.now();
    let courier = update(state, courier_id, |courier| {
        if available {
            if let Some(reason) = courier.block_reason() {
                return Err(AppError::Conflict(format!(
                    "courier {courier_id} is blocked: {reason}"
                )));
            }
            if !courier.is_approved() {
                return Err(AppError::Conflict(format!(
                    "courier {courier_id} is not approved"
                )));
            }
        }

        courier.is_available = available;
        courier.touch(now);
        Ok(())
    })?;

    info!(courier_id = %courier_id, available, "courier availability changed");
    Ok(courier)
}

pub fn update_location(state: &AppState, courier_id: Uuid, location: GeoPoint) -> Result<Courier, AppError> {
    if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng) {
        return Err(AppError::Validation(format!(
            "location out of range: {}, {}",
            location.lat, location.lng
        )));
    }

    let now = state.clock.now();
    update(state, courier_id, |courier| {
        courier.location = Some(location);
        courier.touch(now);
        Ok(())
    })
}

pub fn update_zones(
    state: &AppState,
    courier_id: Uuid,
    zones: BTreeSet<String>,
) -> Result<Courier, AppError> {
    let zones = normalize_zones(zones);
    if zones.is_empty() {
        return Err(AppError::Validation(
            "at least one working zone is required".to_string(),
        ));
    }
    warn_unknown_zones(courier_id, &zones);

    let now = state.clock.now();
    update(state, courier_id, |courier| {
        courier.working_areas = zones;
        courier.touch(now);
        Ok(())
    })
}

pub fn approve(state: &AppState, courier_id: Uuid, admin_id: Uuid) -> Result<Courier, AppError> {
    let courier = update(state, courier_id, |courier| {
        courier.account_status = AccountStatus::Approved;
        Ok(())
    })?;

    info!(courier_id = %courier_id, admin_id = %admin_id, "courier approved");
    Ok(courier)
}

/// Rejected couriers are taken offline.
pub fn reject(
    state: &AppState,
    courier_id: Uuid,
    admin_id: Uuid,
    reason: Option<&str>,
) -> Result<Courier, AppError> {
    let courier = update(state, courier_id, |courier| {
        if courier.current_order_id.is_some() {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} has an active order"
            )));
        }
        courier.account_status = AccountStatus::Rejected;
        courier.is_available = false;
        Ok(())
    })?;

    info!(
        courier_id = %courier_id,
        admin_id = %admin_id,
        reason = reason.unwrap_or("unspecified"),
        "courier rejected"
    );
    Ok(courier)
}

pub fn block(state: &AppState, courier_id: Uuid, admin_id: Uuid, reason: &str) -> Result<Courier, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("block reason is required".to_string()));
    }

    let now = state.clock.now();
    let courier = update(state, courier_id, |courier| {
        if courier.is_blocked() {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} is already blocked"
            )));
        }
        courier.apply_block(BlockKind::Admin, reason.to_string(), now);
        Ok(())
    })?;

    state
        .metrics
        .couriers_blocked_total
        .with_label_values(&[BlockKind::Admin.as_str()])
        .inc();
    warn!(courier_id = %courier_id, admin_id = %admin_id, reason, "courier blocked by admin");
    Ok(courier)
}

/// Refused while the courier still owes money, unless `force` is set. The
/// courier stays offline until it toggles availability itself.
pub fn unblock(state: &AppState, courier_id: Uuid, admin_id: Uuid, force: bool) -> Result<Courier, AppError> {
    let now = state.clock.now();
    let courier = update(state, courier_id, |courier| {
        if !courier.is_blocked() {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} is not blocked"
            )));
        }
        if courier.pending_settlement > Decimal::ZERO && !force {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} still owes {}",
                courier.pending_settlement
            )));
        }
        courier.lift_block(now);
        Ok(())
    })?;

    info!(courier_id = %courier_id, admin_id = %admin_id, force, "courier unblocked");
    Ok(courier)
}

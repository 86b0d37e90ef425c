use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::locks::{Claim, RunGuard};
use crate::engine::scoring::{rank_candidates, RankedCourier};
use crate::error::AppError;
use crate::models::audit::{AuditAction, AuditEntry, AuditResult, EntityType};
use crate::models::courier::Courier;
use crate::models::order::{Order, OrderStatus};
use crate::models::Actor;
use crate::notify::{send_best_effort, Notification};
use crate::observability::audit;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub courier_id: Uuid,
    pub name: String,
    pub position: usize,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub order_id: Uuid,
    pub success: bool,
    pub couriers_notified: usize,
    pub accepted_by: Option<Uuid>,
    pub notifications: Vec<NotificationRecord>,
    pub message: String,
}

/// Ranked candidates for one matching run.
#[derive(Debug, Clone, Serialize)]
pub struct MatchPlan {
    pub order_id: Uuid,
    pub zone: String,
    pub candidates: Vec<RankedCourier>,
    #[serde(skip)]
    items_preview: String,
}

/// What `spawn_matching` reports before the notification loop finishes.
#[derive(Debug, Clone, Serialize)]
pub struct MatchStarted {
    pub order_id: Uuid,
    pub success: bool,
    pub candidates: Vec<RankedCourier>,
    pub message: String,
}

enum Prepared {
    Exhausted(MatchOutcome),
    Ready(MatchPlan, RunGuard),
}

enum Response {
    Stopped,
    Declined,
    TimedOut,
}

/// Ranks couriers for a `REQUESTED` order and notifies them one at a time,
/// each with the configured response window, until one accepts, the order
/// leaves `REQUESTED`, or the list runs out.
pub async fn start_matching(
    state: &Arc<AppState>,
    order_id: Uuid,
    zone: &str,
) -> Result<MatchOutcome, AppError> {
    match prepare(state, order_id, zone)? {
        Prepared::Exhausted(outcome) => Ok(outcome),
        Prepared::Ready(plan, run) => Ok(run_notifications(state.clone(), plan, run).await),
    }
}

/// Like [`start_matching`], but returns once candidates are ranked and leaves
/// the notification loop running in the background.
pub fn spawn_matching(
    state: &Arc<AppState>,
    order_id: Uuid,
    zone: &str,
) -> Result<MatchStarted, AppError> {
    match prepare(state, order_id, zone)? {
        Prepared::Exhausted(outcome) => Ok(MatchStarted {
            order_id,
            success: false,
            candidates: Vec::new(),
            message: outcome.message,
        }),
        Prepared::Ready(plan, run) => {
            let started = MatchStarted {
                order_id,
                success: true,
                candidates: plan.candidates.clone(),
                message: format!("notifying {} couriers", plan.candidates.len()),
            };
            tokio::spawn(run_notifications(state.clone(), plan, run));
            Ok(started)
        }
    }
}

fn prepare(state: &AppState, order_id: Uuid, zone: &str) -> Result<Prepared, AppError> {
    let zone = zone.trim();
    if zone.is_empty() {
        return Err(AppError::Validation("zone is required".to_string()));
    }

    let items_preview = {
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if order.status != OrderStatus::Requested {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {} and cannot be matched",
                order.status
            )));
        }
        order.items_text.chars().take(100).collect::<String>()
    };

    let run = state.locks.begin_run(order_id)?;
    record(
        state,
        AuditAction::MatchingStarted,
        order_id,
        Actor::SYSTEM,
        json!({ "area": zone, "order_items": items_preview }),
        AuditResult::Started,
    );

    let eligible: Vec<Courier> = state
        .couriers
        .iter()
        .filter(|entry| {
            let courier = entry.value();
            courier.can_receive_orders() && courier.current_order_id.is_none()
        })
        .map(|entry| entry.value().clone())
        .collect();

    let candidates = rank_candidates(
        &eligible,
        zone,
        state.clock.now(),
        state.config.max_candidates,
    );

    if candidates.is_empty() {
        warn!(order_id = %order_id, zone, "no eligible couriers for order");
        record(
            state,
            AuditAction::MatchingNoDrivers,
            order_id,
            Actor::SYSTEM,
            json!({ "area": zone }),
            AuditResult::Failed,
        );
        state
            .metrics
            .matching_runs_total
            .with_label_values(&["no_drivers"])
            .inc();
        drop(run);
        state.locks.discard_idle(order_id);

        return Ok(Prepared::Exhausted(MatchOutcome {
            order_id,
            success: false,
            couriers_notified: 0,
            accepted_by: None,
            notifications: Vec::new(),
            message: format!("no couriers available near {zone}"),
        }));
    }

    info!(order_id = %order_id, zone, candidates = candidates.len(), "matching started");

    Ok(Prepared::Ready(
        MatchPlan {
            order_id,
            zone: zone.to_string(),
            candidates,
            items_preview: items_preview.chars().take(50).collect(),
        },
        run,
    ))
}

async fn run_notifications(state: Arc<AppState>, plan: MatchPlan, run: RunGuard) -> MatchOutcome {
    let order_id = plan.order_id;
    let timeout = state.config.notification_timeout;
    let mut notifications = Vec::with_capacity(plan.candidates.len());

    for (index, candidate) in plan.candidates.iter().enumerate() {
        if let Some(reason) = stop_reason(&state, order_id) {
            info!(order_id = %order_id, reason, "stopping notifications");
            break;
        }
        if state.locks.has_declined(order_id, candidate.courier_id) {
            debug!(order_id = %order_id, courier_id = %candidate.courier_id, "courier already declined");
            continue;
        }

        let sent_at = state.clock.now();
        send_best_effort(
            state.notifier.as_ref(),
            Notification {
                courier_id: candidate.courier_id,
                title: "New order".to_string(),
                body: format!("New order in your area - {}...", plan.items_preview),
                data: json!({
                    "order_id": order_id,
                    "type": "new_order",
                    "timeout_secs": timeout.as_secs(),
                }),
            },
        );
        state.locks.record_notified(order_id, candidate.courier_id);
        state.metrics.couriers_notified_total.inc();
        record(
            &state,
            AuditAction::MatchingNotificationSent,
            order_id,
            Actor::SYSTEM,
            json!({
                "courier_id": candidate.courier_id,
                "courier_name": candidate.name,
                "position": index + 1,
                "score": candidate.score,
                "area": plan.zone,
            }),
            AuditResult::Sent,
        );
        notifications.push(NotificationRecord {
            courier_id: candidate.courier_id,
            name: candidate.name.clone(),
            position: index + 1,
            sent_at,
        });

        let deadline = Instant::now() + timeout;
        match wait_for_response(&state, run.signal(), order_id, candidate.courier_id, deadline).await {
            Response::Stopped => break,
            Response::Declined => {
                debug!(order_id = %order_id, courier_id = %candidate.courier_id, "courier declined");
            }
            Response::TimedOut => {
                debug!(order_id = %order_id, courier_id = %candidate.courier_id, "courier timed out");
                record(
                    &state,
                    AuditAction::MatchingTimeout,
                    order_id,
                    Actor::courier(candidate.courier_id),
                    json!({ "timeout_ms": timeout.as_millis() as u64 }),
                    AuditResult::Timeout,
                );
            }
        }
    }

    drop(run);

    let accepted_by = state
        .orders
        .get(&order_id)
        .filter(|order| order.status != OrderStatus::Requested)
        .and_then(|order| order.courier_id);

    record(
        &state,
        AuditAction::MatchingNotificationsSent,
        order_id,
        Actor::SYSTEM,
        json!({
            "couriers_notified": notifications.len(),
            "couriers": notifications,
            "accepted_by": accepted_by,
        }),
        AuditResult::Success,
    );

    let outcome_label = match (accepted_by, stop_reason(&state, order_id)) {
        (Some(_), _) => "accepted",
        (None, Some(_)) => "stopped",
        (None, None) => "unclaimed",
    };
    state
        .metrics
        .matching_runs_total
        .with_label_values(&[outcome_label])
        .inc();
    info!(
        order_id = %order_id,
        notified = notifications.len(),
        outcome = outcome_label,
        "matching finished"
    );

    MatchOutcome {
        order_id,
        success: true,
        couriers_notified: notifications.len(),
        accepted_by,
        message: format!("order sent to {} couriers", notifications.len()),
        notifications,
    }
}

/// Waits for the awaited courier to answer, the order to be claimed or
/// leave `REQUESTED`, or the deadline to pass. Wake-ups only prompt a
/// re-check of persisted state.
async fn wait_for_response(
    state: &AppState,
    signal: &Notify,
    order_id: Uuid,
    courier_id: Uuid,
    deadline: Instant,
) -> Response {
    loop {
        if stop_reason(state, order_id).is_some() {
            return Response::Stopped;
        }
        if state.locks.has_declined(order_id, courier_id) {
            return Response::Declined;
        }
        if tokio::time::timeout_at(deadline, signal.notified()).await.is_err() {
            break;
        }
    }

    if stop_reason(state, order_id).is_some() {
        Response::Stopped
    } else {
        Response::TimedOut
    }
}

fn stop_reason(state: &AppState, order_id: Uuid) -> Option<&'static str> {
    if state.locks.is_locked(order_id) {
        return Some("order taken");
    }
    match state.orders.get(&order_id) {
        None => Some("order removed"),
        Some(order) if order.status != OrderStatus::Requested => Some("order left REQUESTED"),
        Some(_) => None,
    }
}

/// First accept wins. The lock test-and-set and the conditional
/// `REQUESTED -> ASSIGNED` update happen as one step; every later caller gets
/// a conflict without touching the order.
pub fn accept_order(state: &AppState, order_id: Uuid, courier_id: Uuid) -> Result<Order, AppError> {
    let now = state.clock.now();

    if !state.orders.contains_key(&order_id) {
        return Err(AppError::NotFound(format!("order {order_id} not found")));
    }

    let mut courier = state
        .couriers
        .get_mut(&courier_id)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    if let Some(block) = &courier.block {
        return Err(AppError::Conflict(format!(
            "courier {courier_id} is blocked: {}",
            block.reason
        )));
    }
    if !courier.is_approved() {
        return Err(AppError::Conflict(format!(
            "courier {courier_id} is not approved"
        )));
    }
    if let Some(active) = courier.current_order_id {
        return Err(AppError::Conflict(format!(
            "courier {courier_id} already holds active order {active}"
        )));
    }

    let claim = state.locks.claim(order_id, courier_id, || {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::Conflict(format!("order {order_id} is no longer available")))?;
        if order.status != OrderStatus::Requested {
            return Err(AppError::Conflict(format!(
                "order {order_id} is no longer available"
            )));
        }

        order.courier_id = Some(courier_id);
        order.status = OrderStatus::Assigned;
        order.assigned_at = Some(now);
        order.updated_at = now;
        Ok(order.clone())
    });

    match claim {
        Ok(Claim::Won(order)) => {
            courier.is_available = false;
            courier.current_order_id = Some(order_id);
            courier.touch(now);
            drop(courier);

            let response_time = now - order.created_at;
            record(
                state,
                AuditAction::MatchingAccepted,
                order_id,
                Actor::courier(courier_id),
                json!({
                    "accepted_at": now,
                    "response_time_ms": response_time.num_milliseconds(),
                }),
                AuditResult::Success,
            );
            state
                .metrics
                .acceptances_total
                .with_label_values(&["success"])
                .inc();
            state
                .metrics
                .acceptance_latency_seconds
                .observe(response_time.num_milliseconds().max(0) as f64 / 1000.0);
            state
                .metrics
                .order_transitions_total
                .with_label_values(&[OrderStatus::Assigned.as_str()])
                .inc();

            state
                .locks
                .schedule_release(order_id, courier_id, state.config.lock_retention);
            state.publish_order_update(&order);
            info!(order_id = %order_id, courier_id = %courier_id, "order accepted");
            Ok(order)
        }
        Ok(Claim::Taken { by }) => {
            drop(courier);
            record(
                state,
                AuditAction::MatchingAcceptRejected,
                order_id,
                Actor::courier(courier_id),
                json!({ "reason": "already_taken", "taken_by": by }),
                AuditResult::Rejected,
            );
            state
                .metrics
                .acceptances_total
                .with_label_values(&["taken"])
                .inc();
            debug!(order_id = %order_id, courier_id = %courier_id, "order already taken");
            Err(AppError::Conflict(format!("order {order_id} already taken")))
        }
        Err(err) => {
            drop(courier);
            state.locks.discard_idle(order_id);
            record(
                state,
                AuditAction::MatchingAcceptRejected,
                order_id,
                Actor::courier(courier_id),
                json!({ "reason": "no_longer_available" }),
                AuditResult::Rejected,
            );
            state
                .metrics
                .acceptances_total
                .with_label_values(&["unavailable"])
                .inc();
            Err(err)
        }
    }
}

/// A courier passing on an order it was offered.
pub fn reject_order(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    reason: Option<String>,
) -> Result<(), AppError> {
    if !state.orders.contains_key(&order_id) {
        return Err(AppError::NotFound(format!("order {order_id} not found")));
    }

    record(
        state,
        AuditAction::MatchingRejected,
        order_id,
        Actor::courier(courier_id),
        json!({ "reason": reason.as_deref().unwrap_or("rejected") }),
        AuditResult::Rejected,
    );
    state.locks.decline(order_id, courier_id);
    Ok(())
}

fn record(
    state: &AppState,
    action: AuditAction,
    order_id: Uuid,
    actor: Actor,
    details: Value,
    result: AuditResult,
) {
    audit::record(
        state.audit.as_ref(),
        AuditEntry::new(
            action,
            EntityType::Order,
            order_id,
            actor,
            details,
            result,
            state.clock.now(),
        ),
    );
}

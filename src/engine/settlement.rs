use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{BlockKind, DebtStatus};
use crate::models::order::OrderStatus;
use crate::models::settlement::{
    CommissionPosted, CourierBalance, DailySettlementSummary, PaymentReceipt, Settlement,
    SettlementStatus,
};
use crate::state::AppState;

const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct Charge {
    pub total_pending: Decimal,
    pub blocked: bool,
}

/// Posts a completed order's commission to its courier's balance. Each order
/// is posted at most once.
pub fn add_commission(state: &AppState, order_id: Uuid) -> Result<CommissionPosted, AppError> {
    let now = state.clock.now();

    let courier_id = state
        .orders
        .get(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?
        .courier_id
        .ok_or_else(|| AppError::Conflict(format!("order {order_id} has no courier")))?;
    if !state.couriers.contains_key(&courier_id) {
        return Err(AppError::NotFound(format!("courier {courier_id} not found")));
    }

    let commission = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status != OrderStatus::Completed {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {} and has no commission due",
                order.status
            )));
        }
        if order.commission_posted_at.is_some() {
            return Err(AppError::Conflict(format!(
                "commission for order {order_id} already posted"
            )));
        }

        order.commission_posted_at = Some(now);
        order.commission_amount
    };

    let charge = charge(state, courier_id, commission, "commission")?;
    info!(
        order_id = %order_id,
        courier_id = %courier_id,
        commission = %commission,
        total_pending = %charge.total_pending,
        "commission posted"
    );

    Ok(CommissionPosted {
        order_id,
        courier_id,
        commission,
        total_pending: charge.total_pending,
        blocked: charge.blocked,
    })
}

/// Adds `amount` to the courier's balance and blocks it the moment the
/// balance reaches the debt threshold.
pub fn charge(
    state: &AppState,
    courier_id: Uuid,
    amount: Decimal,
    what: &str,
) -> Result<Charge, AppError> {
    let now = state.clock.now();
    let threshold = state.config.debt_threshold;

    let mut courier = state
        .couriers
        .get_mut(&courier_id)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    courier.pending_settlement += amount;
    courier.updated_at = now;

    let mut blocked = false;
    if courier.pending_settlement >= threshold && !courier.is_blocked() {
        let reason = format!("accumulated debt: {}", courier.pending_settlement);
        courier.apply_block(BlockKind::Debt, reason, now);
        blocked = true;
    }
    let total_pending = courier.pending_settlement;
    drop(courier);

    if blocked {
        state
            .metrics
            .couriers_blocked_total
            .with_label_values(&[BlockKind::Debt.as_str()])
            .inc();
        warn!(
            courier_id = %courier_id,
            total_pending = %total_pending,
            what,
            "courier blocked for debt"
        );
    }

    Ok(Charge {
        total_pending,
        blocked,
    })
}

/// Records a payment against the courier's balance. `amount` defaults to the
/// whole balance; paying more than is owed, or nothing, is rejected.
pub fn mark_as_paid(
    state: &AppState,
    courier_id: Uuid,
    paid_by: Uuid,
    amount: Option<Decimal>,
) -> Result<PaymentReceipt, AppError> {
    let now = state.clock.now();
    let threshold = state.config.debt_threshold;

    let period_start = {
        let courier = state
            .couriers
            .get(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        previous_period_end(state, courier_id).unwrap_or(courier.created_at)
    };
    let orders_count = completed_orders_between(state, courier_id, period_start, now);

    let (settled, remaining, is_blocked) = {
        let mut courier = state
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        let balance = courier.pending_settlement;
        let settled = amount.unwrap_or(balance);
        if settled <= Decimal::ZERO {
            return Err(AppError::Validation(if balance.is_zero() {
                format!("courier {courier_id} has nothing to settle")
            } else {
                "payment amount must be positive".to_string()
            }));
        }
        if settled > balance {
            return Err(AppError::Validation(format!(
                "payment of {settled} exceeds outstanding balance of {balance}"
            )));
        }

        courier.pending_settlement = balance - settled;
        courier.updated_at = now;
        if courier.pending_settlement.is_zero() {
            courier.last_settled_at = Some(now);
        }

        let debt_block = courier.block.as_ref().is_some_and(|block| block.kind.is_debt());
        if debt_block && courier.pending_settlement < threshold {
            courier.lift_block(now);
        }

        (settled, courier.pending_settlement, courier.is_blocked())
    };

    let settlement = Settlement {
        id: Uuid::new_v4(),
        courier_id,
        amount: settled,
        orders_count,
        period_start,
        period_end: now,
        status: SettlementStatus::Paid,
        paid_at: Some(now),
        paid_by: Some(paid_by),
        created_at: now,
    };
    state.settlements.insert(settlement.id, settlement.clone());

    info!(
        courier_id = %courier_id,
        paid_by = %paid_by,
        amount = %settled,
        remaining = %remaining,
        "settlement recorded"
    );

    Ok(PaymentReceipt {
        settlement,
        remaining_debt: remaining,
        is_blocked,
    })
}

fn previous_period_end(state: &AppState, courier_id: Uuid) -> Option<DateTime<Utc>> {
    state
        .settlements
        .iter()
        .filter(|settlement| settlement.courier_id == courier_id)
        .map(|settlement| settlement.period_end)
        .max()
}

fn completed_orders_between(
    state: &AppState,
    courier_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> u32 {
    state
        .orders
        .iter()
        .filter(|order| {
            order.courier_id == Some(courier_id)
                && order.status == OrderStatus::Completed
                && order
                    .completed_at
                    .is_some_and(|at| at > start && at <= end)
        })
        .count() as u32
}

/// Couriers owing money (largest balance first) and the payments taken on
/// `date` (UTC).
pub fn daily_summary(state: &AppState, date: NaiveDate) -> DailySettlementSummary {
    let mut couriers: Vec<CourierBalance> = state
        .couriers
        .iter()
        .filter(|courier| courier.pending_settlement > Decimal::ZERO)
        .map(|courier| CourierBalance {
            courier_id: courier.id,
            name: courier.name.clone(),
            phone: courier.phone.clone(),
            pending_settlement: courier.pending_settlement,
            is_blocked: courier.is_blocked(),
        })
        .collect();
    couriers.sort_by(|a, b| b.pending_settlement.cmp(&a.pending_settlement));

    let day_start = date.and_hms_opt(0, 0, 0).map(|start| start.and_utc());
    let mut settlements: Vec<Settlement> = match day_start {
        Some(start) => state
            .settlements
            .iter()
            .filter(|settlement| {
                settlement
                    .paid_at
                    .is_some_and(|at| at >= start && at < start + Duration::days(1))
            })
            .map(|settlement| settlement.value().clone())
            .collect(),
        None => Vec::new(),
    };
    settlements.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    DailySettlementSummary {
        date,
        total_pending: couriers.iter().map(|courier| courier.pending_settlement).sum(),
        couriers_count: couriers.len(),
        couriers,
        paid_total: settlements.iter().map(|settlement| settlement.amount).sum(),
        settlements,
    }
}

/// Newest first, capped at 100 records.
pub fn history(state: &AppState, courier_id: Option<Uuid>) -> Vec<Settlement> {
    let mut settlements: Vec<Settlement> = state
        .settlements
        .iter()
        .filter(|settlement| courier_id.is_none_or(|id| settlement.courier_id == id))
        .map(|settlement| settlement.value().clone())
        .collect();
    settlements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    settlements.truncate(HISTORY_LIMIT);
    settlements
}

pub fn debt_status(state: &AppState, courier_id: Uuid) -> Result<DebtStatus, AppError> {
    state
        .couriers
        .get(&courier_id)
        .map(|courier| DebtStatus::from(courier.value()))
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))
}

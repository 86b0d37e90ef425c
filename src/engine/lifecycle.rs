use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::settlement;
use crate::error::AppError;
use crate::models::order::{DeliveryCode, NewOrder, Order, OrderStatus, Review};
use crate::models::Actor;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    Refund,
    Penalty,
    None,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub fn create_order(state: &AppState, new_order: NewOrder) -> Result<Order, AppError> {
    if new_order.items_text.trim().is_empty() {
        return Err(AppError::Validation("items_text cannot be empty".to_string()));
    }
    if new_order.delivery_address.trim().is_empty() {
        return Err(AppError::Validation(
            "delivery_address cannot be empty".to_string(),
        ));
    }
    if new_order
        .estimated_price
        .is_some_and(|price| price.is_sign_negative())
    {
        return Err(AppError::Validation(
            "estimated_price cannot be negative".to_string(),
        ));
    }

    let order = new_order.into_order(
        state.config.delivery_fee,
        state.commission.current(),
        state.clock.now(),
    );
    state.orders.insert(order.id, order.clone());
    state
        .metrics
        .order_transitions_total
        .with_label_values(&[OrderStatus::Requested.as_str()])
        .inc();
    state.publish_order_update(&order);

    info!(order_id = %order.id, customer_id = %order.customer_id, "order created");
    Ok(order)
}

pub fn get_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get(&order_id)
        .map(|order| order.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

/// Newest first.
pub fn list_orders(state: &AppState, filter: &OrderFilter) -> (Vec<Order>, usize) {
    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| {
            let order = entry.value();
            filter.status.is_none_or(|status| order.status == status)
                && filter.customer_id.is_none_or(|id| order.customer_id == id)
                && filter.courier_id.is_none_or(|id| order.courier_id == Some(id))
        })
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = orders.len();
    let page = orders
        .into_iter()
        .skip(filter.offset.unwrap_or(0))
        .take(filter.limit.unwrap_or(20))
        .collect();
    (page, total)
}

/// Applies `change` to a copy of the order and stores it only if every guard
/// passed, so a rejected transition never leaves a partial mutation.
fn transition(
    state: &AppState,
    order_id: Uuid,
    change: impl FnOnce(&mut Order) -> Result<(), AppError>,
) -> Result<Order, AppError> {
    let updated = {
        let mut stored = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let before = stored.status;
        let mut candidate = stored.clone();
        change(&mut candidate)?;
        candidate.updated_at = state.clock.now();
        *stored = candidate.clone();

        if before != candidate.status {
            state
                .metrics
                .order_transitions_total
                .with_label_values(&[candidate.status.as_str()])
                .inc();
        }
        candidate
    };

    state.publish_order_update(&updated);
    Ok(updated)
}

fn require_assignee(order: &Order, courier_id: Uuid) -> Result<(), AppError> {
    if order.courier_id != Some(courier_id) {
        return Err(AppError::Conflict(format!(
            "order {} is not assigned to courier {courier_id}",
            order.id
        )));
    }
    Ok(())
}

fn require_status(order: &Order, allowed: &[OrderStatus], action: &str) -> Result<(), AppError> {
    if !allowed.contains(&order.status) {
        return Err(AppError::Conflict(format!(
            "cannot {action} order {} in status {}",
            order.id, order.status
        )));
    }
    Ok(())
}

fn touch_courier(state: &AppState, courier_id: Uuid) {
    if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
        courier.touch(state.clock.now());
    }
}

/// `ASSIGNED -> PICKED_UP` once the courier uploads the shop invoice.
pub fn pickup(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    invoice_image_url: &str,
    actual_price: Option<Decimal>,
) -> Result<Order, AppError> {
    let now = state.clock.now();
    let order = transition(state, order_id, |order| {
        require_assignee(order, courier_id)?;
        require_status(order, &[OrderStatus::Assigned], "pick up")?;
        if invoice_image_url.trim().is_empty() {
            return Err(AppError::Validation("invoice image is required".to_string()));
        }
        if actual_price.is_some_and(|price| price.is_sign_negative()) {
            return Err(AppError::Validation(
                "actual_price cannot be negative".to_string(),
            ));
        }

        order.invoice_image_url = Some(invoice_image_url.trim().to_string());
        if actual_price.is_some() {
            order.estimated_price = actual_price;
        }
        order.status = OrderStatus::PickedUp;
        order.picked_at = Some(now);
        Ok(())
    })?;

    touch_courier(state, courier_id);
    info!(order_id = %order_id, courier_id = %courier_id, "order picked up");
    Ok(order)
}

/// `PICKED_UP -> EN_ROUTE`
pub fn depart(state: &AppState, order_id: Uuid, courier_id: Uuid) -> Result<Order, AppError> {
    let now = state.clock.now();
    let order = transition(state, order_id, |order| {
        require_assignee(order, courier_id)?;
        require_status(order, &[OrderStatus::PickedUp], "depart with")?;

        order.status = OrderStatus::EnRoute;
        order.en_route_at = Some(now);
        Ok(())
    })?;

    touch_courier(state, courier_id);
    info!(order_id = %order_id, courier_id = %courier_id, "order en route");
    Ok(order)
}

/// `EN_ROUTE | PICKED_UP -> DELIVERED` when the courier enters the customer's
/// code. A wrong code changes nothing and can simply be retried.
pub fn deliver(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    code: &str,
    pod_image_url: Option<String>,
) -> Result<Order, AppError> {
    let now = state.clock.now();
    let code = code.trim();
    let order = transition(state, order_id, |order| {
        require_assignee(order, courier_id)?;
        require_status(
            order,
            &[OrderStatus::EnRoute, OrderStatus::PickedUp],
            "deliver",
        )?;
        if !DeliveryCode::is_well_formed(code) {
            return Err(AppError::Validation(
                "delivery code must be 4 digits".to_string(),
            ));
        }
        if !order.delivery_code.matches(code) {
            return Err(AppError::Validation("incorrect delivery code".to_string()));
        }

        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(now);
        if let Some(url) = pod_image_url.filter(|url| !url.trim().is_empty()) {
            order.pod_image_url = Some(url);
        }
        Ok(())
    })?;

    touch_courier(state, courier_id);
    info!(order_id = %order_id, courier_id = %courier_id, "order delivered");
    Ok(order)
}

/// `DELIVERED -> COMPLETED`. A rating in `1..=5` is required unless an admin
/// overrides. Posts the commission, frees the courier and refreshes its
/// rating.
pub fn complete(
    state: &AppState,
    order_id: Uuid,
    rating: Option<u8>,
    comment: Option<String>,
    admin_override: bool,
) -> Result<Order, AppError> {
    let now = state.clock.now();

    let courier_id = {
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        order.courier_id
    };
    if let Some(courier_id) = courier_id {
        if !state.couriers.contains_key(&courier_id) {
            return Err(AppError::NotFound(format!("courier {courier_id} not found")));
        }
    }

    let order = transition(state, order_id, |order| {
        require_status(order, &[OrderStatus::Delivered], "complete")?;
        match rating {
            Some(value) if !(1..=5).contains(&value) => {
                return Err(AppError::Validation(
                    "rating must be between 1 and 5".to_string(),
                ));
            }
            None if !admin_override => {
                return Err(AppError::Validation(
                    "a rating (1-5) is required to complete the order".to_string(),
                ));
            }
            _ => {}
        }

        order.status = OrderStatus::Completed;
        order.completed_at = Some(now);
        order.driver_share = Some(order.compute_driver_share());
        Ok(())
    })?;

    if let Some(courier_id) = order.courier_id {
        if let Some(value) = rating {
            let review = Review {
                id: Uuid::new_v4(),
                order_id,
                customer_id: order.customer_id,
                courier_id,
                rating: value,
                comment,
                created_at: now,
            };
            state.reviews.insert(review.id, review);
        }

        settlement::add_commission(state, order_id)?;

        let (average, count) = rating_summary(state, courier_id);
        if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
            courier.release_order(now);
            if rating.is_some() {
                courier.rating = average;
                courier.total_deliveries = count;
            }
        }
    }

    info!(
        order_id = %order_id,
        driver_share = %order.driver_share.unwrap_or_default(),
        "order completed"
    );
    Ok(order)
}

/// Mean of every rating the courier ever received, to one decimal place.
fn rating_summary(state: &AppState, courier_id: Uuid) -> (f64, u32) {
    let ratings: Vec<u8> = state
        .reviews
        .iter()
        .filter(|review| review.courier_id == courier_id)
        .map(|review| review.rating)
        .collect();

    if ratings.is_empty() {
        return (0.0, 0);
    }
    let sum: u32 = ratings.iter().map(|rating| *rating as u32).sum();
    let average = sum as f64 / ratings.len() as f64;
    ((average * 10.0).round() / 10.0, ratings.len() as u32)
}

/// Any non-terminal order can be canceled. An assigned courier goes back
/// online and any matching run for the order stops.
pub fn cancel(
    state: &AppState,
    order_id: Uuid,
    actor: Actor,
    reason: Option<&str>,
) -> Result<Order, AppError> {
    let now = state.clock.now();
    let reason = reason
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or("unspecified");

    let order = transition(state, order_id, |order| {
        if order.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }

        order.status = OrderStatus::Canceled;
        order.canceled_at = Some(now);
        order.append_note(&format!("canceled: {reason} (by {actor})"));
        Ok(())
    })?;

    if let Some(courier_id) = order.courier_id {
        free_courier(state, courier_id, order_id);
    }
    state.locks.release(order_id);

    info!(order_id = %order_id, actor = %actor, reason, "order canceled");
    Ok(order)
}

/// Flags a non-terminal order for admin review.
pub fn dispute(state: &AppState, order_id: Uuid, actor: Actor, reason: &str) -> Result<Order, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("dispute reason is required".to_string()));
    }

    let order = transition(state, order_id, |order| {
        if order.status.is_terminal() || order.status == OrderStatus::Dispute {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {} and cannot be disputed",
                order.status
            )));
        }

        order.status = OrderStatus::Dispute;
        order.dispute_flag = true;
        order.dispute_reason = Some(format!("{reason} (reported by {actor})"));
        Ok(())
    })?;

    state.locks.wake(order_id);
    info!(order_id = %order_id, actor = %actor, "order disputed");
    Ok(order)
}

pub fn list_disputes(state: &AppState) -> Vec<Order> {
    let (orders, _) = list_orders(
        state,
        &OrderFilter {
            status: Some(OrderStatus::Dispute),
            limit: Some(usize::MAX),
            ..OrderFilter::default()
        },
    );
    orders
}

/// Closes a disputed order as `COMPLETED`. A penalty is charged to the
/// courier's balance and goes through the debt-block rule like a commission.
pub fn resolve_dispute(
    state: &AppState,
    order_id: Uuid,
    admin_id: Uuid,
    resolution: DisputeResolution,
    notes: Option<&str>,
) -> Result<Order, AppError> {
    let now = state.clock.now();
    let notes = notes.unwrap_or("").trim();

    let order = transition(state, order_id, |order| {
        require_status(order, &[OrderStatus::Dispute], "resolve")?;

        match resolution {
            DisputeResolution::Refund => order.append_note(&format!("[REFUND] {notes}")),
            DisputeResolution::Penalty => order.append_note(&format!("[PENALTY] {notes}")),
            DisputeResolution::None if !notes.is_empty() => order.append_note(notes),
            DisputeResolution::None => {}
        }
        order.status = OrderStatus::Completed;
        order.completed_at = Some(now);
        order.dispute_flag = false;
        order.driver_share = Some(order.compute_driver_share());
        Ok(())
    })?;

    if let Some(courier_id) = order.courier_id {
        if resolution == DisputeResolution::Penalty {
            settlement::charge(
                state,
                courier_id,
                state.config.dispute_penalty,
                "dispute penalty",
            )?;
        }
        free_courier(state, courier_id, order_id);
    }
    state.locks.release(order_id);

    info!(order_id = %order_id, resolved_by = %Actor::admin(admin_id), ?resolution, "dispute resolved");
    Ok(order)
}

fn free_courier(state: &AppState, courier_id: Uuid, order_id: Uuid) {
    if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
        if courier.current_order_id == Some(order_id) {
            courier.release_order(state.clock.now());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::{
        cancel, complete, create_order, deliver, depart, dispute, list_disputes, list_orders,
        pickup, resolve_dispute, DisputeResolution, OrderFilter,
    };
    use crate::config::Config;
    use crate::engine::dispatch::accept_order;
    use crate::error::AppError;
    use crate::models::courier::{AccountStatus, NewCourier};
    use crate::models::order::{NewOrder, OrderStatus};
    use crate::models::Actor;
    use crate::state::AppState;

    const INVOICE: &str = "https://cdn.example.test/invoices/1.jpg";

    fn online_courier(state: &AppState) -> Uuid {
        let mut courier = NewCourier {
            user_id: None,
            name: "Khaled".to_string(),
            phone: "+962791111111".to_string(),
            plate_number: None,
            working_areas: BTreeSet::from(["عبدون".to_string()]),
        }
        .into_courier(state.clock.now());
        courier.account_status = AccountStatus::Approved;
        courier.is_available = true;
        let id = courier.id;
        state.couriers.insert(id, courier);
        id
    }

    fn new_order(customer_id: Uuid) -> NewOrder {
        NewOrder {
            customer_id,
            items_text: "pharmacy pickup".to_string(),
            estimated_price: Some(dec!(10)),
            delivery_address: "Khalda, building 7".to_string(),
            delivery_location: None,
            pickup_address: Some("Abdoun pharmacy".to_string()),
            pickup_location: None,
            notes: None,
        }
    }

    fn assigned(state: &AppState) -> (Uuid, Uuid) {
        let courier_id = online_courier(state);
        let order_id = create_order(state, new_order(Uuid::new_v4())).unwrap().id;
        accept_order(state, order_id, courier_id).unwrap();
        (order_id, courier_id)
    }

    fn code_of(state: &AppState, order_id: Uuid) -> String {
        state
            .orders
            .get(&order_id)
            .unwrap()
            .delivery_code
            .as_str()
            .to_string()
    }

    fn status_of(state: &AppState, order_id: Uuid) -> OrderStatus {
        state.orders.get(&order_id).unwrap().status
    }

    #[test]
    fn happy_path_completes_and_posts_commission() {
        let state = AppState::new(Config::default());
        state.commission.set(dec!(2.5)).unwrap();
        let (order_id, courier_id) = assigned(&state);

        let picked = pickup(&state, order_id, courier_id, INVOICE, Some(dec!(12))).unwrap();
        assert_eq!(picked.status, OrderStatus::PickedUp);
        assert_eq!(picked.estimated_price, Some(dec!(12)));

        depart(&state, order_id, courier_id).unwrap();
        let code = code_of(&state, order_id);
        let delivered = deliver(&state, order_id, courier_id, &code, None).unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);

        let completed = complete(&state, order_id, Some(5), Some("fast".to_string()), false).unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        assert_eq!(completed.commission_amount, dec!(2.5));
        assert_eq!(completed.driver_share, Some(dec!(11)));
        assert!(completed.assigned_at.is_some());
        assert!(completed.picked_at.is_some());
        assert!(completed.en_route_at.is_some());
        assert!(completed.delivered_at.is_some());
        assert!(completed.completed_at.is_some());

        let courier = state.couriers.get(&courier_id).unwrap();
        assert_eq!(courier.pending_settlement, dec!(2.5));
        assert_eq!(courier.rating, 5.0);
        assert_eq!(courier.total_deliveries, 1);
        assert!(courier.is_available);
        assert_eq!(courier.current_order_id, None);
        assert_eq!(state.reviews.len(), 1);
    }

    #[test]
    fn delivery_code_is_fixed_for_the_life_of_the_order() {
        let state = AppState::new(Config::default());
        let customer = Uuid::new_v4();
        let created = create_order(&state, new_order(customer)).unwrap();
        let code = created.delivery_code.as_str().to_string();
        assert_eq!(code.len(), 4);

        let courier_id = online_courier(&state);
        accept_order(&state, created.id, courier_id).unwrap();
        assert_eq!(code_of(&state, created.id), code);
        pickup(&state, created.id, courier_id, INVOICE, None).unwrap();
        assert_eq!(code_of(&state, created.id), code);
        depart(&state, created.id, courier_id).unwrap();
        assert_eq!(code_of(&state, created.id), code);
        deliver(&state, created.id, courier_id, &code, None).unwrap();
        assert_eq!(code_of(&state, created.id), code);
        let completed = complete(&state, created.id, Some(4), None, false).unwrap();
        assert_eq!(completed.delivery_code.as_str(), code);

        let (canceled_id, courier_id) = assigned(&state);
        let before = code_of(&state, canceled_id);
        pickup(&state, canceled_id, courier_id, INVOICE, None).unwrap();
        let canceled = cancel(&state, canceled_id, Actor::customer(customer), Some("too late")).unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(canceled.delivery_code.as_str(), before);
    }

    #[test]
    fn rejected_transitions_leave_the_order_untouched() {
        let state = AppState::new(Config::default());
        let (order_id, courier_id) = assigned(&state);
        let before = state.orders.get(&order_id).unwrap().clone();

        assert!(matches!(
            depart(&state, order_id, courier_id),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            pickup(&state, order_id, Uuid::new_v4(), INVOICE, None),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            pickup(&state, order_id, courier_id, "  ", None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            complete(&state, order_id, Some(5), None, false),
            Err(AppError::Conflict(_))
        ));

        let after = state.orders.get(&order_id).unwrap().clone();
        assert_eq!(after.status, OrderStatus::Assigned);
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.invoice_image_url, None);
        assert_eq!(after.picked_at, None);
    }

    #[test]
    fn wrong_delivery_code_can_be_retried() {
        let state = AppState::new(Config::default());
        let (order_id, courier_id) = assigned(&state);
        pickup(&state, order_id, courier_id, INVOICE, None).unwrap();
        depart(&state, order_id, courier_id).unwrap();

        let code = code_of(&state, order_id);
        let wrong = if code == "1000" { "1001" } else { "1000" };

        assert!(matches!(
            deliver(&state, order_id, courier_id, wrong, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            deliver(&state, order_id, courier_id, "12a4", None),
            Err(AppError::Validation(_))
        ));
        assert_eq!(status_of(&state, order_id), OrderStatus::EnRoute);
        assert_eq!(code_of(&state, order_id), code);

        let delivered = deliver(
            &state,
            order_id,
            courier_id,
            &code,
            Some("https://cdn.example.test/pod/1.jpg".to_string()),
        )
        .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(delivered.pod_image_url.is_some());
    }

    #[test]
    fn delivery_straight_from_pickup_is_allowed() {
        let state = AppState::new(Config::default());
        let (order_id, courier_id) = assigned(&state);
        pickup(&state, order_id, courier_id, INVOICE, None).unwrap();

        let code = code_of(&state, order_id);
        let delivered = deliver(&state, order_id, courier_id, &code, None).unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.en_route_at, None);
    }

    #[test]
    fn completion_needs_a_valid_rating_unless_overridden() {
        let state = AppState::new(Config::default());
        let (order_id, courier_id) = assigned(&state);
        pickup(&state, order_id, courier_id, INVOICE, None).unwrap();
        let code = code_of(&state, order_id);
        deliver(&state, order_id, courier_id, &code, None).unwrap();

        assert!(matches!(
            complete(&state, order_id, None, None, false),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            complete(&state, order_id, Some(6), None, false),
            Err(AppError::Validation(_))
        ));
        assert_eq!(status_of(&state, order_id), OrderStatus::Delivered);
        assert_eq!(
            state.couriers.get(&courier_id).unwrap().pending_settlement,
            Decimal::ZERO
        );

        let completed = complete(&state, order_id, None, None, true).unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);

        let courier = state.couriers.get(&courier_id).unwrap();
        assert_eq!(courier.pending_settlement, dec!(1.5));
        assert_eq!(courier.total_deliveries, 0);
        assert!(state.reviews.is_empty());
    }

    #[test]
    fn cancel_frees_the_courier_and_is_final() {
        let state = AppState::new(Config::default());
        let (order_id, courier_id) = assigned(&state);
        let customer = Actor::customer(Uuid::new_v4());

        let canceled = cancel(&state, order_id, customer, Some("ordered twice")).unwrap();

        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(canceled.canceled_at.is_some());
        assert!(
            canceled
                .notes
                .as_deref()
                .is_some_and(|notes| notes.contains("canceled: ordered twice (by customer"))
        );
        let courier = state.couriers.get(&courier_id).unwrap().clone();
        assert!(courier.is_available);
        assert_eq!(courier.current_order_id, None);
        assert!(state.locks.snapshot(order_id).is_none());

        assert!(matches!(
            cancel(&state, order_id, customer, None),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            dispute(&state, order_id, customer, "late"),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            pickup(&state, order_id, courier_id, INVOICE, None),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn requested_order_can_be_canceled_without_courier() {
        let state = AppState::new(Config::default());
        let order_id = create_order(&state, new_order(Uuid::new_v4())).unwrap().id;

        let canceled = cancel(&state, order_id, Actor::SYSTEM, None).unwrap();

        assert_eq!(canceled.courier_id, None);
        assert!(canceled.notes.as_deref().is_some_and(|notes| notes.contains("unspecified")));
    }

    #[test]
    fn penalty_resolution_charges_courier_and_completes_order() {
        let state = AppState::new(Config::default());
        let (order_id, courier_id) = assigned(&state);
        pickup(&state, order_id, courier_id, INVOICE, None).unwrap();
        let customer = Actor::customer(Uuid::new_v4());

        assert!(matches!(
            dispute(&state, order_id, customer, " "),
            Err(AppError::Validation(_))
        ));
        let disputed = dispute(&state, order_id, customer, "items missing").unwrap();
        assert_eq!(disputed.status, OrderStatus::Dispute);
        assert!(disputed.dispute_flag);
        assert!(matches!(
            dispute(&state, order_id, customer, "again"),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(list_disputes(&state).len(), 1);

        let resolved = resolve_dispute(
            &state,
            order_id,
            Uuid::new_v4(),
            DisputeResolution::Penalty,
            Some("courier kept the change"),
        )
        .unwrap();

        assert_eq!(resolved.status, OrderStatus::Completed);
        assert!(!resolved.dispute_flag);
        assert!(resolved.driver_share.is_some());
        assert!(
            resolved
                .notes
                .as_deref()
                .is_some_and(|notes| notes.contains("[PENALTY] courier kept the change"))
        );
        assert!(list_disputes(&state).is_empty());

        let courier = state.couriers.get(&courier_id).unwrap();
        assert_eq!(courier.pending_settlement, dec!(5));
        assert_eq!(courier.current_order_id, None);
        assert!(courier.is_available);
    }

    #[test]
    fn orders_are_listed_newest_first_with_filters() {
        let state = AppState::new(Config::default());
        let customer = Uuid::new_v4();
        for _ in 0..3 {
            create_order(&state, new_order(customer)).unwrap();
        }
        let other = create_order(&state, new_order(Uuid::new_v4())).unwrap();
        cancel(&state, other.id, Actor::SYSTEM, None).unwrap();

        let (mine, total) = list_orders(
            &state,
            &OrderFilter {
                customer_id: Some(customer),
                limit: Some(2),
                ..OrderFilter::default()
            },
        );
        assert_eq!(total, 3);
        assert_eq!(mine.len(), 2);
        assert!(mine[0].created_at >= mine[1].created_at);

        let (canceled, _) = list_orders(
            &state,
            &OrderFilter {
                status: Some(OrderStatus::Canceled),
                ..OrderFilter::default()
            },
        );
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].id, other.id);
    }

    #[test]
    fn order_creation_validates_and_fills_pricing() {
        let state = AppState::new(Config::default());

        let mut empty = new_order(Uuid::new_v4());
        empty.items_text = " ".to_string();
        assert!(matches!(
            create_order(&state, empty),
            Err(AppError::Validation(_))
        ));

        let mut negative = new_order(Uuid::new_v4());
        negative.estimated_price = Some(dec!(-1));
        assert!(matches!(
            create_order(&state, negative),
            Err(AppError::Validation(_))
        ));

        let order = create_order(&state, new_order(Uuid::new_v4())).unwrap();
        assert_eq!(order.status, OrderStatus::Requested);
        assert_eq!(order.delivery_fee, dec!(1.5));
        assert_eq!(order.commission_amount, dec!(1.5));
        assert_eq!(order.pickup_address, "Abdoun pharmacy");
    }
}

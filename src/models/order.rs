use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Requested,
    Assigned,
    PickedUp,
    EnRoute,
    Delivered,
    Completed,
    Canceled,
    Dispute,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Requested => "REQUESTED",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::EnRoute => "EN_ROUTE",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Dispute => "DISPUTE",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The 4-digit code the customer hands the courier at the door.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryCode(String);

impl DeliveryCode {
    pub fn generate() -> Self {
        let code: u16 = rand::thread_rng().gen_range(1000..=9999);
        Self(code.to_string())
    }

    pub fn is_well_formed(candidate: &str) -> bool {
        candidate.len() == 4 && candidate.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub items_text: String,
    pub estimated_price: Option<Decimal>,
    pub delivery_fee: Decimal,
    pub commission_amount: Decimal,
    /// Only known once the order is completed.
    pub driver_share: Option<Decimal>,
    pub delivery_code: DeliveryCode,
    pub invoice_image_url: Option<String>,
    pub pod_image_url: Option<String>,
    pub pickup_address: String,
    pub pickup_location: Option<GeoPoint>,
    pub delivery_address: String,
    pub delivery_location: Option<GeoPoint>,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub dispute_flag: bool,
    pub dispute_reason: Option<String>,
    pub commission_posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_at: Option<DateTime<Utc>>,
    pub en_route_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// `(estimated price + delivery fee) - commission`
    pub fn compute_driver_share(&self) -> Decimal {
        self.estimated_price.unwrap_or(Decimal::ZERO) + self.delivery_fee - self.commission_amount
    }

    pub fn append_note(&mut self, note: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        });
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub items_text: String,
    pub estimated_price: Option<Decimal>,
    pub delivery_address: String,
    pub delivery_location: Option<GeoPoint>,
    pub pickup_address: Option<String>,
    pub pickup_location: Option<GeoPoint>,
    pub notes: Option<String>,
}

impl NewOrder {
    pub fn into_order(self, delivery_fee: Decimal, commission: Decimal, now: DateTime<Utc>) -> Order {
        let pickup_address = self
            .pickup_address
            .filter(|address| !address.trim().is_empty())
            .unwrap_or_else(|| self.delivery_address.clone());

        Order {
            id: Uuid::new_v4(),
            customer_id: self.customer_id,
            courier_id: None,
            items_text: self.items_text,
            estimated_price: self.estimated_price,
            delivery_fee,
            commission_amount: commission,
            driver_share: None,
            delivery_code: DeliveryCode::generate(),
            invoice_image_url: None,
            pod_image_url: None,
            pickup_address,
            pickup_location: self.pickup_location,
            delivery_address: self.delivery_address,
            delivery_location: self.delivery_location,
            notes: self.notes,
            status: OrderStatus::Requested,
            dispute_flag: false,
            dispute_reason: None,
            commission_posted_at: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            picked_at: None,
            en_route_at: None,
            delivered_at: None,
            completed_at: None,
            canceled_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub courier_id: Uuid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

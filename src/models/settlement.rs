use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Paid,
}

/// Immutable record of a courier paying down its commission balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub amount: Decimal,
    pub orders_count: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: SettlementStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionPosted {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub commission: Decimal,
    pub total_pending: Decimal,
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub settlement: Settlement,
    pub remaining_debt: Decimal,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourierBalance {
    pub courier_id: Uuid,
    pub name: String,
    pub phone: String,
    pub pending_settlement: Decimal,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySettlementSummary {
    pub date: NaiveDate,
    pub total_pending: Decimal,
    pub couriers_count: usize,
    pub couriers: Vec<CourierBalance>,
    pub paid_total: Decimal,
    pub settlements: Vec<Settlement>,
}

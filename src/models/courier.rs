use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    PendingReview,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Balance reached the debt threshold when a commission was posted.
    Debt,
    /// The end-of-day grace window ran out with the balance still unpaid.
    DebtGraceExpired,
    Admin,
}

impl BlockKind {
    pub fn is_debt(self) -> bool {
        matches!(self, BlockKind::Debt | BlockKind::DebtGraceExpired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Debt => "debt",
            BlockKind::DebtGraceExpired => "debt_grace_expired",
            BlockKind::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub plate_number: Option<String>,
    pub working_areas: BTreeSet<String>,
    pub location: Option<GeoPoint>,
    pub account_status: AccountStatus,
    pub is_available: bool,
    pub block: Option<Block>,
    pub rating: f64,
    pub total_deliveries: u32,
    pub pending_settlement: Decimal,
    /// Set while the courier holds a non-terminal order.
    pub current_order_id: Option<Uuid>,
    /// When the balance was last brought down to zero.
    pub last_settled_at: Option<DateTime<Utc>>,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn is_blocked(&self) -> bool {
        self.block.is_some()
    }

    pub fn is_approved(&self) -> bool {
        self.account_status == AccountStatus::Approved
    }

    /// Online, approved and not blocked.
    pub fn can_receive_orders(&self) -> bool {
        self.is_available && self.is_approved() && !self.is_blocked()
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.block.as_ref().map(|block| block.reason.as_str())
    }

    /// A blocked courier is never available.
    pub fn apply_block(&mut self, kind: BlockKind, reason: String, now: DateTime<Utc>) {
        self.block = Some(Block {
            kind,
            reason,
            blocked_at: now,
        });
        self.is_available = false;
        self.updated_at = now;
    }

    pub fn lift_block(&mut self, now: DateTime<Utc>) {
        self.block = None;
        self.updated_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
        self.updated_at = now;
    }

    /// Frees the courier after its active order ends. Blocked couriers stay offline.
    pub fn release_order(&mut self, now: DateTime<Utc>) {
        self.current_order_id = None;
        self.is_available = !self.is_blocked();
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCourier {
    pub user_id: Option<Uuid>,
    pub name: String,
    pub phone: String,
    pub plate_number: Option<String>,
    #[serde(default)]
    pub working_areas: BTreeSet<String>,
}

impl NewCourier {
    pub fn into_courier(self, now: DateTime<Utc>) -> Courier {
        Courier {
            id: Uuid::new_v4(),
            user_id: self.user_id.unwrap_or_else(Uuid::new_v4),
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            plate_number: self.plate_number,
            working_areas: self.working_areas,
            location: None,
            account_status: AccountStatus::PendingReview,
            is_available: false,
            block: None,
            rating: 0.0,
            total_deliveries: 0,
            pending_settlement: Decimal::ZERO,
            current_order_id: None,
            last_settled_at: None,
            last_active_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-courier debt view.
#[derive(Debug, Clone, Serialize)]
pub struct DebtStatus {
    pub courier_id: Uuid,
    pub has_debt: bool,
    pub amount: Decimal,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub can_receive_orders: bool,
}

impl From<&Courier> for DebtStatus {
    fn from(courier: &Courier) -> Self {
        Self {
            courier_id: courier.id,
            has_debt: courier.pending_settlement > Decimal::ZERO,
            amount: courier.pending_settlement,
            is_blocked: courier.is_blocked(),
            block_reason: courier.block_reason().map(str::to_string),
            can_receive_orders: !courier.is_blocked() && courier.pending_settlement.is_zero(),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Actor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    MatchingStarted,
    MatchingNoDrivers,
    MatchingNotificationSent,
    MatchingTimeout,
    MatchingAccepted,
    MatchingAcceptRejected,
    MatchingRejected,
    MatchingNotificationsSent,
    DebtWarningSent,
    DriverBlockedDebt,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Order,
    Courier,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Started,
    Sent,
    Success,
    Failed,
    Rejected,
    Timeout,
    Warned,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub actor: Actor,
    pub details: Value,
    pub result: AuditResult,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity_type: EntityType,
        entity_id: Uuid,
        actor: Actor,
        details: Value,
        result: AuditResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type,
            entity_id,
            actor,
            details,
            result,
            created_at,
        }
    }
}

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::{AuditAction, AuditEntry};

/// Append-only record of significant dispatch and debt actions.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<(), AppError>;

    /// Entries for `entity_id` with the given action, oldest first.
    fn entries_for(&self, action: AuditAction, entity_id: Uuid) -> Result<Vec<AuditEntry>, AppError>;

    fn len(&self) -> usize;
}

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: DashMap<Uuid, AuditEntry>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: AuditEntry) -> Result<(), AppError> {
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    fn entries_for(&self, action: AuditAction, entity_id: Uuid) -> Result<Vec<AuditEntry>, AppError> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.action == action && entry.entity_id == entity_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Audit writes never fail the operation that triggered them.
pub fn record(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action;
    let entity_id = entry.entity_id;
    if let Err(err) = sink.append(entry) {
        tracing::warn!(?action, entity_id = %entity_id, error = %err, "audit write failed");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use super::{AuditSink, MemoryAuditLog};
    use crate::models::audit::{AuditAction, AuditEntry, AuditResult, EntityType};
    use crate::models::Actor;

    #[test]
    fn entries_are_filtered_and_sorted_oldest_first() {
        let log = MemoryAuditLog::new();
        let courier = Uuid::new_v4();
        let now = Utc::now();

        for offset in [5, 1, 3] {
            log.append(AuditEntry::new(
                AuditAction::DebtWarningSent,
                EntityType::Courier,
                courier,
                Actor::SYSTEM,
                json!({ "offset": offset }),
                AuditResult::Warned,
                now + Duration::hours(offset),
            ))
            .unwrap();
        }
        log.append(AuditEntry::new(
            AuditAction::DriverBlockedDebt,
            EntityType::Courier,
            courier,
            Actor::SYSTEM,
            json!({}),
            AuditResult::Blocked,
            now,
        ))
        .unwrap();

        let warnings = log.entries_for(AuditAction::DebtWarningSent, courier).unwrap();
        let offsets: Vec<i64> = warnings
            .iter()
            .map(|entry| entry.details["offset"].as_i64().unwrap())
            .collect();

        assert_eq!(offsets, vec![1, 3, 5]);
        assert_eq!(log.len(), 4);
    }
}

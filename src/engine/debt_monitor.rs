use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::{AuditAction, AuditEntry, AuditResult, EntityType};
use crate::models::courier::BlockKind;
use crate::models::Actor;
use crate::notify::{send_best_effort, Notification};
use crate::observability::audit;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct WarnedCourier {
    pub courier_id: Uuid,
    pub name: String,
    pub phone: String,
    pub debt: Decimal,
    pub hours_until_block: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedCourier {
    pub courier_id: Uuid,
    pub name: String,
    pub phone: String,
    pub debt: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub warned: Vec<WarnedCourier>,
    pub blocked: Vec<BlockedCourier>,
    /// Couriers skipped because a collaborator failed while handling them.
    pub failed: Vec<Uuid>,
}

enum Verdict {
    Warn { hours_until_block: f64 },
    Block { warned_for: chrono::Duration },
    Wait,
}

/// One end-of-day pass over every courier that owes money. Unblocked debtors
/// are warned first; once the first warning of the current debt episode is
/// older than the grace window they are blocked. Already-blocked couriers are
/// left alone, so re-running the sweep is harmless.
pub fn run_end_of_day_sweep(state: &AppState) -> SweepReport {
    let debtors: Vec<Uuid> = state
        .couriers
        .iter()
        .filter(|courier| courier.pending_settlement > Decimal::ZERO && !courier.is_blocked())
        .map(|courier| courier.id)
        .collect();

    let mut report = SweepReport::default();
    for courier_id in debtors {
        if let Err(err) = sweep_courier(state, courier_id, &mut report) {
            error!(courier_id = %courier_id, error = %err, "debt check failed for courier");
            report.failed.push(courier_id);
        }
    }

    info!(
        warned = report.warned.len(),
        blocked = report.blocked.len(),
        failed = report.failed.len(),
        "end of day debt check finished"
    );
    report
}

fn sweep_courier(state: &AppState, courier_id: Uuid, report: &mut SweepReport) -> Result<(), AppError> {
    let now = state.clock.now();
    let last_settled_at = match state.couriers.get(&courier_id) {
        Some(courier) => courier.last_settled_at,
        None => return Ok(()),
    };

    let warnings: Vec<DateTime<Utc>> = state
        .audit
        .entries_for(AuditAction::DebtWarningSent, courier_id)?
        .into_iter()
        .map(|entry| entry.created_at)
        .filter(|at| last_settled_at.is_none_or(|settled| *at > settled))
        .collect();

    match verdict(state, &warnings, now) {
        Verdict::Warn { hours_until_block } => warn_courier(state, courier_id, hours_until_block, report),
        Verdict::Block { warned_for } => block_courier(state, courier_id, warned_for, report),
        Verdict::Wait => Ok(()),
    }
}

fn verdict(state: &AppState, warnings: &[DateTime<Utc>], now: DateTime<Utc>) -> Verdict {
    let grace = state.config.debt_grace;
    let (Some(first), Some(latest)) = (warnings.first(), warnings.last()) else {
        return Verdict::Warn {
            hours_until_block: hours(grace),
        };
    };

    let warned_for = now - *first;
    if warned_for >= grace {
        return Verdict::Block { warned_for };
    }
    if now - *latest >= state.config.debt_reminder_interval {
        return Verdict::Warn {
            hours_until_block: hours(grace - warned_for).max(0.0),
        };
    }
    Verdict::Wait
}

fn hours(duration: chrono::Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}

fn warn_courier(
    state: &AppState,
    courier_id: Uuid,
    hours_until_block: f64,
    report: &mut SweepReport,
) -> Result<(), AppError> {
    let now = state.clock.now();
    let (name, phone, debt) = match state.couriers.get(&courier_id) {
        Some(courier) => (
            courier.name.clone(),
            courier.phone.clone(),
            courier.pending_settlement,
        ),
        None => return Ok(()),
    };

    send_best_effort(
        state.notifier.as_ref(),
        Notification {
            courier_id,
            title: "Unpaid balance".to_string(),
            body: format!(
                "You owe {debt}. Settle within {hours_until_block:.0} hours to keep receiving orders."
            ),
            data: json!({ "type": "debt_warning", "amount": debt }),
        },
    );

    state.audit.append(AuditEntry::new(
        AuditAction::DebtWarningSent,
        EntityType::Courier,
        courier_id,
        Actor::SYSTEM,
        json!({
            "pending_settlement": debt,
            "hours_until_block": hours_until_block,
            "reminder": hours_until_block < hours(state.config.debt_grace),
        }),
        AuditResult::Warned,
        now,
    ))?;

    warn!(courier_id = %courier_id, debt = %debt, hours_until_block, "debt warning sent");
    report.warned.push(WarnedCourier {
        courier_id,
        name,
        phone,
        debt,
        hours_until_block,
    });
    Ok(())
}

fn block_courier(
    state: &AppState,
    courier_id: Uuid,
    warned_for: chrono::Duration,
    report: &mut SweepReport,
) -> Result<(), AppError> {
    let now = state.clock.now();

    let blocked = {
        let Some(mut courier) = state.couriers.get_mut(&courier_id) else {
            return Ok(());
        };
        // Paid or blocked since the sweep started.
        if courier.is_blocked() || courier.pending_settlement <= Decimal::ZERO {
            return Ok(());
        }

        let debt = courier.pending_settlement;
        courier.apply_block(
            BlockKind::DebtGraceExpired,
            format!(
                "unpaid debt: {debt} - blocked {} hours after first warning",
                warned_for.num_hours()
            ),
            now,
        );
        BlockedCourier {
            courier_id,
            name: courier.name.clone(),
            phone: courier.phone.clone(),
            debt,
        }
    };

    state
        .metrics
        .couriers_blocked_total
        .with_label_values(&[BlockKind::DebtGraceExpired.as_str()])
        .inc();
    audit::record(
        state.audit.as_ref(),
        AuditEntry::new(
            AuditAction::DriverBlockedDebt,
            EntityType::Courier,
            courier_id,
            Actor::SYSTEM,
            json!({
                "pending_settlement": blocked.debt,
                "warning_age_hours": hours(warned_for),
            }),
            AuditResult::Blocked,
            now,
        ),
    );
    send_best_effort(
        state.notifier.as_ref(),
        Notification {
            courier_id,
            title: "Account suspended".to_string(),
            body: format!(
                "Your balance of {} is overdue. Contact support to settle and resume receiving orders.",
                blocked.debt
            ),
            data: json!({ "type": "debt_block", "amount": blocked.debt }),
        },
    );

    warn!(courier_id = %courier_id, debt = %blocked.debt, "courier blocked after debt grace period");
    report.blocked.push(blocked);
    Ok(())
}

/// Runs the sweep every `interval` until the process exits. The first pass
/// happens one interval after start.
pub async fn run_debt_monitor(state: Arc<AppState>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "debt monitor started");

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = run_end_of_day_sweep(&state);
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "debt check left couriers unprocessed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::run_end_of_day_sweep;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::engine::settlement::{charge, mark_as_paid};
    use crate::error::AppError;
    use crate::models::audit::{AuditAction, AuditEntry};
    use crate::models::courier::{AccountStatus, BlockKind, NewCourier};
    use crate::notify::RecordingNotifier;
    use crate::observability::audit::AuditSink;
    use crate::state::AppState;

    struct Harness {
        state: AppState,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 0).unwrap(),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let state = AppState::new(Config::default())
            .with_clock(clock.clone())
            .with_notifier(notifier.clone());
        Harness {
            state,
            clock,
            notifier,
        }
    }

    fn courier_owing(state: &AppState, amount: rust_decimal::Decimal) -> Uuid {
        let mut courier = NewCourier {
            user_id: None,
            name: "Rami".to_string(),
            phone: "+962790000002".to_string(),
            plate_number: Some("12-3456".to_string()),
            working_areas: BTreeSet::from(["عبدون".to_string()]),
        }
        .into_courier(state.clock.now());
        courier.account_status = AccountStatus::Approved;
        courier.is_available = true;
        let id = courier.id;
        state.couriers.insert(id, courier);
        if !amount.is_zero() {
            charge(state, id, amount, "commission").unwrap();
        }
        id
    }

    #[test]
    fn first_sweep_warns_with_full_grace_window() {
        let h = harness();
        let debtor = courier_owing(&h.state, dec!(12));
        courier_owing(&h.state, dec!(0));

        let report = run_end_of_day_sweep(&h.state);

        assert_eq!(report.warned.len(), 1);
        assert_eq!(report.warned[0].courier_id, debtor);
        assert_eq!(report.warned[0].hours_until_block, 24.0);
        assert!(report.blocked.is_empty());
        assert_eq!(h.notifier.sent_to(debtor).len(), 1);
        assert!(!h.state.couriers.get(&debtor).unwrap().is_blocked());
    }

    #[test]
    fn immediate_rerun_is_idempotent() {
        let h = harness();
        let debtor = courier_owing(&h.state, dec!(12));

        run_end_of_day_sweep(&h.state);
        let second = run_end_of_day_sweep(&h.state);

        assert!(second.warned.is_empty());
        assert!(second.blocked.is_empty());
        assert_eq!(h.notifier.sent_to(debtor).len(), 1);
        let warnings = h
            .state
            .audit
            .entries_for(AuditAction::DebtWarningSent, debtor)
            .unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn reminder_then_block_once_grace_runs_out() {
        let h = harness();
        let debtor = courier_owing(&h.state, dec!(12));

        run_end_of_day_sweep(&h.state);

        h.clock.advance(Duration::hours(12));
        let reminder = run_end_of_day_sweep(&h.state);
        assert_eq!(reminder.warned.len(), 1);
        assert_eq!(reminder.warned[0].hours_until_block, 12.0);

        h.clock.advance(Duration::hours(12));
        let blocking = run_end_of_day_sweep(&h.state);
        assert!(blocking.warned.is_empty());
        assert_eq!(blocking.blocked.len(), 1);
        assert_eq!(blocking.blocked[0].debt, dec!(12));

        let courier = h.state.couriers.get(&debtor).unwrap();
        assert!(courier.is_blocked());
        assert!(!courier.is_available);
        assert_eq!(
            courier.block.as_ref().map(|block| block.kind),
            Some(BlockKind::DebtGraceExpired)
        );
        drop(courier);

        let again = run_end_of_day_sweep(&h.state);
        assert!(again.warned.is_empty());
        assert!(again.blocked.is_empty());
        assert_eq!(
            h.state
                .audit
                .entries_for(AuditAction::DriverBlockedDebt, debtor)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn courier_blocked_at_threshold_is_skipped() {
        let h = harness();
        let debtor = courier_owing(&h.state, dec!(60));

        let report = run_end_of_day_sweep(&h.state);

        assert!(report.warned.is_empty());
        assert!(report.blocked.is_empty());
        assert!(h.notifier.sent_to(debtor).is_empty());
    }

    #[test]
    fn settling_starts_a_fresh_episode() {
        let h = harness();
        let debtor = courier_owing(&h.state, dec!(12));
        run_end_of_day_sweep(&h.state);

        h.clock.advance(Duration::hours(6));
        mark_as_paid(&h.state, debtor, Uuid::new_v4(), None).unwrap();
        h.clock.advance(Duration::hours(30));
        charge(&h.state, debtor, dec!(3), "commission").unwrap();

        let report = run_end_of_day_sweep(&h.state);

        assert!(report.blocked.is_empty());
        assert_eq!(report.warned.len(), 1);
        assert_eq!(report.warned[0].hours_until_block, 24.0);
    }

    struct FailingAudit;

    impl AuditSink for FailingAudit {
        fn append(&self, _entry: AuditEntry) -> Result<(), AppError> {
            Err(AppError::Dependency("audit store offline".to_string()))
        }

        fn entries_for(&self, _action: AuditAction, _entity_id: Uuid) -> Result<Vec<AuditEntry>, AppError> {
            Err(AppError::Dependency("audit store offline".to_string()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn audit_failure_is_isolated_per_courier() {
        let h = harness();
        let state = h.state.with_audit(Arc::new(FailingAudit));
        let first = courier_owing(&state, dec!(5));
        let second = courier_owing(&state, dec!(7));

        let report = run_end_of_day_sweep(&state);

        assert!(report.warned.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.contains(&first));
        assert!(report.failed.contains(&second));
    }
}

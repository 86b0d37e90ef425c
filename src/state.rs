use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{CommissionConfig, Config};
use crate::engine::locks::DispatchLocks;
use crate::models::courier::Courier;
use crate::models::order::{Order, Review};
use crate::models::settlement::Settlement;
use crate::notify::{BroadcastNotifier, DispatchEvent, Notifier};
use crate::observability::audit::{AuditSink, MemoryAuditLog};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub config: Config,
    pub couriers: DashMap<Uuid, Courier>,
    /// Registered phone numbers, one courier each.
    pub courier_phones: DashMap<String, Uuid>,
    pub orders: DashMap<Uuid, Order>,
    pub settlements: DashMap<Uuid, Settlement>,
    pub reviews: DashMap<Uuid, Review>,
    pub locks: DispatchLocks,
    pub commission: CommissionConfig,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
    pub events_tx: broadcast::Sender<DispatchEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));
        let metrics = Metrics::new();

        Self {
            couriers: DashMap::new(),
            courier_phones: DashMap::new(),
            orders: DashMap::new(),
            settlements: DashMap::new(),
            reviews: DashMap::new(),
            locks: DispatchLocks::new(metrics.dispatch_locks_active.clone()),
            commission: CommissionConfig::new(config.commission_amount),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(BroadcastNotifier::new(events_tx.clone())),
            audit: Arc::new(MemoryAuditLog::new()),
            events_tx,
            metrics,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn publish_order_update(&self, order: &Order) {
        let _ = self.events_tx.send(DispatchEvent::OrderUpdated {
            order_id: order.id,
            status: order.status,
            courier_id: order.courier_id,
        });
    }
}

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub courier_id: Uuid,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    Notification(Notification),
    OrderUpdated {
        order_id: Uuid,
        status: crate::models::order::OrderStatus,
        courier_id: Option<Uuid>,
    },
}

/// Fire-and-forget delivery of courier notifications. Callers log failures
/// and carry on.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), AppError>;
}

/// Publishes notifications onto the event bus streamed at `/ws`.
pub struct BroadcastNotifier {
    events_tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastNotifier {
    pub fn new(events_tx: broadcast::Sender<DispatchEvent>) -> Self {
        Self { events_tx }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) -> Result<(), AppError> {
        self.events_tx
            .send(DispatchEvent::Notification(notification))
            .map(|_| ())
            .map_err(|_| AppError::Dependency("no notification subscribers".to_string()))
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_to(&self, courier_id: Uuid) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|notification| notification.courier_id == courier_id)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), AppError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}

/// Logs instead of propagating: notification failures never abort the caller.
pub fn send_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let courier_id = notification.courier_id;
    if let Err(err) = notifier.notify(notification) {
        tracing::debug!(courier_id = %courier_id, error = %err, "notification not delivered");
    }
}

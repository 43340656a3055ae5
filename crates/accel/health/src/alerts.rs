//! Alert delivery.
//!
//! The [`AlertDispatcher`] hands alert events to registered subscribers on a
//! background task, so a slow or broken subscriber never holds up the
//! monitor. Threshold alerts, proactive alerts raised by callers and
//! recovery failures all travel the same path as [`AlertEvent`]s.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use accel_types::{AlertType, DeviceId, DeviceMetrics, HealthStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::AlertError;

/// Severity of an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Default severity for an alert type.
    pub fn for_alert(alert_type: AlertType) -> Self {
        match alert_type {
            AlertType::DeviceError | AlertType::DriverError => AlertSeverity::Critical,
            AlertType::MemoryError => AlertSeverity::Error,
            AlertType::TemperatureHigh | AlertType::PerformanceDegradation => {
                AlertSeverity::Warning
            }
            AlertType::HighMemoryUsage | AlertType::HighComputeUsage => AlertSeverity::Info,
        }
    }
}

/// Where an alert came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertOrigin {
    /// A metric crossed a configured threshold during a health check.
    Threshold,
    /// Raised by a caller outside the monitoring cycle.
    Proactive,
    /// Every recovery strategy failed for a device.
    Recovery,
}

/// An alert delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub origin: AlertOrigin,
    pub message: String,

    /// Snapshot that triggered the alert, for threshold alerts.
    pub metrics: Option<DeviceMetrics>,

    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    fn new(
        device_id: DeviceId,
        alert_type: AlertType,
        origin: AlertOrigin,
        message: String,
        metrics: Option<DeviceMetrics>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            alert_type,
            severity: AlertSeverity::for_alert(alert_type),
            origin,
            message,
            metrics,
            timestamp: Utc::now(),
        }
    }

    /// Alert raised by a health check.
    pub fn threshold(
        device_id: DeviceId,
        alert_type: AlertType,
        status: HealthStatus,
        metrics: DeviceMetrics,
    ) -> Self {
        let message = format!("{} on {} (status {})", alert_type, device_id, status);
        Self::new(device_id, alert_type, AlertOrigin::Threshold, message, Some(metrics))
    }

    /// Alert raised by a caller.
    pub fn proactive(device_id: DeviceId, alert_type: AlertType, message: impl Into<String>) -> Self {
        Self::new(
            device_id,
            alert_type,
            AlertOrigin::Proactive,
            message.into(),
            None,
        )
    }

    /// Alert raised when the recovery cascade is exhausted.
    pub fn recovery_failed(device_id: DeviceId, details: impl Into<String>) -> Self {
        Self {
            severity: AlertSeverity::Critical,
            ..Self::new(
                device_id,
                AlertType::DeviceError,
                AlertOrigin::Recovery,
                details.into(),
                None,
            )
        }
    }
}

/// Receiver of alert events.
#[async_trait]
pub trait AlertSubscriber: Send + Sync {
    /// Handle one event. Errors are logged by the dispatcher and otherwise ignored.
    async fn on_alert(&self, event: &AlertEvent) -> Result<(), AlertError>;
}

/// Adapts a closure into an [`AlertSubscriber`].
pub struct FnSubscriber<F>(F);

impl<F> FnSubscriber<F>
where
    F: Fn(&AlertEvent) -> Result<(), AlertError> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

#[async_trait]
impl<F> AlertSubscriber for FnSubscriber<F>
where
    F: Fn(&AlertEvent) -> Result<(), AlertError> + Send + Sync,
{
    async fn on_alert(&self, event: &AlertEvent) -> Result<(), AlertError> {
        (self.0)(event)
    }
}

/// Subscriber that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<AlertEvent>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().clone()
    }

    pub fn alert_types(&self) -> Vec<AlertType> {
        self.events.lock().iter().map(|e| e.alert_type).collect()
    }
}

#[async_trait]
impl AlertSubscriber for RecordingSubscriber {
    async fn on_alert(&self, event: &AlertEvent) -> Result<(), AlertError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Handle returned by [`AlertDispatcher::add_subscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber:{}", self.0)
    }
}

type Subscribers = Vec<(SubscriberId, Arc<dyn AlertSubscriber>)>;

/// Fire-and-forget alert delivery.
pub struct AlertDispatcher {
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
    deliveries: Mutex<JoinSet<usize>>,
    dispatched: AtomicU64,
    failed_deliveries: Arc<AtomicU64>,
    event_tx: broadcast::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub fn new(channel_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            deliveries: Mutex::new(JoinSet::new()),
            dispatched: AtomicU64::new(0),
            failed_deliveries: Arc::new(AtomicU64::new(0)),
            event_tx,
        }
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn AlertSubscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, subscriber));
        debug!(subscriber = %id, "Alert subscriber added");
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Stream of every dispatched event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }

    /// Total events dispatched.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Total subscriber deliveries that returned an error or panicked.
    pub fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries.load(Ordering::Relaxed)
    }

    /// Deliver an event to every current subscriber without waiting.
    pub fn dispatch(&self, event: AlertEvent) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(event.clone());

        let subscribers: Subscribers = self.subscribers.read().clone();
        if subscribers.is_empty() {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(
                device_id = %event.device_id,
                alert = %event.alert_type,
                "No runtime available, dropping alert delivery"
            );
            return;
        };

        let failed = self.failed_deliveries.clone();
        let mut deliveries = self.deliveries.lock();
        // Reap finished deliveries so the set does not grow without bound
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn_on(
            async move {
                let failures = deliver(&subscribers, &event).await;
                failed.fetch_add(failures as u64, Ordering::Relaxed);
                failures
            },
            &handle,
        );
    }

    /// Wait for every in-flight delivery.
    ///
    /// Returns the number of failed subscriber deliveries among them.
    pub async fn flush(&self) -> usize {
        let mut failures = 0;
        loop {
            let mut pending = std::mem::take(&mut *self.deliveries.lock());
            if pending.is_empty() {
                return failures;
            }
            while let Some(result) = pending.join_next().await {
                match result {
                    Ok(count) => failures += count,
                    Err(e) => error!(error = %e, "Alert delivery task failed"),
                }
            }
        }
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}

async fn deliver(subscribers: &Subscribers, event: &AlertEvent) -> usize {
    let mut failures = 0;
    for (id, subscriber) in subscribers {
        match AssertUnwindSafe(subscriber.on_alert(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                warn!(
                    subscriber = %id,
                    device_id = %event.device_id,
                    alert = %event.alert_type,
                    error = %e,
                    "Alert subscriber failed"
                );
            }
            Err(_) => {
                failures += 1;
                error!(
                    subscriber = %id,
                    device_id = %event.device_id,
                    alert = %event.alert_type,
                    "Alert subscriber panicked"
                );
            }
        }
    }
    failures
}

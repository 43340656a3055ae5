//! Health monitor.
//!
//! The HealthMonitor periodically reads device metrics, evaluates each
//! device, dispatches new alerts and starts the recovery cascade for devices
//! that turn critical or fail. A failure on one device never stops the
//! others from being checked.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use accel_registry::{DeviceRegistry, ResourceAllocator};
use accel_types::{AlertType, DeviceHealthInfo, DeviceId, DeviceMetrics, HealthStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{AlertDispatcher, AlertEvent};
use crate::config::HealthConfig;
use crate::error::{HealthError, HealthResult, MetricsError};
use crate::evaluator;
use crate::metrics::{MetricsReading, MetricsSource};
use crate::recovery::{FailureResponse, RecoveryCascade, RecoveryTarget};

/// Counters reported by [`HealthMonitor::get_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStats {
    /// Device checks performed, one per device per cycle.
    pub total_checks: u64,

    /// Alerts dispatched, threshold and proactive.
    pub alerts_triggered: u64,

    /// Recovery cascades started.
    pub failures_handled: u64,

    /// Recovery cascades that ended in success.
    pub recoveries_completed: u64,
}

#[derive(Debug, Default)]
struct MonitorStats {
    total_checks: AtomicU64,
    alerts_triggered: AtomicU64,
    failures_handled: AtomicU64,
    recoveries_completed: AtomicU64,
}

impl MonitorStats {
    fn snapshot(&self) -> HealthStats {
        HealthStats {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            failures_handled: self.failures_handled.load(Ordering::Relaxed),
            recoveries_completed: self.recoveries_completed.load(Ordering::Relaxed),
        }
    }
}

/// Per-device view returned by [`HealthMonitor::get_device_health_summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHealthSummary {
    pub status: HealthStatus,
    pub metrics: Option<DeviceMetrics>,
    pub active_alerts: Vec<AlertType>,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub quarantined: bool,
    pub recovering: bool,
    pub last_recovery: Option<FailureResponse>,
}

/// What one monitoring cycle observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Status of every registered device after the cycle.
    pub statuses: BTreeMap<DeviceId, HealthStatus>,

    /// Alerts that became active during the cycle.
    pub new_alerts: Vec<(DeviceId, AlertType)>,

    /// Devices whose metrics could not be read or were invalid.
    pub failed_reads: Vec<DeviceId>,

    /// Devices a recovery cascade was started for.
    pub recoveries_started: Vec<DeviceId>,
}

impl CycleReport {
    pub fn status(&self, device_id: DeviceId) -> Option<HealthStatus> {
        self.statuses.get(&device_id).copied()
    }
}

/// Clears a device's recovery flag when dropped.
struct RecoveryGuard {
    registry: Arc<DeviceRegistry>,
    device_id: DeviceId,

    /// Check time of the health record the recovery was started from.
    checked_at: Option<DateTime<Utc>>,
}

impl RecoveryGuard {
    fn acquire(registry: &Arc<DeviceRegistry>, device_id: DeviceId) -> HealthResult<Option<Self>> {
        if !registry.begin_recovery(device_id)? {
            return Ok(None);
        }
        let checked_at = registry
            .health_info(device_id)
            .and_then(|info| info.last_check_time);
        Ok(Some(Self {
            registry: registry.clone(),
            device_id,
            checked_at,
        }))
    }
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.registry.end_recovery(self.device_id);
    }
}

/// Shared state cloned into each recovery task.
#[derive(Clone)]
struct RecoveryRunner {
    allocator: Arc<ResourceAllocator>,
    cascade: Arc<RecoveryCascade>,
    dispatcher: Arc<AlertDispatcher>,
    stats: Arc<MonitorStats>,
    last_recovery: Arc<DashMap<DeviceId, FailureResponse>>,
}

impl RecoveryRunner {
    async fn run(&self, guard: RecoveryGuard, target: RecoveryTarget) -> FailureResponse {
        let device_id = target.device_id;
        self.stats.failures_handled.fetch_add(1, Ordering::Relaxed);

        let response = self.cascade.run(target).await;

        if response.success {
            self.stats
                .recoveries_completed
                .fetch_add(1, Ordering::Relaxed);
            info!(
                device_id = %device_id,
                action = %response.action_taken,
                recovery_time_ms = response.recovery_time_ms,
                "Device recovered"
            );
        } else {
            let details = response
                .error_details
                .clone()
                .unwrap_or_else(|| response.action_taken.clone());
            error!(device_id = %device_id, error = %details, "Device recovery failed");

            // A check that ran while the cascade was in flight has the final word
            let registry = self.allocator.registry();
            let current = registry.update_health(device_id, |info| {
                if info.last_check_time != guard.checked_at {
                    return false;
                }
                info.status = HealthStatus::Failed;
                info.last_error = Some(details.clone());
                if let Err(e) = registry.set_quarantined(device_id, true) {
                    warn!(device_id = %device_id, error = %e, "Could not quarantine device");
                }
                true
            });
            if !current {
                debug!(device_id = %device_id, "Device checked again during recovery, keeping newer status");
            }
            self.stats.alerts_triggered.fetch_add(1, Ordering::Relaxed);
            self.dispatcher.dispatch(AlertEvent::recovery_failed(
                device_id,
                format!("{}: {}", response.action_taken, details),
            ));
        }

        self.last_recovery.insert(device_id, response.clone());
        drop(guard);
        response
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic device health monitor.
pub struct HealthMonitor {
    config: HealthConfig,
    allocator: Arc<ResourceAllocator>,
    source: Arc<dyn MetricsSource>,
    dispatcher: Arc<AlertDispatcher>,
    runner: RecoveryRunner,

    /// Hardware faults raised by callers, merged into the next evaluation.
    latched: DashMap<DeviceId, BTreeSet<AlertType>>,

    stats: Arc<MonitorStats>,
    recoveries: Mutex<JoinSet<()>>,
    loop_handle: Mutex<Option<LoopHandle>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        allocator: Arc<ResourceAllocator>,
        source: Arc<dyn MetricsSource>,
        dispatcher: Arc<AlertDispatcher>,
        cascade: Arc<RecoveryCascade>,
    ) -> Self {
        let stats = Arc::new(MonitorStats::default());
        let runner = RecoveryRunner {
            allocator: allocator.clone(),
            cascade,
            dispatcher: dispatcher.clone(),
            stats: stats.clone(),
            last_recovery: Arc::new(DashMap::new()),
        };
        Self {
            config,
            allocator,
            source,
            dispatcher,
            runner,
            latched: DashMap::new(),
            stats,
            recoveries: Mutex::new(JoinSet::new()),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    fn registry(&self) -> &Arc<DeviceRegistry> {
        self.allocator.registry()
    }

    /// Start the monitoring loop.
    ///
    /// The loop runs its first cycle immediately and then once per
    /// `check_interval`.
    pub fn start(self: &Arc<Self>) -> HealthResult<()> {
        let mut handle = self.loop_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return Err(HealthError::AlreadyRunning);
        }

        let runtime = Handle::try_current().map_err(|e| HealthError::Internal(e.to_string()))?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let interval = self.config.check_interval.max(Duration::from_millis(1));
        let task = runtime.spawn(run_loop(Arc::downgrade(self), interval, shutdown_rx));
        *handle = Some(LoopHandle { shutdown, task });

        info!(interval_ms = interval.as_millis() as u64, "Health monitor started");
        Ok(())
    }

    /// Stop the monitoring loop.
    ///
    /// Cancels the pending cycle, waits for the loop task to exit and then
    /// for every in-flight recovery to finish.
    pub async fn stop(&self) {
        let handle = self.loop_handle.lock().take();
        if let Some(LoopHandle { shutdown, task }) = handle {
            let _ = shutdown.send(true);
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Health monitor loop panicked");
                }
            }
            info!("Health monitor stopped");
        }
        self.wait_for_recoveries().await;
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Run one monitoring cycle over every registered device.
    #[instrument(skip(self))]
    pub async fn check_all(&self) -> CycleReport {
        let mut readings = self.source.refresh_metrics().await;
        let mut report = CycleReport::default();

        for device_id in self.registry().device_ids() {
            let reading = readings
                .remove(&device_id)
                .unwrap_or(Err(MetricsError::Missing));
            self.check_device(device_id, reading, &mut report);
        }

        debug!(
            devices = report.statuses.len(),
            new_alerts = report.new_alerts.len(),
            recoveries = report.recoveries_started.len(),
            "Health check cycle complete"
        );
        report
    }

    fn check_device(&self, device_id: DeviceId, reading: MetricsReading, report: &mut CycleReport) {
        self.stats.total_checks.fetch_add(1, Ordering::Relaxed);
        let registry = self.registry();
        let previous = registry
            .health_info(device_id)
            .map(|info| info.status)
            .unwrap_or(HealthStatus::Healthy);

        let metrics = match reading.map_err(HealthError::from).and_then(|metrics| {
            evaluator::validate(device_id, &metrics)?;
            Ok(metrics)
        }) {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Device health check failed");
                registry.update_health(device_id, |info| info.record_error(e.to_string()));
                report.failed_reads.push(device_id);
                self.settle(device_id, previous, HealthStatus::Failed, BTreeSet::new(), report);
                return;
            }
        };

        if let Err(e) = registry.apply_metrics(device_id, &metrics) {
            warn!(device_id = %device_id, error = %e, "Could not apply device metrics");
        }

        if !metrics.is_available {
            registry.update_health(device_id, |info| info.record_unavailable(metrics));
            self.settle(device_id, previous, HealthStatus::Unavailable, BTreeSet::new(), report);
            return;
        }

        let mut alerts = evaluator::derive_alerts(&metrics, &self.config.thresholds);
        let latched = self
            .latched
            .remove(&device_id)
            .map(|(_, alerts)| alerts)
            .unwrap_or_default();
        alerts.extend(latched.iter().copied());
        let status = evaluator::classify(&alerts);

        let new_alerts = registry.update_health(device_id, |info| {
            info.record_check(status, metrics.clone(), alerts.clone())
        });
        for alert_type in new_alerts {
            report.new_alerts.push((device_id, alert_type));
            // Raised proactively, already delivered
            if latched.contains(&alert_type) {
                continue;
            }
            self.stats.alerts_triggered.fetch_add(1, Ordering::Relaxed);
            self.dispatcher.dispatch(AlertEvent::threshold(
                device_id,
                alert_type,
                status,
                metrics.clone(),
            ));
        }

        self.settle(device_id, previous, status, alerts, report);
    }

    /// Record the outcome of a check: log transitions, update quarantine and
    /// start recovery when needed.
    fn settle(
        &self,
        device_id: DeviceId,
        previous: HealthStatus,
        status: HealthStatus,
        alerts: BTreeSet<AlertType>,
        report: &mut CycleReport,
    ) {
        report.statuses.insert(device_id, status);

        if previous != status {
            info!(
                device_id = %device_id,
                from = %previous,
                to = %status,
                "Device health changed"
            );
        }

        let quarantine = match status {
            HealthStatus::Critical | HealthStatus::Failed => Some(true),
            HealthStatus::Healthy | HealthStatus::Warning => Some(false),
            HealthStatus::Unavailable => None,
        };
        if let Some(quarantined) = quarantine {
            if let Err(e) = self.registry().set_quarantined(device_id, quarantined) {
                warn!(device_id = %device_id, error = %e, "Could not update quarantine");
            }
        }

        if status.needs_recovery() {
            let target = RecoveryTarget::new(device_id, status).with_alerts(alerts);
            if self.spawn_recovery(target) {
                report.recoveries_started.push(device_id);
            }
        }
    }

    /// Start a recovery task unless one is already running for the device.
    fn spawn_recovery(&self, target: RecoveryTarget) -> bool {
        let device_id = target.device_id;
        let guard = match RecoveryGuard::acquire(self.registry(), device_id) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(device_id = %device_id, "Recovery already in progress");
                return false;
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Could not start recovery");
                return false;
            }
        };

        let runner = self.runner.clone();
        let mut recoveries = self.recoveries.lock();
        while let Some(result) = recoveries.try_join_next() {
            log_recovery_join(result);
        }
        recoveries.spawn(async move {
            runner.run(guard, target).await;
        });
        true
    }

    /// Run the recovery cascade for a device and wait for the outcome.
    ///
    /// Fails if the device is unknown or a recovery is already running for it.
    pub async fn recover_device(&self, device_id: DeviceId) -> HealthResult<FailureResponse> {
        let guard = RecoveryGuard::acquire(self.registry(), device_id)?
            .ok_or(HealthError::RecoveryInProgress(device_id))?;
        let info = self
            .registry()
            .health_info(device_id)
            .unwrap_or_else(|| DeviceHealthInfo::new(device_id));
        let target = RecoveryTarget::new(device_id, info.status).with_alerts(info.active_alerts);
        Ok(self.runner.run(guard, target).await)
    }

    /// Wait for every in-flight recovery task to finish.
    pub async fn wait_for_recoveries(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.recoveries.lock());
            if pending.is_empty() {
                return;
            }
            while let Some(result) = pending.join_next().await {
                log_recovery_join(result);
            }
        }
    }

    /// Raise an alert from outside the monitoring cycle.
    ///
    /// Driver and memory faults are also merged into the device's next
    /// evaluation.
    pub fn raise_alert(
        &self,
        device_id: DeviceId,
        alert_type: AlertType,
        message: impl Into<String>,
    ) -> HealthResult<()> {
        if !self.registry().contains(device_id) {
            return Err(HealthError::DeviceNotFound(device_id));
        }

        if alert_type.is_hardware_fault() {
            self.latched.entry(device_id).or_default().insert(alert_type);
        }

        let event = AlertEvent::proactive(device_id, alert_type, message);
        info!(
            device_id = %device_id,
            alert = %alert_type,
            message = %event.message,
            "Proactive alert raised"
        );
        self.stats.alerts_triggered.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.dispatch(event);
        Ok(())
    }

    pub fn get_stats(&self) -> HealthStats {
        self.stats.snapshot()
    }

    /// Outcome of the most recent recovery of a device.
    pub fn last_recovery(&self, device_id: DeviceId) -> Option<FailureResponse> {
        self.runner
            .last_recovery
            .get(&device_id)
            .map(|r| r.value().clone())
    }

    /// Status, metrics and alerts of every registered device.
    pub fn get_device_health_summary(&self) -> BTreeMap<DeviceId, DeviceHealthSummary> {
        let registry = self.registry();
        registry
            .device_ids()
            .into_iter()
            .map(|device_id| {
                let info = registry
                    .health_info(device_id)
                    .unwrap_or_else(|| DeviceHealthInfo::new(device_id));
                let capacity = registry.capacity(device_id);
                let summary = DeviceHealthSummary {
                    status: info.status,
                    metrics: info.metrics,
                    active_alerts: info.active_alerts.into_iter().collect(),
                    error_count: info.error_count,
                    consecutive_failures: info.consecutive_failures,
                    last_check_time: info.last_check_time,
                    last_error: info.last_error,
                    quarantined: capacity.as_ref().is_some_and(|c| c.quarantined),
                    recovering: capacity.as_ref().is_some_and(|c| c.recovering),
                    last_recovery: self.last_recovery(device_id),
                };
                (device_id, summary)
            })
            .collect()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.get_mut().take() {
            handle.task.abort();
        }
    }
}

fn log_recovery_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Recovery task did not complete");
    }
}

async fn run_loop(monitor: Weak<HealthMonitor>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        tokio::select! {
            _ = monitor.check_all() => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Health monitor loop exited");
}

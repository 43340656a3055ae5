//! E2E: monitoring cycles, alerts and the monitor loop.

use std::sync::Arc;
use std::time::Duration;

use accel_health::{AcceleratorPool, AlertOrigin, HealthError, MetricsError, PoolConfig};
use accel_registry::AllocatorConfig;
use accel_tests::{device, init_tracing, no_headroom, Harness, StalledMetricsSource};
use accel_types::{AlertType, DeviceMetrics, DeviceSpec, HealthStatus};

#[tokio::test]
async fn refresh_failure_does_not_block_other_devices() {
    let h = Harness::two_devices().unwrap();
    h.source
        .set_error(device(1), MetricsError::Unreachable("PCIe link down".into()));
    h.source
        .set_metrics(device(2), DeviceMetrics::idle().with_memory_utilization(0.90));

    let report = h.pool.check_all().await;

    assert_eq!(report.status(device(1)), Some(HealthStatus::Failed));
    assert_eq!(report.failed_reads, vec![device(1)]);
    assert_eq!(report.status(device(2)), Some(HealthStatus::Warning));
    assert_eq!(report.new_alerts, vec![(device(2), AlertType::HighMemoryUsage)]);

    h.pool.stop().await;
    let failed = h.pool.device_health(device(1)).unwrap();
    assert_eq!(failed.error_count, 1);
    assert_eq!(failed.consecutive_failures, 1);

    let warned = h.pool.device_health(device(2)).unwrap();
    assert_eq!(warned.status, HealthStatus::Warning);
    assert_eq!(warned.error_count, 0);
}

#[tokio::test]
async fn consecutive_failures_reset_on_recovery() {
    let h = Harness::two_devices().unwrap();
    h.source
        .set_error(device(1), MetricsError::Timeout(250));

    h.pool.check_all().await;
    h.pool.monitor().wait_for_recoveries().await;
    h.pool.check_all().await;
    h.pool.monitor().wait_for_recoveries().await;
    assert_eq!(
        h.pool.device_health(device(1)).unwrap().consecutive_failures,
        2
    );

    h.source.set_metrics(device(1), DeviceMetrics::idle());
    let report = h.pool.check_all().await;
    assert_eq!(report.status(device(1)), Some(HealthStatus::Healthy));

    let health = h.pool.device_health(device(1)).unwrap();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.error_count, 2);
    assert!(!h.pool.allocator().registry().is_quarantined(device(1)));
}

#[tokio::test]
async fn threshold_alerts_share_path_with_proactive_alerts() {
    let h = Harness::two_devices().unwrap();
    let mut events = h.pool.subscribe_events();

    h.pool
        .raise_alert(device(1), AlertType::TemperatureHigh, "fan stalled")
        .unwrap();
    h.source
        .set_metrics(device(2), DeviceMetrics::idle().with_compute_utilization(0.99));
    h.pool.check_all().await;
    h.pool.stop().await;

    let received = h.alerts.events();
    assert_eq!(received.len(), 2);
    let proactive = received
        .iter()
        .find(|e| e.origin == AlertOrigin::Proactive)
        .unwrap();
    assert_eq!(proactive.alert_type, AlertType::TemperatureHigh);
    assert_eq!(proactive.device_id, device(1));
    let threshold = received
        .iter()
        .find(|e| e.origin == AlertOrigin::Threshold)
        .unwrap();
    assert_eq!(threshold.alert_type, AlertType::HighComputeUsage);
    assert!(threshold.metrics.is_some());

    assert_eq!(events.recv().await.unwrap().origin, AlertOrigin::Proactive);
    assert_eq!(events.recv().await.unwrap().origin, AlertOrigin::Threshold);
    assert_eq!(h.pool.get_stats().alerts_triggered, 2);
}

#[tokio::test]
async fn proactive_driver_fault_fails_device_on_next_cycle() {
    let h = Harness::two_devices().unwrap();
    h.pool
        .raise_alert(device(1), AlertType::DriverError, "Xid 79")
        .unwrap();

    let report = h.pool.check_all().await;
    assert_eq!(report.status(device(1)), Some(HealthStatus::Failed));
    assert_eq!(report.recoveries_started, vec![device(1)]);
    h.pool.stop().await;
}

#[test]
fn raise_alert_on_unknown_device() {
    let h = Harness::two_devices().unwrap();
    assert!(matches!(
        h.pool.raise_alert(device(42), AlertType::MemoryError, "?"),
        Err(HealthError::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn unavailable_device_reported_not_recovered() {
    let h = Harness::two_devices().unwrap();
    h.source.set_metrics(device(2), DeviceMetrics::unavailable());

    let report = h.pool.check_all().await;
    assert_eq!(report.status(device(2)), Some(HealthStatus::Unavailable));
    assert!(report.recoveries_started.is_empty());

    let summary = h.pool.get_device_health_summary();
    assert_eq!(summary[&device(2)].status, HealthStatus::Unavailable);
    assert!(!h.pool.list_devices().iter().find(|d| d.id == device(2)).unwrap().is_available);
}

#[tokio::test(start_paused = true)]
async fn loop_ticks_until_stopped() {
    let mut config = PoolConfig {
        allocator: AllocatorConfig::without_headroom(),
        ..PoolConfig::default()
    };
    config.health.check_interval = Duration::from_secs(2);
    let h = Harness::new(
        vec![
            DeviceSpec::new(0, 8, 2),
            DeviceSpec::new(1, 8, 2),
            DeviceSpec::new(2, 8, 2),
        ],
        config,
    )
    .unwrap();

    h.pool.start().unwrap();
    assert!(matches!(h.pool.start(), Err(HealthError::AlreadyRunning)));

    // Ticks at 0s, 2s and 4s
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(h.pool.get_stats().total_checks, 9);

    h.pool.stop().await;
    assert!(!h.pool.monitor().is_running());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.pool.get_stats().total_checks, 9);
}

#[tokio::test(start_paused = true)]
async fn loop_drives_recovery() {
    let mut config = PoolConfig {
        allocator: AllocatorConfig::without_headroom(),
        ..PoolConfig::default()
    };
    config.health.check_interval = Duration::from_secs(1);
    let h = Harness::new(vec![DeviceSpec::new(0, 8, 2), DeviceSpec::new(1, 8, 2)], config).unwrap();

    h.pool.start().unwrap();
    h.source
        .set_metrics(device(0), DeviceMetrics::idle().with_error_rate(0.4));
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    h.pool.stop().await;

    let stats = h.pool.get_stats();
    assert!(stats.failures_handled >= 1);
    assert_eq!(stats.failures_handled, stats.recoveries_completed);
    assert_eq!(
        h.pool.device_health(device(0)).unwrap().status,
        HealthStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_stalled_refresh() {
    init_tracing();
    let pool = AcceleratorPool::new(
        vec![DeviceSpec::new(0, 8, 2)],
        Arc::new(StalledMetricsSource),
        no_headroom(),
    )
    .unwrap();

    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pool.monitor().is_running());

    tokio::time::timeout(Duration::from_secs(2), pool.stop())
        .await
        .expect("stop should not wait for the stalled refresh");
    assert!(!pool.monitor().is_running());
    // The cycle never got as far as checking a device
    assert_eq!(pool.get_stats().total_checks, 0);
}

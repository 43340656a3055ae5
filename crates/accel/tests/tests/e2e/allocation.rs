//! E2E: placing strategies on devices through the pool.

use accel_health::PoolConfig;
use accel_registry::AllocatorConfig;
use accel_tests::{device, Harness};
use accel_types::{AllocationPriority, AllocationRequest, DeviceMetrics, DeviceSpec, StrategyId};

#[test]
fn large_request_lands_on_device_with_room() {
    let h = Harness::two_devices().unwrap();

    let granted = h.pool.allocate(&AllocationRequest::new("big", 10));
    assert_eq!(granted, Some(device(2)));

    let capacity = h.pool.allocator().registry().capacity(device(2)).unwrap();
    assert_eq!(capacity.reserved_memory, 10);
    assert_eq!(capacity.reserved_streams, 1);
}

#[test]
fn exhausted_pool_returns_none() {
    let h = Harness::two_devices().unwrap();

    assert_eq!(h.pool.allocate(&AllocationRequest::new("a", 10)), Some(device(2)));
    assert_eq!(h.pool.allocate(&AllocationRequest::new("b", 8)), Some(device(1)));
    // 6 bytes left on device 2, nothing on device 1
    assert_eq!(h.pool.allocate(&AllocationRequest::new("c", 7)), None);
    assert_eq!(h.pool.allocate(&AllocationRequest::new("d", 6)), Some(device(2)));

    for d in h.pool.list_devices() {
        let capacity = h.pool.allocator().registry().capacity(d.id).unwrap();
        assert!(capacity.reserved_memory <= capacity.total_memory);
    }
}

#[test]
fn release_makes_room_again() {
    let h = Harness::two_devices().unwrap();
    let request = AllocationRequest::new("a", 16);

    assert_eq!(h.pool.allocate(&request), Some(device(2)));
    assert_eq!(h.pool.allocate(&AllocationRequest::new("b", 12)), None);

    h.pool.release(&request.strategy_id);
    assert_eq!(h.pool.allocate(&AllocationRequest::new("b", 12)), Some(device(2)));
}

#[test]
fn headroom_kept_for_urgent_work() {
    let config = PoolConfig {
        allocator: AllocatorConfig::default().with_headroom(0.25),
        ..PoolConfig::default()
    };
    let h = Harness::new(vec![DeviceSpec::new(0, 100, 8)], config).unwrap();

    assert_eq!(h.pool.allocate(&AllocationRequest::new("low", 70)), Some(device(0)));
    let low = AllocationRequest::new("low-2", 10).with_priority(AllocationPriority::Low);
    assert_eq!(h.pool.allocate(&low), None);

    let critical = AllocationRequest::new("critical", 30).with_priority(AllocationPriority::Critical);
    assert_eq!(h.pool.allocate(&critical), Some(device(0)));
}

#[tokio::test]
async fn degraded_device_is_skipped_after_check() {
    let h = Harness::two_devices().unwrap();
    h.source
        .set_metrics(device(2), DeviceMetrics::idle().with_memory_fault());

    h.pool.check_all().await;
    h.pool.stop().await;

    assert!(h.pool.allocator().registry().is_quarantined(device(2)));
    assert_eq!(h.pool.allocate(&AllocationRequest::new("a", 4)), Some(device(1)));
    assert_eq!(h.pool.allocate(&AllocationRequest::new("b", 10)), None);
    assert!(!h.pool.allocator().is_on_cpu(&StrategyId::new("b")));
}

//! Property tests: random allocate/release sequences never over-commit a device.
//!
//! After every operation, each device's reserved memory and streams stay
//! within its capacity and equal the sum of the contexts bound to it.

use std::sync::Arc;

use accel_registry::{AllocatorConfig, DeviceRegistry, ResourceAllocator};
use accel_types::{AllocationPriority, AllocationRequest, DeviceSpec, StrategyId};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Allocate {
        strategy: u8,
        memory: u64,
        streams: u32,
        priority: AllocationPriority,
    },
    Release {
        strategy: u8,
    },
}

fn arb_priority() -> impl Strategy<Value = AllocationPriority> {
    prop_oneof![
        Just(AllocationPriority::Low),
        Just(AllocationPriority::Medium),
        Just(AllocationPriority::High),
        Just(AllocationPriority::Critical),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..12, 1u64..48, 1u32..4, arb_priority()).prop_map(
            |(strategy, memory, streams, priority)| Op::Allocate {
                strategy,
                memory,
                streams,
                priority,
            }
        ),
        1 => (0u8..12).prop_map(|strategy| Op::Release { strategy }),
    ]
}

fn arb_specs() -> impl Strategy<Value = Vec<DeviceSpec>> {
    prop::collection::vec((8u64..64, 1u32..8), 1..4).prop_map(|devices| {
        devices
            .into_iter()
            .enumerate()
            .map(|(i, (memory, streams))| DeviceSpec::new(i as u32, memory, streams))
            .collect()
    })
}

fn strategy_id(n: u8) -> StrategyId {
    StrategyId::new(format!("strategy-{}", n))
}

fn assert_consistent(allocator: &ResourceAllocator) -> Result<(), TestCaseError> {
    let registry = allocator.registry();
    let contexts = allocator.active_contexts();
    for id in registry.device_ids() {
        let capacity = registry.capacity(id).unwrap();
        prop_assert!(capacity.reserved_memory <= capacity.total_memory);
        prop_assert!(capacity.reserved_streams + capacity.backup_streams <= capacity.total_streams);

        let bound_memory: u64 = contexts
            .iter()
            .filter(|ctx| ctx.device_id == id)
            .map(|ctx| ctx.reserved_memory)
            .sum();
        let bound_streams: u32 = contexts
            .iter()
            .filter(|ctx| ctx.device_id == id)
            .map(|ctx| ctx.reserved_streams)
            .sum();
        prop_assert_eq!(bound_memory, capacity.reserved_memory);
        prop_assert_eq!(bound_streams, capacity.reserved_streams);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Reservations never exceed capacity and always match the bound contexts.
    #[test]
    fn reservations_never_exceed_capacity(
        specs in arb_specs(),
        ops in prop::collection::vec(arb_op(), 1..80),
        headroom in 0.0f64..0.5,
    ) {
        let registry = Arc::new(DeviceRegistry::with_devices(specs).unwrap());
        let allocator = ResourceAllocator::new(
            registry,
            AllocatorConfig::default().with_headroom(headroom),
        );

        for op in ops {
            match op {
                Op::Allocate { strategy, memory, streams, priority } => {
                    let request = AllocationRequest::new(strategy_id(strategy), memory)
                        .with_streams(streams)
                        .with_priority(priority);
                    let previous = allocator.context(&request.strategy_id);
                    if let Some(device_id) = allocator.allocate(&request) {
                        let ctx = allocator.context(&request.strategy_id).unwrap();
                        prop_assert_eq!(ctx.device_id, device_id);
                        prop_assert_eq!(ctx.reserved_memory, memory);
                    } else {
                        // A refused re-allocation leaves the old binding in place
                        prop_assert_eq!(allocator.context(&request.strategy_id), previous);
                    }
                }
                Op::Release { strategy } => allocator.release(&strategy_id(strategy)),
            }
            assert_consistent(&allocator)?;
        }
    }

    /// Without headroom, a request that fits some device is always granted,
    /// and never onto a device that lacks room.
    #[test]
    fn fitting_request_is_granted(
        specs in arb_specs(),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let registry = Arc::new(DeviceRegistry::with_devices(specs).unwrap());
        let allocator = ResourceAllocator::new(registry.clone(), AllocatorConfig::without_headroom());

        for op in ops {
            let Op::Allocate { strategy, memory, streams, priority } = op else {
                continue;
            };
            let id = strategy_id(strategy);
            allocator.release(&id);

            let fits: Vec<_> = registry
                .device_ids()
                .into_iter()
                .filter_map(|d| registry.capacity(d))
                .filter(|c| c.free_memory >= memory && c.free_streams >= streams)
                .map(|c| c.device_id)
                .collect();

            let request = AllocationRequest::new(id, memory)
                .with_streams(streams)
                .with_priority(priority);
            match allocator.allocate(&request) {
                Some(device_id) => prop_assert!(fits.contains(&device_id)),
                None => prop_assert!(fits.is_empty()),
            }
        }
    }
}

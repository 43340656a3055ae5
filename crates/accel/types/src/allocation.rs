//! Allocation request and context types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{DeviceId, StrategyId};

/// Priority of an allocation request.
///
/// Ordered so that `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AllocationPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AllocationPriority {
    /// Whether requests at this priority may consume the per-device headroom
    /// held back from lower-priority work.
    pub fn may_use_headroom(&self) -> bool {
        matches!(self, AllocationPriority::High | AllocationPriority::Critical)
    }
}

impl Default for AllocationPriority {
    fn default() -> Self {
        AllocationPriority::Medium
    }
}

impl fmt::Display for AllocationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationPriority::Low => write!(f, "low"),
            AllocationPriority::Medium => write!(f, "medium"),
            AllocationPriority::High => write!(f, "high"),
            AllocationPriority::Critical => write!(f, "critical"),
        }
    }
}

/// What the strategy optimizes for. Recorded for inspection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceProfile {
    Latency,
    Throughput,
    Balanced,
}

/// A request for device capacity on behalf of a strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Strategy asking for capacity
    pub strategy_id: StrategyId,

    /// Request priority
    pub priority: AllocationPriority,

    /// Memory to reserve, in bytes
    pub required_memory: u64,

    /// Compute streams to reserve
    pub required_compute_streams: u32,

    /// Optional performance hint
    pub performance_profile: Option<PerformanceProfile>,
}

impl AllocationRequest {
    pub fn new(strategy_id: impl Into<StrategyId>, required_memory: u64) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            priority: AllocationPriority::default(),
            required_memory,
            required_compute_streams: 1,
            performance_profile: None,
        }
    }

    pub fn with_priority(mut self, priority: AllocationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_streams(mut self, streams: u32) -> Self {
        self.required_compute_streams = streams;
        self
    }

    pub fn with_profile(mut self, profile: PerformanceProfile) -> Self {
        self.performance_profile = Some(profile);
        self
    }
}

/// Binding of a strategy to a device and the capacity reserved for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationContext {
    pub strategy_id: StrategyId,
    pub device_id: DeviceId,
    pub reserved_memory: u64,
    pub reserved_streams: u32,
    pub priority: AllocationPriority,
    pub performance_profile: Option<PerformanceProfile>,
    pub allocated_at: DateTime<Utc>,

    /// Device the context was moved off during recovery, if any
    pub migrated_from: Option<DeviceId>,
}

impl AllocationContext {
    pub fn from_request(request: &AllocationRequest, device_id: DeviceId) -> Self {
        Self {
            strategy_id: request.strategy_id.clone(),
            device_id,
            reserved_memory: request.required_memory,
            reserved_streams: request.required_compute_streams,
            priority: request.priority,
            performance_profile: request.performance_profile,
            allocated_at: Utc::now(),
            migrated_from: None,
        }
    }
}

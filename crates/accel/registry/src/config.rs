//! Allocator configuration

use serde::{Deserialize, Serialize};

/// Configuration for the resource allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Fraction of each device's total memory held back from `Low` and
    /// `Medium` requests. `High` and `Critical` requests may use it.
    pub headroom_fraction: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            headroom_fraction: 0.10,
        }
    }
}

impl AllocatorConfig {
    /// Config with no headroom; every priority sees the full free memory.
    pub fn without_headroom() -> Self {
        Self {
            headroom_fraction: 0.0,
        }
    }

    pub fn with_headroom(mut self, fraction: f64) -> Self {
        self.headroom_fraction = fraction;
        self
    }

    /// Headroom in bytes for a device with `total_memory` bytes.
    pub fn headroom_for(&self, total_memory: u64) -> u64 {
        let fraction = if self.headroom_fraction.is_finite() {
            self.headroom_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (total_memory as f64 * fraction) as u64
    }
}

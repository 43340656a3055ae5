//! Outcome of a recovery attempt.

use accel_types::{DeviceId, StrategyId};
use serde::{Deserialize, Serialize};

/// Result of one recovery strategy, or of a whole cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,

    /// Human-readable description of what was done.
    pub action_taken: String,

    /// Device the strategies were moved to, for migrations.
    pub fallback_device: Option<DeviceId>,

    pub affected_strategies: Vec<StrategyId>,

    /// Wall time spent. Reported only, never enforced.
    pub recovery_time_ms: f64,

    pub error_details: Option<String>,

    /// Name of the strategy that produced this response.
    pub strategy: Option<String>,
}

impl FailureResponse {
    pub fn success(action_taken: impl Into<String>) -> Self {
        Self {
            success: true,
            action_taken: action_taken.into(),
            fallback_device: None,
            affected_strategies: Vec::new(),
            recovery_time_ms: 0.0,
            error_details: None,
            strategy: None,
        }
    }

    pub fn failure(action_taken: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            success: false,
            action_taken: action_taken.into(),
            fallback_device: None,
            affected_strategies: Vec::new(),
            recovery_time_ms: 0.0,
            error_details: Some(details.into()),
            strategy: None,
        }
    }

    pub fn with_fallback_device(mut self, device_id: DeviceId) -> Self {
        self.fallback_device = Some(device_id);
        self
    }

    pub fn with_affected(mut self, strategies: Vec<StrategyId>) -> Self {
        self.affected_strategies = strategies;
        self
    }
}

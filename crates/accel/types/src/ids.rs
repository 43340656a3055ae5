//! Strongly-typed identifiers for pool entities
//!
//! Devices are addressed by their ordinal; strategies by a caller-chosen name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a physical device (its ordinal at discovery time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    pub fn ordinal(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(ordinal: u32) -> Self {
        Self(ordinal)
    }
}

/// Identifier of a strategy consuming device capacity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrategyId(String);

impl StrategyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strategy:{}", self.0)
    }
}

impl From<&str> for StrategyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

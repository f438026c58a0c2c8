//! Wraparound-safe record index.

use serde::{Deserialize, Serialize};

/// Bounds of a [`RolloverCounter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloverConfig {
    /// Largest value handed out before wrapping
    pub max: u64,
    /// Value handed out after `max`
    pub reset_to: u64,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            max: u64::MAX,
            reset_to: 0,
        }
    }
}

/// Monotonic counter that wraps to `reset_to` instead of overflowing
#[derive(Debug, Clone)]
pub struct RolloverCounter {
    next: u64,
    config: RolloverConfig,
}

impl RolloverCounter {
    pub fn new(config: RolloverConfig) -> Self {
        Self::starting_at(config.reset_to, config)
    }

    pub fn starting_at(value: u64, config: RolloverConfig) -> Self {
        Self {
            next: value.min(config.max),
            config,
        }
    }

    /// Hand out the current value and advance
    pub fn next_value(&mut self) -> u64 {
        let value = self.next;
        self.next = if value >= self.config.max {
            self.config.reset_to
        } else {
            value + 1
        };
        value
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

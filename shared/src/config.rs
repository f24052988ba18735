//! Link configuration
//!
//! All tunable parameters of the connection and polling loop. Every field
//! has a default, so a partial JSON document only overrides what it names.

use serde::{Deserialize, Serialize};

use crate::buffer::ChannelGeometry;
use crate::protocol::ACCESSORY_DEVICE_ID;

/// Rejected configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Names the offending field and why
    Invalid(&'static str),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

/// Backoff applied when the service answers a connect request with busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_backoff_ms: u32,
    /// Ceiling for the doubling delay
    pub max_backoff_ms: u32,
    /// Busy replies tolerated before the operator is asked
    pub max_busy_retries: u8,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn delay_ms(&self, retry: u32) -> u32 {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 800,
            max_busy_retries: 5,
        }
    }
}

/// Configuration for the connection and polling loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Device class to pair with
    pub device_id: u8,
    /// Budget for one connect attempt
    pub connect_timeout_ms: u32,
    /// Longest single wait for a status change inside one tick
    pub status_wait_ms: u32,
    /// Budget for the disconnect confirmation
    pub disconnect_timeout_ms: u32,
    /// Longest wait for a packet inside one tick
    pub packet_wait_ms: u32,
    /// Accessory report period once connected
    pub polling_period_ms: u8,
    /// Reconnect on link loss without asking the operator
    pub auto_reconnect: bool,
    /// Polling arm failures tolerated before the link is dropped
    pub max_arm_attempts: u8,
    /// Slots per direction in the shared region
    pub slot_count: usize,
    pub retry: RetryPolicy,
}

impl LinkConfig {
    pub fn geometry(&self) -> ChannelGeometry {
        ChannelGeometry::new(self.slot_count)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_period_ms == 0 {
            return Err(ConfigError::Invalid("polling_period_ms must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be non-zero"));
        }
        if self.status_wait_ms > self.connect_timeout_ms {
            return Err(ConfigError::Invalid("status_wait_ms exceeds connect_timeout_ms"));
        }
        if self.max_arm_attempts == 0 {
            return Err(ConfigError::Invalid("max_arm_attempts must be non-zero"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid("initial_backoff_ms exceeds max_backoff_ms"));
        }
        if self.geometry().validate().is_err() {
            return Err(ConfigError::Invalid("slot_count must be non-zero and fit the region"));
        }
        Ok(())
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_id: ACCESSORY_DEVICE_ID,
            connect_timeout_ms: 100,
            status_wait_ms: 10,
            disconnect_timeout_ms: 100,
            packet_wait_ms: 4,
            polling_period_ms: 8,
            auto_reconnect: true,
            max_arm_attempts: 3,
            slot_count: 1,
            retry: RetryPolicy::default(),
        }
    }
}

//! Connection status types

use serde::{Deserialize, Serialize};

/// Externally observed connection status
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected
    #[default]
    Disconnected = 0,
    /// Currently connecting/authenticating
    Connecting = 1,
    /// Connected and authenticated
    Connected = 2,
    /// Connection failed or encountered an error
    Error = 3,
}

impl ConnectionStatus {
    /// Check if connection is active (connected state)
    pub fn is_connected(&self) -> bool {
        *self == ConnectionStatus::Connected
    }

    /// Check if connection is down (disconnected or failed)
    pub fn is_down(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// Health of the polling fallback, surfaced to subscribers as a status value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollingHealth {
    /// Not scheduled
    Idle,
    /// Scheduled at the base interval
    Active,
    /// Scheduled at a backed-off interval after failures
    BackingOff {
        consecutive_errors: u32,
        interval_ms: u64,
    },
    /// Retry budget exhausted; waiting for cooldown and an explicit restart
    Paused,
    /// Cooldown elapsed; counters are back at baseline
    CooledDown,
}

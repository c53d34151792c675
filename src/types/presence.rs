//! User presence

use serde::{Deserialize, Serialize};

/// User status/presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// User is online and active
    Online,
    /// User is away/idle
    Away,
    /// User is offline
    Offline,
    /// Status is unknown
    #[default]
    Unknown,
}

impl PresenceStatus {
    /// Parse the status string used on the wire
    pub fn from_wire(status: &str) -> Self {
        match status {
            "online" => PresenceStatus::Online,
            "away" | "idle" => PresenceStatus::Away,
            "offline" => PresenceStatus::Offline,
            _ => PresenceStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire() {
        assert_eq!(PresenceStatus::from_wire("online"), PresenceStatus::Online);
        assert_eq!(PresenceStatus::from_wire("idle"), PresenceStatus::Away);
        assert_eq!(PresenceStatus::from_wire("offline"), PresenceStatus::Offline);
        assert_eq!(PresenceStatus::from_wire("busy"), PresenceStatus::Unknown);
    }
}

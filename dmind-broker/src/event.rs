use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// [`DeviceStatus`] is the per-device liveness state machine tracked by the
/// state store: Online -> Idle -> Offline, with direct entry at Online for
/// newly observed devices. Transitions happen on inbound messages and in
/// the periodic decay sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Idle,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Idle => "idle",
            DeviceStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(DeviceStatus::Online),
            "idle" => Some(DeviceStatus::Idle),
            "offline" => Some(DeviceStatus::Offline),
            _ => None,
        }
    }

    /// Status implied by a message body: a device reporting exactly `idle`
    /// is idle, anything else (including `online`) counts as online.
    pub fn from_content(content: &str) -> Self {
        if content == "idle" {
            DeviceStatus::Idle
        } else {
            DeviceStatus::Online
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized inbound message, produced by [`decode`](crate::decode) and
/// consumed by the state store layer
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub device_id: String,
    pub device_type: String,
    pub content: String,
    pub ts: NaiveDateTime,
}

/// Body published on the check topic when querying a device
pub fn ping_payload(device_id: &str) -> Vec<u8> {
    serde_json::json!({
        "device-id": device_id,
        "message": "ping",
    })
    .to_string()
    .into_bytes()
}

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::InboundEvent;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Missing identity: {0}")]
    MissingIdentity(String),
}

const DEVICE_TOPIC_PREFIX: &str = "devices";

/// Decode a raw publish into a normalized [`InboundEvent`].
///
/// Pure transform with explicit failure modes: the payload must be a JSON
/// object carrying a usable `device-id`; the optional `message` field is
/// lower-cased and trimmed, defaulting to the empty string. Mutates no
/// shared state.
pub fn decode(topic: &str, payload: &[u8]) -> Result<InboundEvent, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::MalformedPayload("empty payload".to_string()));
    }

    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    // Devices in the field report numeric ids as JSON numbers; accept both
    let device_id = match value.get("device-id") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    if device_id.is_empty() {
        return Err(DecodeError::MissingIdentity(
            "device-id absent or empty".to_string(),
        ));
    }

    if !device_id.chars().all(char::is_alphanumeric) {
        return Err(DecodeError::MissingIdentity(format!(
            "device-id {device_id:} is not alphanumeric"
        )));
    }

    let content = match value.get("message") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().trim().to_lowercase(),
    };

    Ok(InboundEvent {
        device_id,
        device_type: device_type_from_topic(topic),
        content,
        ts: Utc::now().naive_utc(),
    })
}

/// The device type label is carried by convention in the topic path,
/// `devices/<type>/<id>`. Topics of any other shape map to `unknown`.
pub fn device_type_from_topic(topic: &str) -> String {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() >= 3 && parts[0] == DEVICE_TOPIC_PREFIX {
        parts[1].to_string()
    } else {
        "unknown".to_string()
    }
}

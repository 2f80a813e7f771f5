//! The `dmind-broker` crate defines the transport layer for the device-minder
//! system. It owns the long-lived MQTT session and everything that touches
//! raw messages, with the following responsibilities:
//! 1. Manage the broker connection lifecycle via [`broker`]: connect,
//!    subscribe to the device channels and the query response channel,
//!    publish the retained presence marker, register the retained offline
//!    last-will, and re-subscribe whenever the session is re-established.
//!    Poll errors after startup are retried with a backoff; only a broker
//!    that cannot be reached at startup is surfaced to the caller.
//! 2. Decode and validate raw inbound publishes via [`decode`], a pure
//!    transform producing a normalized [`InboundEvent`] or a
//!    [`DecodeError`]. Rejected messages are logged and dropped; they never
//!    affect processing of the next message.
//! 3. Stream accepted events to the consuming layer over an unbounded
//!    channel handed in by the caller, and expose outbound publishing
//!    through [`BrokerHandle`] and the [`CommandSink`] seam.
//!
//! # Examples
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let handle = dmind_broker::broker(dmind_broker::BrokerConfig::default(), event_tx)
//!         .await
//!         .map_err(|e| {
//!             log::error!("Error connecting to broker {e:}");
//!             e
//!         })?;
//!
//!     while let Some(event) = event_rx.recv().await {
//!         log::info!("Device {:} reported {:}", event.device_id, event.content);
//!     }
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

mod broker;
mod decode;
mod event;

pub use broker::{broker, BrokerConfig, BrokerError, BrokerHandle, CommandSink};
pub use decode::{decode, device_type_from_topic, DecodeError};
pub use event::{ping_payload, DeviceStatus, InboundEvent};

/// [`DeviceId`] is the unique alphanumeric identifier each device reports;
/// it is immutable once a device record exists
pub type DeviceId = String;

/// Wildcard filter capturing all device channels, `devices/<type>/<id>`
pub const DEVICE_TOPIC_FILTER: &str = "devices/#";

/// Dedicated channel for replies to outbound queries
pub const RESPONSE_TOPIC: &str = "check/response";

/// Retained presence marker published for the dashboard itself
pub const PRESENCE_TOPIC: &str = "dashboard/status";

/// Topic outbound device queries are published on
pub const CHECK_TOPIC: &str = "check";

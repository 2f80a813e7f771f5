//! The `dminddb` crate defines the state-tracking and persistence layer for
//! the device-minder system. Maintains the device registry and event log via
//! [`DeviceDatabaseHandler`], an [`actix::Actor`] object, to do the
//! following:
//!    1. Record / track devices, keyed by their unique alphanumeric id, with
//!       upsert semantics: a previously unseen id creates a record, a seen
//!       id is updated in place. All writes go through the actor mailbox so
//!       each device's read-modify-write is atomic.
//!    2. Record an append-only log of every accepted message, idempotent on
//!       the `(device, payload)` natural key.
//!    3. Age device liveness over time: the [`IngestCoordinator`] runs a
//!       periodic decay sweep demoting online devices to idle after
//!       [`ONLINE_TO_IDLE_SECS`] without a report, and idle devices to
//!       offline after [`IDLE_TO_OFFLINE_SECS`].
//!
//! The crate also owns [`RecentActivity`], the bounded in-memory buffer of
//! the most recent accepted messages used for live-feed display. It is
//! process-local by design and wiped on restart.

mod coordinator;
mod db;
mod models;
mod recent;
mod schema;

pub use coordinator::IngestCoordinator;
pub use db::{
    DatabaseError, DecaySweep, DeviceDatabaseHandler, GetActiveFirmware, GetAllDevices,
    GetDevice, GetDeviceLogs, RecordEvent, RecordedEvent, SetDeviceStatus, SweepReport,
};
pub use models::{DeviceSnapshot, FirmwareInfo, LogEntry};
pub use recent::{RecentActivity, RecentEntry, MAX_RECENT_ENTRIES};

/// Seconds without a report before an online device is demoted to idle
pub const ONLINE_TO_IDLE_SECS: i64 = 120;

/// Seconds without a report before an idle device is demoted to offline
pub const IDLE_TO_OFFLINE_SECS: i64 = 300;

/// Default interval between status decay sweeps
pub const SWEEP_INTERVAL_SECS: u64 = 60;

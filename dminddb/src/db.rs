use actix::prelude::*;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use thiserror::Error;

use dmind_broker::{DeviceStatus, InboundEvent};

use crate::models::{
    DeviceLogRecord, DeviceRecord, DeviceSnapshot, FirmwareInfo, FirmwareRecord, LogEntry,
    NewDevice, NewDeviceLog, Status,
};
use crate::schema;
use crate::{IDLE_TO_OFFLINE_SECS, ONLINE_TO_IDLE_SECS};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection Error")]
    Connection(#[from] diesel::result::ConnectionError),
    #[error("Query Error")]
    Query(#[from] diesel::result::Error),
    #[error("Unknown device {0}")]
    UnknownDevice(String),
}

/// [`DeviceDatabaseHandler`] owns the sqlite connection for the device
/// registry and event log. Running it as an [`actix::Actor`] serializes all
/// writes through the mailbox, which is what makes each device's
/// read-modify-write atomic; the `(device_id, data)` unique index backs the
/// log dedup key at the storage level as well.
pub struct DeviceDatabaseHandler {
    conn: SqliteConnection,
}

impl DeviceDatabaseHandler {
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let mut conn = SqliteConnection::establish(path)?;

        conn.batch_execute(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                device_type TEXT NOT NULL,
                status TEXT NOT NULL,
                last_seen TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE TABLE IF NOT EXISTS device_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                device_id TEXT NOT NULL
                    REFERENCES devices(device_id) ON DELETE CASCADE,
                data TEXT NOT NULL,
                ts TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                UNIQUE(device_id, data)
            );
            CREATE TABLE IF NOT EXISTS firmware (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                file_path TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }

    /// The single upsert + log routine for one accepted inbound message.
    ///
    /// An unseen device id creates a record entering at online (or idle when
    /// the body says so); a seen id is updated in place, including its type
    /// label, and `last_seen` is always refreshed. The log append is
    /// idempotent on `(device_id, data)`: a replay returns the existing
    /// entry with its original timestamp preserved.
    fn record_event(&mut self, ev: &InboundEvent) -> Result<RecordedEvent, DatabaseError> {
        use schema::device_logs::dsl as logs;
        use schema::devices::dsl as devices;

        let status = Status(DeviceStatus::from_content(&ev.content));

        let existing: Option<DeviceRecord> = devices::devices
            .filter(devices::device_id.eq(&ev.device_id))
            .select(DeviceRecord::as_select())
            .first(&mut self.conn)
            .optional()?;

        let device = match existing {
            Some(_) => diesel::update(
                devices::devices.filter(devices::device_id.eq(&ev.device_id)),
            )
            .set((
                devices::device_type.eq(&ev.device_type),
                devices::status.eq(status),
                devices::last_seen.eq(Some(ev.ts)),
                devices::updated_at.eq(ev.ts),
            ))
            .returning(DeviceRecord::as_returning())
            .get_result(&mut self.conn)?,
            None => diesel::insert_into(devices::devices)
                .values(NewDevice::from_event(ev))
                .returning(DeviceRecord::as_returning())
                .get_result(&mut self.conn)?,
        };

        let existing_log: Option<DeviceLogRecord> = logs::device_logs
            .filter(logs::device_id.eq(&ev.device_id))
            .filter(logs::data.eq(&ev.content))
            .select(DeviceLogRecord::as_select())
            .first(&mut self.conn)
            .optional()?;

        let (log, log_created) = match existing_log {
            Some(log) => (log, false),
            None => (
                diesel::insert_into(logs::device_logs)
                    .values(NewDeviceLog {
                        device_id: ev.device_id.clone(),
                        data: ev.content.clone(),
                        ts: ev.ts,
                        created_at: ev.ts,
                    })
                    .returning(DeviceLogRecord::as_returning())
                    .get_result(&mut self.conn)?,
                true,
            ),
        };

        Ok(RecordedEvent {
            device: device.into(),
            log_id: log.id,
            log_created,
        })
    }

    fn decay_sweep(&mut self) -> SweepReport {
        let now = Utc::now().naive_utc();
        SweepReport {
            idled: self.demote(
                DeviceStatus::Online,
                now - Duration::seconds(ONLINE_TO_IDLE_SECS),
                DeviceStatus::Idle,
                now,
            ),
            offlined: self.demote(
                DeviceStatus::Idle,
                now - Duration::seconds(IDLE_TO_OFFLINE_SECS),
                DeviceStatus::Offline,
                now,
            ),
        }
    }

    // Each demotion is its own read-modify-write; a failure on one device
    // must not abort the sweep for the others
    fn demote(
        &mut self,
        from: DeviceStatus,
        cutoff: NaiveDateTime,
        to: DeviceStatus,
        now: NaiveDateTime,
    ) -> usize {
        use schema::devices::dsl as devices;

        let stale: Vec<String> = match devices::devices
            .filter(devices::status.eq(Status(from)))
            .filter(devices::last_seen.lt(cutoff))
            .select(devices::device_id)
            .load(&mut self.conn)
        {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("Sweep scan for stale {from:} devices failed {e:}");
                return 0;
            }
        };

        let mut demoted = 0;
        for device_id in stale {
            match diesel::update(
                devices::devices.filter(devices::device_id.eq(&device_id)),
            )
            .set((devices::status.eq(Status(to)), devices::updated_at.eq(now)))
            .execute(&mut self.conn)
            {
                Ok(_) => {
                    log::info!("Set device {device_id:} to {to:}");
                    demoted += 1;
                }
                Err(e) => {
                    log::error!("Failed to demote device {device_id:} to {to:}: {e:}");
                }
            }
        }
        demoted
    }

    fn get_all(&mut self) -> Result<Vec<DeviceSnapshot>, DatabaseError> {
        use schema::devices::dsl as devices;

        Ok(devices::devices
            .order(devices::updated_at.desc())
            .select(DeviceRecord::as_select())
            .load(&mut self.conn)?
            .into_iter()
            .map(DeviceSnapshot::from)
            .collect())
    }

    fn get_by_id(&mut self, device_id: &str) -> Result<Option<DeviceSnapshot>, DatabaseError> {
        use schema::devices::dsl as devices;

        Ok(devices::devices
            .filter(devices::device_id.eq(device_id))
            .select(DeviceRecord::as_select())
            .first(&mut self.conn)
            .optional()?
            .map(DeviceSnapshot::from))
    }

    fn get_logs(&mut self, device_id: &str) -> Result<Vec<LogEntry>, DatabaseError> {
        use schema::device_logs::dsl as logs;

        if self.get_by_id(device_id)?.is_none() {
            return Err(DatabaseError::UnknownDevice(device_id.to_string()));
        }

        Ok(logs::device_logs
            .filter(logs::device_id.eq(device_id))
            .order(logs::ts.desc())
            .select(DeviceLogRecord::as_select())
            .load(&mut self.conn)?
            .into_iter()
            .map(LogEntry::from)
            .collect())
    }

    fn set_status(
        &mut self,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), DatabaseError> {
        use schema::devices::dsl as devices;

        let updated = diesel::update(
            devices::devices.filter(devices::device_id.eq(device_id)),
        )
        .set((
            devices::status.eq(Status(status)),
            devices::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut self.conn)?;

        if updated == 0 {
            return Err(DatabaseError::UnknownDevice(device_id.to_string()));
        }
        Ok(())
    }

    fn active_firmware(&mut self) -> Result<Option<FirmwareInfo>, DatabaseError> {
        use schema::firmware::dsl as firmware;

        Ok(firmware::firmware
            .filter(firmware::is_active.eq(true))
            .order(firmware::created_at.desc())
            .select(FirmwareRecord::as_select())
            .first(&mut self.conn)
            .optional()?
            .map(FirmwareInfo::from))
    }
}

impl Actor for DeviceDatabaseHandler {
    type Context = Context<Self>;
}

/// Result of recording one accepted inbound message: the device snapshot
/// after the upsert, the log row it mapped to, and whether that row was
/// newly created or a replay of an already-logged payload
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub device: DeviceSnapshot,
    pub log_id: i32,
    pub log_created: bool,
}

/// Upsert the device and log the message for one accepted inbound event
#[derive(Message)]
#[rtype(result = "RecordEventResponse")]
pub struct RecordEvent(pub InboundEvent);
type RecordEventResponse = Result<RecordedEvent, DatabaseError>;

impl Handler<RecordEvent> for DeviceDatabaseHandler {
    type Result = RecordEventResponse;

    fn handle(&mut self, msg: RecordEvent, _ctx: &mut Self::Context) -> Self::Result {
        self.record_event(&msg.0)
    }
}

/// Counts of devices demoted by one decay sweep
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SweepReport {
    pub idled: usize,
    pub offlined: usize,
}

/// Run one status decay pass over all devices
#[derive(Message)]
#[rtype(result = "SweepReport")]
pub struct DecaySweep;

impl Handler<DecaySweep> for DeviceDatabaseHandler {
    type Result = MessageResult<DecaySweep>;

    fn handle(&mut self, _msg: DecaySweep, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.decay_sweep())
    }
}

/// Snapshot of every known device, most recently updated first
#[derive(Message)]
#[rtype(result = "GetAllDevicesResponse")]
pub struct GetAllDevices;
type GetAllDevicesResponse = Result<Vec<DeviceSnapshot>, DatabaseError>;

impl Handler<GetAllDevices> for DeviceDatabaseHandler {
    type Result = GetAllDevicesResponse;

    fn handle(&mut self, _msg: GetAllDevices, _ctx: &mut Self::Context) -> Self::Result {
        self.get_all()
    }
}

/// Look up a single device by id
#[derive(Message)]
#[rtype(result = "GetDeviceResponse")]
pub struct GetDevice(pub String);
type GetDeviceResponse = Result<Option<DeviceSnapshot>, DatabaseError>;

impl Handler<GetDevice> for DeviceDatabaseHandler {
    type Result = GetDeviceResponse;

    fn handle(&mut self, msg: GetDevice, _ctx: &mut Self::Context) -> Self::Result {
        self.get_by_id(&msg.0)
    }
}

/// All log entries for a device, newest first; errs with
/// [`DatabaseError::UnknownDevice`] when the device does not exist
#[derive(Message)]
#[rtype(result = "GetDeviceLogsResponse")]
pub struct GetDeviceLogs(pub String);
type GetDeviceLogsResponse = Result<Vec<LogEntry>, DatabaseError>;

impl Handler<GetDeviceLogs> for DeviceDatabaseHandler {
    type Result = GetDeviceLogsResponse;

    fn handle(&mut self, msg: GetDeviceLogs, _ctx: &mut Self::Context) -> Self::Result {
        self.get_logs(&msg.0)
    }
}

/// Force a device's status, used for the awaiting-response convention after
/// an outbound query is published
#[derive(Message)]
#[rtype(result = "SetDeviceStatusResponse")]
pub struct SetDeviceStatus {
    pub device_id: String,
    pub status: DeviceStatus,
}
type SetDeviceStatusResponse = Result<(), DatabaseError>;

impl Handler<SetDeviceStatus> for DeviceDatabaseHandler {
    type Result = SetDeviceStatusResponse;

    fn handle(&mut self, msg: SetDeviceStatus, _ctx: &mut Self::Context) -> Self::Result {
        self.set_status(&msg.device_id, msg.status)
    }
}

/// Newest active firmware descriptor, if any
#[derive(Message)]
#[rtype(result = "GetActiveFirmwareResponse")]
pub struct GetActiveFirmware;
type GetActiveFirmwareResponse = Result<Option<FirmwareInfo>, DatabaseError>;

impl Handler<GetActiveFirmware> for DeviceDatabaseHandler {
    type Result = GetActiveFirmwareResponse;

    fn handle(&mut self, _msg: GetActiveFirmware, _ctx: &mut Self::Context) -> Self::Result {
        self.active_firmware()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> DeviceDatabaseHandler {
        DeviceDatabaseHandler::new(":memory:").unwrap()
    }

    fn event(device_id: &str, device_type: &str, content: &str) -> InboundEvent {
        InboundEvent {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            content: content.to_string(),
            ts: Utc::now().naive_utc(),
        }
    }

    fn event_at(
        device_id: &str,
        device_type: &str,
        content: &str,
        ts: NaiveDateTime,
    ) -> InboundEvent {
        InboundEvent {
            ts,
            ..event(device_id, device_type, content)
        }
    }

    impl DeviceDatabaseHandler {
        fn seed_firmware(&mut self, version: &str, file_path: &str, is_active: bool) {
            use schema::firmware::dsl as firmware;
            diesel::insert_into(firmware::firmware)
                .values((
                    firmware::version.eq(version),
                    firmware::file_path.eq(file_path),
                    firmware::is_active.eq(is_active),
                    firmware::created_at.eq(Utc::now().naive_utc()),
                ))
                .execute(&mut self.conn)
                .unwrap();
        }
    }

    #[test]
    fn first_message_creates_device_online() {
        let mut db = handler();
        let ev = event("ESP1", "ESP", "hello");

        let recorded = db.record_event(&ev).unwrap();
        assert!(recorded.log_created);
        assert_eq!(recorded.device.device_id, "ESP1");
        assert_eq!(recorded.device.status, DeviceStatus::Online);
        assert_eq!(recorded.device.name, "ESP - ESP1");
        assert_eq!(recorded.device.last_seen, Some(ev.ts));
    }

    #[test]
    fn idle_content_enters_idle() {
        let mut db = handler();
        let recorded = db.record_event(&event("ESP1", "ESP", "idle")).unwrap();
        assert_eq!(recorded.device.status, DeviceStatus::Idle);
    }

    #[test]
    fn upsert_updates_in_place_without_duplicates() {
        let mut db = handler();
        let first = event("ESP1", "ESP", "online");
        db.record_event(&first).unwrap();

        let later = event_at(
            "ESP1",
            "BMF",
            "idle",
            first.ts + Duration::seconds(30),
        );
        let recorded = db.record_event(&later).unwrap();

        assert_eq!(recorded.device.status, DeviceStatus::Idle);
        assert_eq!(recorded.device.device_type, "BMF");
        assert_eq!(recorded.device.last_seen, Some(later.ts));
        assert_eq!(db.get_all().unwrap().len(), 1);
    }

    #[test]
    fn log_append_is_idempotent() {
        let mut db = handler();
        let first = event("ESP1", "ESP", "online");
        let recorded = db.record_event(&first).unwrap();
        assert!(recorded.log_created);

        let replay = event_at(
            "ESP1",
            "ESP",
            "online",
            first.ts + Duration::seconds(10),
        );
        let replayed = db.record_event(&replay).unwrap();
        assert!(!replayed.log_created);
        assert_eq!(replayed.log_id, recorded.log_id);

        let logs = db.get_logs("ESP1").unwrap();
        assert_eq!(logs.len(), 1);
        // original timestamp preserved on replay
        assert_eq!(logs[0].ts, first.ts);

        db.record_event(&event("ESP1", "ESP", "idle")).unwrap();
        assert_eq!(db.get_logs("ESP1").unwrap().len(), 2);
    }

    #[test]
    fn sweep_demotes_by_last_seen_tier() {
        let mut db = handler();
        let now = Utc::now().naive_utc();

        db.record_event(&event_at("STALE1", "ESP", "online", now - Duration::minutes(3)))
            .unwrap();
        db.record_event(&event_at("STALE2", "ESP", "idle", now - Duration::minutes(6)))
            .unwrap();
        db.record_event(&event_at("FRESH1", "ESP", "online", now - Duration::seconds(30)))
            .unwrap();

        let report = db.decay_sweep();
        assert_eq!(report.idled, 1);
        assert_eq!(report.offlined, 1);

        assert_eq!(
            db.get_by_id("STALE1").unwrap().unwrap().status,
            DeviceStatus::Idle
        );
        assert_eq!(
            db.get_by_id("STALE2").unwrap().unwrap().status,
            DeviceStatus::Offline
        );
        assert_eq!(
            db.get_by_id("FRESH1").unwrap().unwrap().status,
            DeviceStatus::Online
        );
    }

    #[test]
    fn sweep_ignores_devices_never_seen() {
        let mut db = handler();
        // a device with no last_seen at all must never be demoted
        use schema::devices::dsl as devices;
        diesel::insert_into(devices::devices)
            .values(NewDevice {
                device_id: "GHOST".to_string(),
                name: "ESP - GHOST".to_string(),
                device_type: "ESP".to_string(),
                status: Status(DeviceStatus::Online),
                last_seen: None,
                created_at: Utc::now().naive_utc(),
                updated_at: Utc::now().naive_utc(),
            })
            .execute(&mut db.conn)
            .unwrap();

        let report = db.decay_sweep();
        assert_eq!(report, SweepReport::default());
        assert_eq!(
            db.get_by_id("GHOST").unwrap().unwrap().status,
            DeviceStatus::Online
        );
    }

    #[test]
    fn unknown_device_queries() {
        let mut db = handler();
        assert!(db.get_by_id("nope").unwrap().is_none());
        assert!(matches!(
            db.get_logs("nope").unwrap_err(),
            DatabaseError::UnknownDevice(_)
        ));
        assert!(matches!(
            db.set_status("nope", DeviceStatus::Idle).unwrap_err(),
            DatabaseError::UnknownDevice(_)
        ));
    }

    #[test]
    fn newest_active_firmware_wins() {
        let mut db = handler();
        assert!(db.active_firmware().unwrap().is_none());

        db.seed_firmware("1.0.0", "/media/firmware/versions/v1.0.0.zip", true);
        db.seed_firmware("1.1.0", "/media/firmware/versions/v1.1.0.zip", false);

        let info = db.active_firmware().unwrap().unwrap();
        assert_eq!(info.version, "1.0.0");
    }

    #[actix::test]
    async fn actor_serializes_same_device_updates() {
        let db = handler().start();

        let first = event("ESP1", "ESP", "online");
        let second = event_at(
            "ESP1",
            "ESP",
            "idle",
            first.ts + Duration::seconds(5),
        );

        // mailbox order is delivery order: the later event wins, and
        // neither write is lost
        db.do_send(RecordEvent(first.clone()));
        db.send(RecordEvent(second.clone())).await.unwrap().unwrap();

        let device = db
            .send(GetDevice("ESP1".to_string()))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(device.status, DeviceStatus::Idle);
        assert_eq!(device.last_seen, Some(second.ts));

        let logs = db
            .send(GetDeviceLogs("ESP1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[actix::test]
    async fn actor_roundtrip() {
        let db = handler().start();

        db.send(RecordEvent(event("ESP1", "ESP", "online")))
            .await
            .unwrap()
            .unwrap();

        let all = db.send(GetAllDevices).await.unwrap().unwrap();
        assert_eq!(all.len(), 1);

        db.send(SetDeviceStatus {
            device_id: "ESP1".to_string(),
            status: DeviceStatus::Idle,
        })
        .await
        .unwrap()
        .unwrap();

        let device = db
            .send(GetDevice("ESP1".to_string()))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(device.status, DeviceStatus::Idle);

        let report = db.send(DecaySweep).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }
}

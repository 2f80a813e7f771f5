use chrono::NaiveDateTime;
use diesel::deserialize::FromSql;
use diesel::serialize::ToSql;
use diesel::{deserialize::FromSqlRow, expression::AsExpression, prelude::*};

use diesel::{
    backend::Backend,
    deserialize, serialize,
    sql_types::Text,
    sqlite::Sqlite,
};
use serde::Serialize;

use dmind_broker::{DeviceStatus, InboundEvent};

/// Text-encoded wrapper so [`DeviceStatus`] can live in a sqlite column
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsExpression, FromSqlRow)]
#[diesel(sql_type = diesel::sql_types::Text)]
pub(crate) struct Status(pub(crate) DeviceStatus);

impl FromSql<Text, Sqlite> for Status {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        DeviceStatus::parse(&text)
            .map(Status)
            .ok_or_else(|| format!("unrecognized device status {text:}").into())
    }
}

impl ToSql<Text, Sqlite> for Status {
    fn to_sql<'b>(&'b self, out: &mut serialize::Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.0.as_str().to_string());
        Ok(serialize::IsNull::No)
    }
}

#[derive(Queryable, QueryableByName, PartialEq, Debug, Selectable)]
#[diesel(table_name = crate::schema::devices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct DeviceRecord {
    /// Unique alphanumeric id reported by the device itself; immutable
    /// once the record exists
    pub(crate) device_id: String,
    pub(crate) name: String,
    pub(crate) device_type: String,
    pub(crate) status: Status,
    pub(crate) last_seen: Option<NaiveDateTime>,
    pub(crate) created_at: NaiveDateTime,
    pub(crate) updated_at: NaiveDateTime,
}

#[derive(Insertable, Clone)]
#[diesel(table_name = crate::schema::devices)]
pub(crate) struct NewDevice {
    pub(crate) device_id: String,
    pub(crate) name: String,
    pub(crate) device_type: String,
    pub(crate) status: Status,
    pub(crate) last_seen: Option<NaiveDateTime>,
    pub(crate) created_at: NaiveDateTime,
    pub(crate) updated_at: NaiveDateTime,
}

impl NewDevice {
    pub fn from_event(ev: &InboundEvent) -> Self {
        Self {
            device_id: ev.device_id.clone(),
            name: format!("{} - {}", ev.device_type, ev.device_id),
            device_type: ev.device_type.clone(),
            status: Status(DeviceStatus::from_content(&ev.content)),
            last_seen: Some(ev.ts),
            created_at: ev.ts,
            updated_at: ev.ts,
        }
    }
}

#[derive(Queryable, PartialEq, Debug, Selectable)]
#[diesel(table_name = crate::schema::device_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct DeviceLogRecord {
    pub(crate) id: i32,
    pub(crate) device_id: String,
    pub(crate) data: String,
    pub(crate) ts: NaiveDateTime,
    pub(crate) created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::device_logs)]
pub(crate) struct NewDeviceLog {
    pub(crate) device_id: String,
    pub(crate) data: String,
    pub(crate) ts: NaiveDateTime,
    pub(crate) created_at: NaiveDateTime,
}

#[derive(Queryable, PartialEq, Debug, Selectable)]
#[diesel(table_name = crate::schema::firmware)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct FirmwareRecord {
    pub(crate) id: i32,
    pub(crate) version: String,
    pub(crate) file_path: String,
    pub(crate) is_active: bool,
    pub(crate) created_at: NaiveDateTime,
}

/// Device read-model handed to dashboard / API callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub status: DeviceStatus,
    pub last_seen: Option<NaiveDateTime>,
}

impl From<DeviceRecord> for DeviceSnapshot {
    fn from(record: DeviceRecord) -> Self {
        Self {
            device_id: record.device_id,
            name: record.name,
            device_type: record.device_type,
            status: record.status.0,
            last_seen: record.last_seen,
        }
    }
}

/// One persisted log entry for a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i32,
    pub ts: NaiveDateTime,
    pub data: String,
}

impl From<DeviceLogRecord> for LogEntry {
    fn from(record: DeviceLogRecord) -> Self {
        Self {
            id: record.id,
            ts: record.ts,
            data: record.data,
        }
    }
}

/// Descriptor of the newest active firmware. The core only serves this as
/// a downstream fact; packaging and upload live elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirmwareInfo {
    pub version: String,
    pub download_url: String,
}

impl From<FirmwareRecord> for FirmwareInfo {
    fn from(record: FirmwareRecord) -> Self {
        Self {
            version: record.version,
            download_url: record.file_path,
        }
    }
}

use std::sync::Arc;

use actix::{Addr, MailboxError};
use thiserror::Error;

use dmind_broker::{ping_payload, BrokerError, CommandSink, DeviceStatus, CHECK_TOPIC};
use dminddb::{
    DatabaseError, DeviceDatabaseHandler, DeviceSnapshot, FirmwareInfo, GetActiveFirmware,
    GetAllDevices, GetDevice, GetDeviceLogs, LogEntry, RecentActivity, RecentEntry,
    SetDeviceStatus,
};

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Unknown device {0}")]
    NotFound(String),
    #[error("Broker Error")]
    Transport(#[from] BrokerError),
    #[error("Database Error")]
    Database(DatabaseError),
    #[error("Actix mailbox Error")]
    MailError(#[from] MailboxError),
}

impl From<DatabaseError> for DashboardError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::UnknownDevice(id) => DashboardError::NotFound(id),
            other => DashboardError::Database(other),
        }
    }
}

/// Query and command surface handed to dashboard / API callers. Reads go
/// to the database actor or the in-memory recent buffer; the one command
/// path publishes a ping over the broker session.
#[derive(Clone)]
pub struct Dashboard {
    db: Addr<DeviceDatabaseHandler>,
    recent: RecentActivity,
    commands: Arc<dyn CommandSink>,
}

impl Dashboard {
    pub fn new(
        db: Addr<DeviceDatabaseHandler>,
        recent: RecentActivity,
        commands: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            db,
            recent,
            commands,
        }
    }

    pub async fn get_all_device_statuses(&self) -> Result<Vec<DeviceSnapshot>, DashboardError> {
        Ok(self.db.send(GetAllDevices).await??)
    }

    pub async fn get_device(&self, device_id: &str) -> Result<DeviceSnapshot, DashboardError> {
        self.db
            .send(GetDevice(device_id.to_string()))
            .await??
            .ok_or_else(|| DashboardError::NotFound(device_id.to_string()))
    }

    pub async fn get_device_logs(&self, device_id: &str) -> Result<Vec<LogEntry>, DashboardError> {
        Ok(self.db.send(GetDeviceLogs(device_id.to_string())).await??)
    }

    /// Most recent distinct messages across the fleet, oldest first
    pub fn get_recent_messages(&self) -> Vec<RecentEntry> {
        self.recent.snapshot()
    }

    /// Publish a ping asking a known device to report in. After a
    /// successful publish the device is marked idle, the awaiting-response
    /// state; the next message it sends restores it to online. A failed
    /// publish leaves the stored status untouched.
    pub async fn query_device(&self, device_id: &str) -> Result<(), DashboardError> {
        if self
            .db
            .send(GetDevice(device_id.to_string()))
            .await??
            .is_none()
        {
            return Err(DashboardError::NotFound(device_id.to_string()));
        }

        self.commands
            .publish(CHECK_TOPIC, ping_payload(device_id))
            .await?;

        self.db
            .send(SetDeviceStatus {
                device_id: device_id.to_string(),
                status: DeviceStatus::Idle,
            })
            .await??;
        Ok(())
    }

    pub async fn get_active_firmware(&self) -> Result<FirmwareInfo, DashboardError> {
        self.db
            .send(GetActiveFirmware)
            .await??
            .ok_or_else(|| DashboardError::NotFound("firmware".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::Actor;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use dmind_broker::InboundEvent;
    use dminddb::RecordEvent;

    #[derive(Default)]
    struct StubSink {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandSink for StubSink {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
            if self.fail {
                return Err(BrokerError::Transport("stub publish failure".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn event(device_id: &str, content: &str) -> InboundEvent {
        InboundEvent {
            device_id: device_id.to_string(),
            device_type: "ESP".to_string(),
            content: content.to_string(),
            ts: Utc::now().naive_utc(),
        }
    }

    async fn dashboard_with(sink: Arc<StubSink>) -> Dashboard {
        let db = DeviceDatabaseHandler::new(":memory:").unwrap().start();
        db.send(RecordEvent(event("ESP1", "online")))
            .await
            .unwrap()
            .unwrap();
        Dashboard::new(db, RecentActivity::new(), sink)
    }

    #[actix::test]
    async fn query_device_publishes_ping_and_marks_idle() {
        let sink = Arc::new(StubSink::default());
        let dashboard = dashboard_with(sink.clone()).await;

        dashboard.query_device("ESP1").await.unwrap();

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, CHECK_TOPIC);
        let payload: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(payload["device-id"], "ESP1");
        assert_eq!(payload["message"], "ping");
        drop(published);

        let device = dashboard.get_device("ESP1").await.unwrap();
        assert_eq!(device.status, DeviceStatus::Idle);
    }

    #[actix::test]
    async fn query_unknown_device_publishes_nothing() {
        let sink = Arc::new(StubSink::default());
        let dashboard = dashboard_with(sink.clone()).await;

        let err = dashboard.query_device("nope").await.unwrap_err();
        assert!(matches!(err, DashboardError::NotFound(_)));
        assert!(sink.published.lock().unwrap().is_empty());
    }

    #[actix::test]
    async fn failed_publish_leaves_status_untouched() {
        let sink = Arc::new(StubSink {
            fail: true,
            ..StubSink::default()
        });
        let dashboard = dashboard_with(sink).await;

        let err = dashboard.query_device("ESP1").await.unwrap_err();
        assert!(matches!(err, DashboardError::Transport(_)));

        let device = dashboard.get_device("ESP1").await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
    }

    #[actix::test]
    async fn missing_firmware_reports_not_found() {
        let sink = Arc::new(StubSink::default());
        let dashboard = dashboard_with(sink).await;
        assert!(matches!(
            dashboard.get_active_firmware().await.unwrap_err(),
            DashboardError::NotFound(_)
        ));
    }
}

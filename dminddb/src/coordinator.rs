use actix::Addr;
use futures::prelude::*;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;

use dmind_broker::InboundEvent;

use crate::db::{DecaySweep, DeviceDatabaseHandler, RecordEvent};
use crate::recent::{RecentActivity, RecentEntry};

/// [`IngestCoordinator`] owns the two long-lived background tasks of the
/// core: draining decoded inbound events into the database actor (and from
/// there into the recent-activity buffer), and driving the periodic status
/// decay sweep. Tasks are aborted on shutdown or drop.
pub struct IngestCoordinator {
    ingest_handle: Option<tokio::task::JoinHandle<()>>,
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl IngestCoordinator {
    pub fn new(
        db: Addr<DeviceDatabaseHandler>,
        recent: RecentActivity,
        event_rx: UnboundedReceiver<InboundEvent>,
        sweep_interval: Duration,
    ) -> Self {
        let mut coordinator = Self {
            ingest_handle: None,
            sweep_handle: None,
        };
        coordinator.spawn_ingest_task(db.clone(), recent, event_rx);
        coordinator.spawn_sweep_task(db, sweep_interval);
        coordinator
    }

    fn spawn_ingest_task(
        &mut self,
        db: Addr<DeviceDatabaseHandler>,
        recent: RecentActivity,
        event_rx: UnboundedReceiver<InboundEvent>,
    ) {
        let handle = tokio::spawn(async move {
            let mut stream = UnboundedReceiverStream::new(event_rx);
            while let Some(ev) = stream.next().await {
                match db.send(RecordEvent(ev.clone())).await {
                    Ok(Ok(recorded)) => {
                        log::debug!(
                            "Recorded event from {:} status {:}",
                            recorded.device.device_id,
                            recorded.device.status
                        );
                        recent.upsert(RecentEntry {
                            device_id: ev.device_id,
                            device_type: ev.device_type,
                            data: ev.content,
                            ts: ev.ts,
                            log_id: recorded.log_id,
                        });
                    }
                    Ok(Err(e)) => {
                        log::error!("Failed to record event from {:} {e:}", ev.device_id);
                    }
                    Err(e) => {
                        log::error!("Database actor unreachable {e:}");
                        break;
                    }
                }
            }
            log::warn!("Ingest task exiting, event stream closed");
        });
        self.ingest_handle = Some(handle);
    }

    fn spawn_sweep_task(&mut self, db: Addr<DeviceDatabaseHandler>, interval: Duration) {
        let handle = tokio::spawn(async move {
            // first tick fires immediately, so stale rows left over from a
            // previous run are demoted right at startup
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match db.send(DecaySweep).await {
                    Ok(report) => {
                        if report.idled > 0 || report.offlined > 0 {
                            log::info!(
                                "Decay sweep set {:} devices idle, {:} offline",
                                report.idled,
                                report.offlined
                            );
                        }
                    }
                    Err(e) => {
                        log::error!("Database actor unreachable {e:}");
                        break;
                    }
                }
            }
            log::warn!("Decay sweep task exiting");
        });
        self.sweep_handle = Some(handle);
    }

    pub fn shutdown(&mut self) {
        if let Some(ingest) = self.ingest_handle.take() {
            ingest.abort();
        }
        if let Some(sweep) = self.sweep_handle.take() {
            sweep.abort();
        }
    }
}

impl Drop for IngestCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

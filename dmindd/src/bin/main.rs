use std::sync::Arc;

use actix::Actor;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::unbounded_channel;

use dmind_broker::broker;
use dminddb::{DeviceDatabaseHandler, IngestCoordinator, RecentActivity};
use dmindd::{
    config::MinderConfig,
    dashboard::Dashboard,
    DeviceMinderResult,
};
use tracing_appender::rolling;
use tracing_subscriber::FmtSubscriber;

use tracing_log::LogTracer;

#[actix::main]
async fn main() -> DeviceMinderResult<()> {
    LogTracer::init().expect("Unable to set up log tracer");

    let log = rolling::daily("./logs", "debug");
    let (nb, _guard) = tracing_appender::non_blocking(log);

    let sub = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(nb)
        .finish();

    tracing::subscriber::set_global_default(sub).expect("Unable to set up tracing subscriber");

    let config = MinderConfig::from_env();
    log::info!(
        "Starting device-minder against {:}:{:}",
        config.mqtt_host,
        config.mqtt_port
    );

    let db = DeviceDatabaseHandler::new(&config.db_path)?.start();
    let recent = RecentActivity::new();

    let (event_tx, event_rx) = unbounded_channel();
    let broker_handle = broker(config.broker_config(), event_tx).await?;

    let mut coordinator =
        IngestCoordinator::new(db.clone(), recent.clone(), event_rx, config.sweep_interval);

    let dashboard = Dashboard::new(db, recent, Arc::new(broker_handle.clone()));

    let summary = tokio::spawn({
        let dashboard = dashboard.clone();
        async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                ticker.tick().await;
                match dashboard.get_all_device_statuses().await {
                    Ok(devices) => {
                        log::info!(
                            "Tracking {:} devices, {:} recent messages",
                            devices.len(),
                            dashboard.get_recent_messages().len()
                        );
                    }
                    Err(e) => {
                        log::error!("Fleet summary query failed {e:}");
                    }
                }
            }
        }
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            log::info!("Received SIGTERM, shutting down");
        }
    }

    summary.abort();
    // the broker flushes retained offline presence before the event loop
    // stops, so it must go down while its task is still alive
    broker_handle.shutdown().await;
    coordinator.shutdown();

    Ok(())
}

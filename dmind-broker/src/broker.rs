use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{decode, InboundEvent, DEVICE_TOPIC_FILTER, PRESENCE_TOPIC, RESPONSE_TOPIC};

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("MQTT client Error")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection Error")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Connection settings for the persistent broker session
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub client_id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            client_id: "device-minder".to_string(),
        }
    }
}

const PRESENCE_ONLINE: &[u8] = b"online";
const PRESENCE_OFFLINE: &[u8] = b"offline";

// How long to wait for the session to come up before reporting the broker
// unreachable to the caller
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

// Pause between poll retries once the session has been up at least once
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Establish the persistent broker session and spawn its event loop.
///
/// On success the session is subscribed to the device channels and the query
/// response channel, the retained `online` presence marker has been
/// published, and the broker holds a retained `offline` last-will to publish
/// if the connection drops uncleanly. Decoded inbound messages flow out
/// through `event_tx`; an unreachable broker at startup is the only fatal
/// error.
pub async fn broker(
    config: BrokerConfig,
    event_tx: UnboundedSender<InboundEvent>,
) -> Result<BrokerHandle, BrokerError> {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_last_will(LastWill::new(
        PRESENCE_TOPIC,
        PRESENCE_OFFLINE.to_vec(),
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut eventloop) = AsyncClient::new(options, 100);

    client.subscribe(DEVICE_TOPIC_FILTER, QoS::AtLeastOnce).await?;
    client.subscribe(RESPONSE_TOPIC, QoS::AtLeastOnce).await?;

    wait_for_session(&mut eventloop).await?;

    client
        .publish(PRESENCE_TOPIC, QoS::AtLeastOnce, true, PRESENCE_ONLINE)
        .await?;

    log::info!(
        "Connected to MQTT broker at {:}:{:}, subscribed to {:} and {:}",
        config.host,
        config.port,
        DEVICE_TOPIC_FILTER,
        RESPONSE_TOPIC
    );

    let (shutdown_tx, shutdown_rx) = unbounded_channel();

    tokio::spawn(event_loop(
        client.clone(),
        eventloop,
        event_tx,
        shutdown_rx,
    ));

    Ok(BrokerHandle {
        client,
        shutdown_tx,
    })
}

async fn wait_for_session(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
    let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, eventloop.poll())
            .await
            .map_err(|_| {
                BrokerError::Transport("timed out waiting for broker session".to_string())
            })?;
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(BrokerError::Connection(e)),
        }
    }
}

async fn event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    event_tx: UnboundedSender<InboundEvent>,
    mut shutdown_rx: UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            _ = event_tx.closed() => {
                break;
            }
            Some(_) = shutdown_rx.recv() => {
                drain(&client, &mut eventloop).await;
                break;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match decode(&publish.topic, &publish.payload) {
                            Ok(inbound) => {
                                event_tx.send(inbound).ok();
                            }
                            Err(e) => {
                                log::warn!(
                                    "Dropping message on {:}: {e:}",
                                    publish.topic
                                );
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("Broker session (re)established");
                        resubscribe(&client).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        log::warn!("Broker sent disconnect");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("MQTT event loop error {e:}, retrying");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
        };
    }
    log::warn!("Broker event loop exiting");
}

// The broker may have dropped our session state across a reconnect, so
// subscriptions and the retained presence marker are re-issued on every
// ConnAck
async fn resubscribe(client: &AsyncClient) {
    for topic in [DEVICE_TOPIC_FILTER, RESPONSE_TOPIC] {
        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
            log::error!("Re-subscribe to {topic:} failed {e:}");
        }
    }
    if let Err(e) = client
        .publish(PRESENCE_TOPIC, QoS::AtLeastOnce, true, PRESENCE_ONLINE)
        .await
    {
        log::error!("Failed to publish presence marker {e:}");
    }
}

// Flush the retained offline marker and the disconnect packet before the
// event loop goes away
async fn drain(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client
        .publish(PRESENCE_TOPIC, QoS::AtLeastOnce, true, PRESENCE_OFFLINE)
        .await
    {
        log::error!("Failed to publish offline presence marker {e:}");
    }
    if let Err(e) = client.disconnect().await {
        log::error!("Error disconnecting from broker {e:}");
    }

    loop {
        match tokio::time::timeout(Duration::from_secs(2), eventloop.poll()).await {
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
    }
}

/// Seam for components that publish outbound messages, so callers (and
/// tests) are not tied to a live MQTT session
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
}

/// Cloneable handle to the live session. Publish failures are reported to
/// the caller, never into the inbound message path.
#[derive(Clone)]
pub struct BrokerHandle {
    client: AsyncClient,
    shutdown_tx: UnboundedSender<()>,
}

impl BrokerHandle {
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(BrokerError::from)
    }

    /// Graceful shutdown: publish the retained offline presence marker,
    /// disconnect cleanly, and wait for the event loop task to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send(()).ok();
        self.shutdown_tx.closed().await;
    }
}

#[async_trait]
impl CommandSink for BrokerHandle {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        BrokerHandle::publish(self, topic, payload).await
    }
}

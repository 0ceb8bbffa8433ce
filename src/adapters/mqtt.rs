use crate::config::MqttConfig;
use crate::domain::model::InboundMessage;
use crate::domain::ports::MessageBus;
use crate::utils::error::{BridgeError, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

const REQUEST_CAPACITY: usize = 10;
const INBOUND_CAPACITY: usize = 256;

/// Outcome of handing a publish to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forwarded {
    Delivered,
    /// The bridge is busy and its backlog is full.
    Dropped,
    Closed,
}

/// [`MessageBus`] over an MQTT broker.
///
/// `connect` starts the event loop and blocks until the broker accepts the
/// connection, retrying forever. Subscriptions are replayed after every
/// reconnect.
pub struct MqttBus {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    inbound: mpsc::Sender<InboundMessage>,
    topics: Arc<StdMutex<Vec<String>>>,
    connected_tx: Arc<watch::Sender<bool>>,
    connected_rx: watch::Receiver<bool>,
    retry_interval: Duration,
    broker: String,
}

impl MqttBus {
    pub fn new(config: &MqttConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("gsm-bridge-{}", std::process::id()));

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));
        if !config.user.is_empty() {
            options.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);

        let bus = Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            driver: Mutex::new(None),
            inbound,
            topics: Arc::new(StdMutex::new(Vec::new())),
            connected_tx: Arc::new(connected_tx),
            connected_rx,
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
            broker: config.broker_url(),
        };
        (bus, inbound_rx)
    }

    fn remember_topic(&self, topic: &str) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("MQTT disconnect failed: {}", e);
        }
        if let Some(driver) = self.driver.lock().await.take() {
            driver.abort();
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&self) -> Result<()> {
        if let Some(eventloop) = self.eventloop.lock().await.take() {
            let driver = tokio::spawn(drive(
                eventloop,
                self.client.clone(),
                self.inbound.clone(),
                self.topics.clone(),
                self.connected_tx.clone(),
                self.retry_interval,
            ));
            *self.driver.lock().await = Some(driver);
        }

        tracing::info!("Connecting to MQTT broker at {}", self.broker);
        let mut connected = self.connected_rx.clone();
        while !*connected.borrow_and_update() {
            connected.changed().await.map_err(|_| {
                BridgeError::IoError(std::io::Error::other(
                    "MQTT event loop stopped before connecting",
                ))
            })?;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.remember_topic(topic);
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        tracing::info!("Subscribed to MQTT topic {}", topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await?;
        tracing::debug!("Published to {}: {}", topic, payload);
        Ok(())
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    inbound: mpsc::Sender<InboundMessage>,
    topics: Arc<StdMutex<Vec<String>>>,
    connected: Arc<watch::Sender<bool>>,
    retry_interval: Duration,
) {
    let mut connected_before = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker.");
                let remembered = topics
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                for topic in on_connack(connected_before, &remembered) {
                    match client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                        Ok(()) => tracing::info!("Resubscribed to MQTT topic {}", topic),
                        Err(e) => tracing::warn!("Failed to resubscribe to {}: {}", topic, e),
                    }
                }
                connected_before = true;
                connected.send_replace(true);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                if forward(&inbound, message) == Forwarded::Closed {
                    tracing::info!("Inbound receiver dropped, stopping MQTT event loop");
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                connected.send_replace(false);
                tracing::warn!(
                    "MQTT connection error: {}. Retrying in {} seconds.",
                    e,
                    retry_interval.as_secs()
                );
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}

/// Topics to subscribe again after a ConnAck. The first connection has
/// nothing to restore; `subscribe` does it.
fn on_connack(connected_before: bool, topics: &[String]) -> Vec<String> {
    if connected_before {
        topics.to_vec()
    } else {
        Vec::new()
    }
}

/// Never waits: the event loop must keep polling to answer keep-alives
/// while the bridge is busy with a slow modem session.
fn forward(inbound: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> Forwarded {
    match inbound.try_send(message) {
        Ok(()) => Forwarded::Delivered,
        Err(mpsc::error::TrySendError::Full(message)) => {
            tracing::warn!(
                "Bridge busy, dropping message on {} ({} queued)",
                message.topic,
                inbound.max_capacity()
            );
            Forwarded::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Forwarded::Closed,
    }
}

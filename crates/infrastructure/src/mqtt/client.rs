use anyhow::{Result, anyhow};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use domain::event::{DeviceEvent, EventSink};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task;
use tracing::{error, info, warn};

use super::ingress::{IngressQueue, PushOutcome};

#[derive(Clone, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Broker link state, broadcast so the RPC engine can reconcile pending
/// commands on resume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Up,
    Down,
}

#[async_trait::async_trait]
pub trait MqttPublisherClient: Send + Sync {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// Reconnect schedule: base 500 ms, cap 30 s, jitter ±20%
fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(30),
        randomization_factor: 0.2,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Single broker connection for the whole controller instance
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    conn_tx: broadcast::Sender<ConnectionEvent>,
    subscriptions: Arc<std::sync::RwLock<Vec<String>>>,
}

impl MqttTransport {
    /// Connect and spawn the event-loop task
    ///
    /// `announce` is published retained on every ConnAck (the controller's
    /// own online LWT per the LWT protocol); `last_will` is what the broker
    /// publishes if this session dies ungracefully.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        keep_alive_secs: u64,
        last_will: Option<LastWill>,
        announce: Option<(String, Vec<u8>)>,
        ingress: Arc<IngressQueue>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(keep_alive_secs));
        mqttoptions.set_clean_session(false); // Persistent session for commands

        if let Some(will) = last_will {
            mqttoptions.set_last_will(will);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let (conn_tx, _) = broadcast::channel(16);
        let connected = Arc::new(AtomicBool::new(false));

        let subscriptions = Arc::new(std::sync::RwLock::new(Vec::<String>::new()));

        let conn_tx_clone = conn_tx.clone();
        let connected_clone = connected.clone();
        let subscriptions_clone = subscriptions.clone();
        let client_clone = client.clone();

        // Spawn a task to handle the event loop
        task::spawn(async move {
            let mut backoff = reconnect_backoff();
            loop {
                match eventloop.poll().await {
                    Ok(notification) => match notification {
                        Event::Incoming(Packet::Publish(publish)) => {
                            let msg = MqttMessage {
                                topic: publish.topic,
                                payload: publish.payload.to_vec(),
                                retain: publish.retain,
                            };
                            if let PushOutcome::Shed(total) = ingress.push(msg) {
                                // One event per episode start, then every 100
                                // sheds, so a flood cannot flood the event log
                                if total == 1 || total % 100 == 0 {
                                    events.emit(DeviceEvent::ingress_overflow(total)).await;
                                }
                            }
                        }
                        Event::Incoming(Packet::ConnAck(_)) => {
                            info!("MQTT connected");
                            connected_clone.store(true, Ordering::Relaxed);
                            backoff.reset();

                            // Re-subscribe to all topics
                            let subs = match subscriptions_clone.read() {
                                Ok(guard) => guard.clone(),
                                Err(poisoned) => poisoned.into_inner().clone(),
                            };
                            if !subs.is_empty() {
                                info!("Re-subscribing to {} patterns", subs.len());
                                for topic in subs {
                                    if let Err(e) =
                                        client_clone.subscribe(&topic, QoS::AtLeastOnce).await
                                    {
                                        error!("Failed to re-subscribe to {}: {}", topic, e);
                                    }
                                }
                            }

                            // Announce the controller itself as online
                            if let Some((topic, payload)) = &announce {
                                if let Err(e) = client_clone
                                    .publish(topic, QoS::AtLeastOnce, true, payload.clone())
                                    .await
                                {
                                    error!("Failed to publish online announce: {}", e);
                                }
                            }

                            let _ = conn_tx_clone.send(ConnectionEvent::Up);
                        }
                        Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                            connected_clone.store(false, Ordering::Relaxed);
                            let _ = conn_tx_clone.send(ConnectionEvent::Down);
                        }
                        _ => {}
                    },
                    Err(e) => {
                        if connected_clone.swap(false, Ordering::Relaxed) {
                            let _ = conn_tx_clone.send(ConnectionEvent::Down);
                        }
                        let delay = backoff
                            .next_backoff()
                            .unwrap_or(Duration::from_secs(30));
                        warn!(delay_ms = %delay.as_millis(), "MQTT connection error: {:?}", e);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            connected,
            conn_tx,
            subscriptions,
        })
    }

    /// Watch broker link transitions
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn_tx.subscribe()
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        {
            let mut subs = match self.subscriptions.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !subs.contains(&topic.to_string()) {
                subs.push(topic.to_string());
            }
        }

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| anyhow!("Failed to subscribe to topic {}: {}", topic, e))?;
        Ok(())
    }

    pub async fn subscribe_many(&self, patterns: &[String]) -> Result<()> {
        for pattern in patterns {
            self.subscribe(pattern).await?;
        }
        Ok(())
    }

    /// Publish the orderly-shutdown LWT and close the session
    pub async fn shutdown(&self, offline_topic: &str, offline_payload: &[u8]) -> Result<()> {
        self.publish_bytes(offline_topic, offline_payload, QoS::AtLeastOnce, true)
            .await?;
        self.client
            .disconnect()
            .await
            .map_err(|e| anyhow!("Failed to disconnect: {}", e))
    }
}

#[async_trait::async_trait]
impl MqttPublisherClient for MqttTransport {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| anyhow!("Failed to publish MQTT message: {}", e))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

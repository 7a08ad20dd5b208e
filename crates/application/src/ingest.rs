//! Ingest dispatcher
//!
//! One task drains the transport ingress queue, decodes topic and envelope,
//! and routes each frame to its owner. Protocol failures are logged with the
//! offending topic, counted, and dropped; they never take the process down.

use crate::events::EventHub;
use crate::registry::DeviceRegistry;
use crate::rpc::RpcEngine;
use crate::telemetry::TelemetrySink;
use crate::topology::TopologyStore;
use chrono::Utc;
use domain::command::{CommandAck, CommandResult};
use domain::device::{DeviceAttr, DeviceId, DeviceState, Presence};
use domain::envelope::Envelope;
use domain::event::{DeviceEvent, EventSink, Severity};
use domain::topic::{CmdLeg, Topic, TopicKind, TopologyChannel};
use domain::topology::WifiClientReport;
use infrastructure::mqtt::client::MqttMessage;
use infrastructure::mqtt::ingress::IngressQueue;
use infrastructure::store::{keys, kv::KvStore};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Envelope majors this controller speaks; newer minors are fine
const SUPPORTED_MAJOR: u32 = 1;

/// Wire shape of `evt/<type>` payloads
#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    extra: serde_json::Value,
}

pub struct IngestPipeline {
    ingress: Arc<IngressQueue>,
    registry: Arc<DeviceRegistry>,
    topology: Arc<TopologyStore>,
    telemetry: Arc<TelemetrySink>,
    rpc: Arc<RpcEngine>,
    hub: Arc<EventHub>,
    store: Arc<dyn KvStore>,
    mqtt_log: bool,
    decode_failures: AtomicU64,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ingress: Arc<IngressQueue>,
        registry: Arc<DeviceRegistry>,
        topology: Arc<TopologyStore>,
        telemetry: Arc<TelemetrySink>,
        rpc: Arc<RpcEngine>,
        hub: Arc<EventHub>,
        store: Arc<dyn KvStore>,
        mqtt_log: bool,
    ) -> Self {
        Self {
            ingress,
            registry,
            topology,
            telemetry,
            rpc,
            hub,
            store,
            mqtt_log,
            decode_failures: AtomicU64::new(0),
        }
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Drain the ingress queue until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = self.ingress.pop() => msg,
            };
            self.dispatch(msg).await;
        }
        debug!("Ingest pipeline stopped");
    }

    fn count_failure(&self, topic: &str, why: &str) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        warn!(topic = %topic, reason = %why, "Dropping undecodable message");
    }

    fn decode_envelope(&self, msg: &MqttMessage) -> Option<Envelope> {
        let envelope = match Envelope::decode(&msg.payload) {
            Ok(env) => env,
            Err(e) => {
                self.count_failure(&msg.topic, &e.to_string());
                return None;
            }
        };
        match envelope.schema_version() {
            Ok(version) if !version.compatible_with(SUPPORTED_MAJOR) => {
                // Forward-compat rule: warn, then decode anyway
                warn!(topic = %msg.topic, schema = %envelope.schema, "Major version mismatch");
            }
            Ok(_) => {}
            Err(e) => {
                self.count_failure(&msg.topic, &e.to_string());
                return None;
            }
        }
        Some(envelope)
    }

    fn typed_payload<T: serde::de::DeserializeOwned>(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Option<T> {
        match envelope.payload_as::<T>() {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.count_failure(topic, &e.to_string());
                None
            }
        }
    }

    pub async fn dispatch(&self, msg: MqttMessage) {
        if self.mqtt_log {
            let key = keys::mqtt_log(Utc::now(), &Uuid::new_v4().to_string());
            let record = serde_json::json!({
                "topic": msg.topic,
                "payload": String::from_utf8_lossy(&msg.payload),
                "retain": msg.retain,
            });
            if let Err(e) = self.store.put(&key, &record.to_string()).await {
                warn!(error = %e, "Failed to append mqtt log");
            }
        }

        let topic = match Topic::parse(&msg.topic) {
            Ok(topic) => topic,
            Err(e) => {
                self.count_failure(&msg.topic, &e.to_string());
                return;
            }
        };

        let Some(device_id) = topic.address.device().cloned() else {
            // Group topics are controller-outbound; nothing to ingest
            debug!(topic = %msg.topic, "Ignoring group topic on ingress");
            return;
        };

        match &topic.kind {
            TopicKind::State => self.on_state(&device_id, &msg).await,
            TopicKind::Attr => self.on_attr(&device_id, &msg).await,
            TopicKind::Lwt => self.on_lwt(&device_id, &msg).await,
            TopicKind::Event(event_type) => self.on_event(&device_id, event_type, &msg).await,
            TopicKind::Telemetry(metric) => self.on_telemetry(&device_id, metric, &msg).await,
            TopicKind::Topology(channel) => {
                self.on_topology(&topic.scope, &device_id, *channel, &msg).await
            }
            TopicKind::Diagnostics(name) => {
                self.on_event(&device_id, &format!("Diagnostics.{name}"), &msg)
                    .await
            }
            TopicKind::Cmd(CmdLeg::Ack) => {
                if let Some(envelope) = self.decode_envelope(&msg) {
                    if let Some(ack) = self.typed_payload::<CommandAck>(&msg.topic, &envelope) {
                        self.rpc.handle_ack(ack);
                    }
                }
            }
            TopicKind::Cmd(CmdLeg::Res) => {
                if let Some(envelope) = self.decode_envelope(&msg) {
                    if let Some(res) = self.typed_payload::<CommandResult>(&msg.topic, &envelope) {
                        self.rpc.handle_res(res);
                    }
                }
            }
            TopicKind::Cmd(CmdLeg::Req) => {
                // Requests are controller-outbound; seeing one here means a
                // misconfigured subscription
                debug!(topic = %msg.topic, "Ignoring cmd/req on ingress");
            }
        }
    }

    async fn on_state(&self, device_id: &DeviceId, msg: &MqttMessage) {
        if msg.payload.is_empty() {
            // Retained tombstone clears the state
            self.registry.apply_state(device_id, None).await;
            return;
        }
        let Some(envelope) = self.decode_envelope(msg) else {
            return;
        };
        if let Some(state) = self.typed_payload::<DeviceState>(&msg.topic, &envelope) {
            self.registry.apply_state(device_id, Some(state)).await;
        }
    }

    async fn on_attr(&self, device_id: &DeviceId, msg: &MqttMessage) {
        if msg.payload.is_empty() {
            return;
        }
        let Some(envelope) = self.decode_envelope(msg) else {
            return;
        };
        if let Some(attr) = self.typed_payload::<DeviceAttr>(&msg.topic, &envelope) {
            self.registry.apply_attr(device_id, attr).await;
        }
    }

    async fn on_lwt(&self, device_id: &DeviceId, msg: &MqttMessage) {
        let Some(envelope) = self.decode_envelope(msg) else {
            return;
        };
        if let Some(presence) = self.typed_payload::<Presence>(&msg.topic, &envelope) {
            self.registry.apply_presence(device_id, presence).await;
        }
    }

    async fn on_event(&self, device_id: &DeviceId, event_type: &str, msg: &MqttMessage) {
        let Some(envelope) = self.decode_envelope(msg) else {
            return;
        };
        let Some(payload) = self.typed_payload::<EventPayload>(&msg.topic, &envelope) else {
            return;
        };

        self.registry.touch(device_id);
        self.hub
            .emit(DeviceEvent {
                device_id: Some(device_id.clone()),
                event_type: event_type.to_string(),
                severity: payload.severity.unwrap_or(Severity::Info),
                ts: envelope.ts,
                extra: payload.extra,
            })
            .await;
    }

    async fn on_telemetry(&self, device_id: &DeviceId, metric: &str, msg: &MqttMessage) {
        let Some(envelope) = self.decode_envelope(msg) else {
            return;
        };

        self.registry.touch(device_id);
        self.telemetry.ingest(domain::telemetry::TelemetryPoint::new(
            device_id.clone(),
            metric,
            envelope.payload.clone(),
            envelope.ts,
        ));

        if metric == "wifi_clients" {
            if let Some(report) = self.typed_payload::<WifiClientReport>(&msg.topic, &envelope) {
                for roam in self.topology.ingest_wifi_clients(&report, envelope.ts) {
                    self.hub
                        .emit(DeviceEvent::new(
                            Some(device_id.clone()),
                            "Roaming.Detected",
                            Severity::Info,
                            serde_json::to_value(&roam).unwrap_or_default(),
                        ))
                        .await;
                }
            }
        }
    }

    async fn on_topology(
        &self,
        scope: &domain::device::Scope,
        device_id: &DeviceId,
        channel: TopologyChannel,
        msg: &MqttMessage,
    ) {
        let Some(envelope) = self.decode_envelope(msg) else {
            return;
        };

        #[derive(Deserialize)]
        struct DiscoveryPayload {
            #[serde(default)]
            nodes: Vec<domain::topology::TopologyNode>,
        }
        #[derive(Deserialize)]
        struct ConnectionsPayload {
            #[serde(default)]
            edges: Vec<domain::topology::TopologyEdge>,
        }

        match channel {
            TopologyChannel::Discovery => {
                if let Some(payload) =
                    self.typed_payload::<DiscoveryPayload>(&msg.topic, &envelope)
                {
                    self.topology
                        .ingest_discovery(scope, envelope.ts, payload.nodes)
                        .await;
                }
            }
            TopologyChannel::Connections => {
                if let Some(payload) =
                    self.typed_payload::<ConnectionsPayload>(&msg.topic, &envelope)
                {
                    self.topology
                        .ingest_connections(scope, envelope.ts, payload.edges)
                        .await;
                }
            }
        }
        self.registry.set_topology_ts(device_id, envelope.ts);
    }
}

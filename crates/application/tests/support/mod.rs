//! Shared test harness: a capturing transport and a scripted device that
//! answers commands the way real firmware would, including id-based dedup.
#![allow(dead_code)]

use application::events::EventHub;
use application::registry::DeviceRegistry;
use application::rpc::{RpcConfig, RpcEngine};
use application::telemetry::TelemetrySink;
use application::tools::{ToolExecutor, ToolRegistry};
use application::topology::TopologyStore;
use domain::device::Scope;
use infrastructure::config::ToolLimits;
use infrastructure::store::memory::MemoryKvStore;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use domain::command::{CommandAck, CommandError, CommandRequest, CommandResult};
use domain::envelope::Envelope;
use infrastructure::mqtt::QoS;
use infrastructure::mqtt::client::MqttPublisherClient;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Records every publish and forwards command requests to a fake device
pub struct FakeTransport {
    pub published: Arc<Mutex<Vec<PublishedFrame>>>,
    req_tx: mpsc::UnboundedSender<PublishedFrame>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PublishedFrame>) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                published: Arc::new(Mutex::new(Vec::new())),
                req_tx,
            }),
            req_rx,
        )
    }

    pub fn published_requests(&self) -> Vec<CommandRequest> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.topic.ends_with("/cmd/req"))
            .filter_map(|f| {
                Envelope::decode(&f.payload)
                    .ok()
                    .and_then(|env| env.payload_as::<CommandRequest>().ok())
            })
            .collect()
    }
}

#[async_trait]
impl MqttPublisherClient for FakeTransport {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        _qos: QoS,
        retain: bool,
    ) -> anyhow::Result<()> {
        let frame = PublishedFrame {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        };
        self.published.lock().unwrap().push(frame.clone());
        let _ = self.req_tx.send(frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

type Handler = Box<dyn Fn(&CommandRequest) -> CommandResult + Send + Sync>;

/// Scripted firmware: acks every request, dedups by command id, answers with
/// the prior terminal result on retries
pub struct FakeDevice {
    handlers: HashMap<String, Handler>,
    /// Ops to accept silently without any res frame
    pub silent_ops: Vec<String>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            silent_ops: Vec::new(),
        }
    }

    pub fn on<F>(mut self, op: &str, handler: F) -> Self
    where
        F: Fn(&CommandRequest) -> CommandResult + Send + Sync + 'static,
    {
        self.handlers.insert(op.to_string(), Box::new(handler));
        self
    }

    /// Convenience: op answers ok with a fixed result object
    pub fn on_ok(self, op: &str, result: Value) -> Self {
        self.on(op, move |req| ok_result(&req.id, result.clone()))
    }

    pub fn spawn(
        self,
        engine: Arc<RpcEngine>,
        mut req_rx: mpsc::UnboundedReceiver<PublishedFrame>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut terminal_by_id: HashMap<String, CommandResult> = HashMap::new();
            while let Some(frame) = req_rx.recv().await {
                if !frame.topic.ends_with("/cmd/req") {
                    continue;
                }
                let Ok(envelope) = Envelope::decode(&frame.payload) else {
                    continue;
                };
                let Ok(req) = envelope.payload_as::<CommandRequest>() else {
                    continue;
                };

                engine.handle_ack(CommandAck {
                    id: req.id.clone(),
                    ts: Utc::now(),
                    accepted: true,
                    err: None,
                });

                if self.silent_ops.contains(&req.op) {
                    continue;
                }

                // Device-side dedup: a retried id re-plays the stored result
                // without re-executing
                let res = if let Some(prior) = terminal_by_id.get(&req.id) {
                    prior.clone()
                } else {
                    let res = match self.handlers.get(&req.op) {
                        Some(handler) => handler(&req),
                        None => CommandResult {
                            id: req.id.clone(),
                            ts: Utc::now(),
                            ok: false,
                            result: None,
                            progress: None,
                            err: Some(CommandError::new(
                                domain::command::ErrorCode::Unsupported,
                                format!("no handler for {}", req.op),
                            )),
                        },
                    };
                    terminal_by_id.insert(req.id.clone(), res.clone());
                    res
                };
                engine.handle_res(res);
            }
        })
    }
}

pub fn ok_result(id: &str, result: Value) -> CommandResult {
    CommandResult {
        id: id.to_string(),
        ts: Utc::now(),
        ok: true,
        result: Some(result),
        progress: None,
        err: None,
    }
}

/// Fully wired application stack over a fake transport and scripted device
pub struct TestStack {
    pub transport: Arc<FakeTransport>,
    pub engine: Arc<RpcEngine>,
    pub store: Arc<MemoryKvStore>,
    pub hub: Arc<EventHub>,
    pub registry: Arc<DeviceRegistry>,
    pub topology: Arc<TopologyStore>,
    pub telemetry: Arc<TelemetrySink>,
    pub executor: Arc<ToolExecutor>,
}

pub fn stack(device: FakeDevice) -> TestStack {
    let (transport, req_rx) = FakeTransport::new();

    let mut rpc_config = RpcConfig::new(Scope::new("acme", "home-1").unwrap());
    rpc_config.ack_timeout = Duration::from_millis(200);
    rpc_config.default_result_timeout = Duration::from_millis(1_000);
    rpc_config.max_retries = 1;

    let engine = Arc::new(RpcEngine::new(transport.clone(), rpc_config));
    device.spawn(engine.clone(), req_rx);

    let store = Arc::new(MemoryKvStore::new());
    let hub = Arc::new(EventHub::new(store.clone()));
    let registry = Arc::new(DeviceRegistry::new(store.clone(), hub.clone()));
    let topology = Arc::new(TopologyStore::new(store.clone()));
    let telemetry = Arc::new(TelemetrySink::new());
    let tools = Arc::new(ToolRegistry::with_builtins(&[]));
    let executor = Arc::new(ToolExecutor::new(
        tools,
        engine.clone(),
        registry.clone(),
        topology.clone(),
        telemetry.clone(),
        ToolLimits::default(),
    ));

    TestStack {
        transport,
        engine,
        store,
        hub,
        registry,
        topology,
        telemetry,
        executor,
    }
}

pub fn err_result(id: &str, code: &str, msg: &str) -> CommandResult {
    CommandResult {
        id: id.to_string(),
        ts: Utc::now(),
        ok: false,
        result: None,
        progress: None,
        err: Some(CommandError {
            code: code.to_string(),
            msg: msg.to_string(),
        }),
    }
}

//! RPC engine
//!
//! Correlates `cmd/req` → `cmd/ack` → `cmd/res` exchanges by command id.
//! Retries re-publish the same id (the id is the dedup key); a received
//! ack/res is terminal regardless of how many times the req went out, and
//! the caller observes exactly one terminal outcome.

use chrono::Utc;
use dashmap::DashMap;
use domain::command::{
    CommandAck, CommandError, CommandRequest, CommandResult, CommandState, ErrorCode, Expect,
};
use domain::device::{DeviceId, Scope};
use domain::envelope::{Envelope, Trace};
use domain::topic::{CmdLeg, Topic, TopicKind};
use infrastructure::config::RpcLimits;
use infrastructure::mqtt::QoS;
use infrastructure::mqtt::client::{ConnectionEvent, MqttPublisherClient};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CMD_SCHEMA: &str = "cmd/1.0";

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub scope: Scope,
    pub ack_timeout: Duration,
    pub default_result_timeout: Duration,
    pub max_retries: u32,
    pub per_device_inflight: usize,
    pub global_inflight: usize,
}

impl RpcConfig {
    pub fn new(scope: Scope) -> Self {
        Self::from_limits(scope, &RpcLimits::default())
    }

    pub fn from_limits(scope: Scope, limits: &RpcLimits) -> Self {
        Self {
            scope,
            ack_timeout: Duration::from_millis(limits.ack_timeout_ms),
            default_result_timeout: Duration::from_millis(limits.result_timeout_ms),
            max_retries: limits.max_retries,
            per_device_inflight: limits.per_device_inflight.max(1),
            global_inflight: limits.global_inflight.max(1),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub expect: Expect,
    /// Re-use an id to retry an earlier command without re-execution
    pub idempotency_id: Option<String>,
    pub dry_run: Option<bool>,
    pub change_set_id: Option<String>,
    pub trace: Trace,
}

/// The single terminal outcome every caller observes
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub id: String,
    pub state: CommandState,
    pub result: Option<serde_json::Value>,
    pub err: Option<CommandError>,
}

impl CommandOutcome {
    fn done(id: String, result: Option<serde_json::Value>) -> Self {
        Self {
            id,
            state: CommandState::Done,
            result,
            err: None,
        }
    }

    fn failed(id: String, err: CommandError) -> Self {
        Self {
            id,
            state: CommandState::Failed,
            result: None,
            err: Some(err),
        }
    }

    fn timeout(id: String, msg: &str) -> Self {
        Self {
            id,
            state: CommandState::Timeout,
            result: None,
            err: Some(CommandError::new(ErrorCode::Timeout, msg)),
        }
    }

    fn cancelled(id: String) -> Self {
        Self {
            id,
            state: CommandState::Cancelled,
            result: None,
            err: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.state == CommandState::Done
    }

    /// Engine-side error code, when the outcome is not Done
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.state {
            CommandState::Timeout => Some(ErrorCode::Timeout),
            _ => self.err.as_ref().map(|e| e.error_code()),
        }
    }
}

enum RpcFrame {
    Ack(CommandAck),
    Res(CommandResult),
}

struct PendingEntry {
    tx: mpsc::UnboundedSender<RpcFrame>,
    topic: String,
    payload: Vec<u8>,
    /// Absolute re-publish cutoff used on transport resume
    deadline: Instant,
}

/// Terminal states of recently finished commands, for late-frame triage
struct CompletedLog {
    states: DashMap<String, CommandState>,
    order: Mutex<VecDeque<String>>,
    cap: usize,
}

impl CompletedLog {
    fn new(cap: usize) -> Self {
        Self {
            states: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    fn record(&self, id: &str, state: CommandState) {
        self.states.insert(id.to_string(), state);
        let evicted = {
            let mut order = match self.order.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            order.push_back(id.to_string());
            if order.len() > self.cap {
                order.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            self.states.remove(&old);
        }
    }

    fn get(&self, id: &str) -> Option<CommandState> {
        self.states.get(id).map(|s| *s)
    }
}

pub struct RpcEngine {
    publisher: Arc<dyn MqttPublisherClient>,
    config: RpcConfig,
    pending: DashMap<String, PendingEntry>,
    device_slots: DashMap<DeviceId, Arc<Semaphore>>,
    global_slots: Arc<Semaphore>,
    completed: CompletedLog,
}

impl RpcEngine {
    pub fn new(publisher: Arc<dyn MqttPublisherClient>, config: RpcConfig) -> Self {
        let global_slots = Arc::new(Semaphore::new(config.global_inflight));
        Self {
            publisher,
            config,
            pending: DashMap::new(),
            device_slots: DashMap::new(),
            global_slots,
            completed: CompletedLog::new(1024),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.config.scope
    }

    /// Issue a command and await its single terminal outcome
    pub async fn call(
        &self,
        device: &DeviceId,
        op: &str,
        args: serde_json::Value,
        opts: CallOptions,
        cancel: &CancellationToken,
    ) -> CommandOutcome {
        self.drive(device, op, args, opts, cancel, None).await
    }

    /// Like `call`, but interim `progress` payloads are forwarded
    pub async fn call_with_progress(
        &self,
        device: &DeviceId,
        op: &str,
        args: serde_json::Value,
        opts: CallOptions,
        cancel: &CancellationToken,
        progress: mpsc::UnboundedSender<serde_json::Value>,
    ) -> CommandOutcome {
        self.drive(device, op, args, opts, cancel, Some(progress))
            .await
    }

    async fn drive(
        &self,
        device: &DeviceId,
        op: &str,
        args: serde_json::Value,
        opts: CallOptions,
        cancel: &CancellationToken,
        progress: Option<mpsc::UnboundedSender<serde_json::Value>>,
    ) -> CommandOutcome {
        let id = opts
            .idempotency_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.pending.contains_key(&id) {
            return CommandOutcome::failed(
                id.clone(),
                CommandError::new(ErrorCode::Busy, "command id already in flight"),
            );
        }

        let result_timeout = opts.timeout.unwrap_or(self.config.default_result_timeout);
        let req = CommandRequest {
            id: id.clone(),
            op: op.to_string(),
            schema: CMD_SCHEMA.to_string(),
            args,
            timeout_ms: result_timeout.as_millis() as u64,
            expect: opts.expect,
            reply_to: None,
            dry_run: opts.dry_run,
            change_set_id: opts.change_set_id.clone(),
            ts: Utc::now(),
        };

        let topic = Topic::device(
            self.config.scope.clone(),
            device.clone(),
            TopicKind::Cmd(CmdLeg::Req),
        )
        .to_string();

        let mut trace = opts.trace.clone();
        trace.req_id = Some(id.clone());

        let payload = match serde_json::to_value(&req)
            .map_err(|e| e.to_string())
            .and_then(|v| {
                Envelope::new(CMD_SCHEMA, v)
                    .with_trace(trace)
                    .encode()
                    .map_err(|e| e.to_string())
            }) {
            Ok(bytes) => bytes,
            Err(e) => {
                return CommandOutcome::failed(id, CommandError::new(ErrorCode::Decode, e));
            }
        };

        if opts.expect == Expect::None {
            // Fire and forget
            return match self.publish_req(&topic, &payload).await {
                Ok(()) => CommandOutcome::done(id, None),
                Err(e) => CommandOutcome::failed(
                    id,
                    CommandError::new(ErrorCode::Transport, e.to_string()),
                ),
            };
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let deadline = Instant::now()
            + result_timeout
            + self.config.ack_timeout * (self.config.max_retries + 1);
        self.pending.insert(
            id.clone(),
            PendingEntry {
                tx,
                topic: topic.clone(),
                payload: payload.clone(),
                deadline,
            },
        );

        // FIFO fairness per device, bounded globally
        let device_sem = self
            .device_slots
            .entry(device.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_device_inflight)))
            .clone();

        let permits = tokio::select! {
            _ = cancel.cancelled() => None,
            acquired = async {
                let device_permit = device_sem.acquire_owned().await;
                let global_permit = self.global_slots.clone().acquire_owned().await;
                (device_permit, global_permit)
            } => Some(acquired),
        };

        let outcome = match permits {
            None => CommandOutcome::cancelled(id.clone()),
            Some((Ok(_device_permit), Ok(_global_permit))) => {
                self.exchange(&id, &topic, &payload, rx, opts.expect, result_timeout, cancel, progress)
                    .await
            }
            Some(_) => CommandOutcome::failed(
                id.clone(),
                CommandError::new(ErrorCode::Internal, "semaphore closed"),
            ),
        };

        self.pending.remove(&id);
        self.completed.record(&id, outcome.state);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn exchange(
        &self,
        id: &str,
        topic: &str,
        payload: &[u8],
        mut rx: mpsc::UnboundedReceiver<RpcFrame>,
        expect: Expect,
        result_timeout: Duration,
        cancel: &CancellationToken,
        progress: Option<mpsc::UnboundedSender<serde_json::Value>>,
    ) -> CommandOutcome {
        let mut attempts: u32 = 0;
        if let Err(e) = self.publish_req(topic, payload).await {
            // The retry path below re-publishes; a dead transport runs the
            // ack timeout down to a Timeout outcome
            warn!(id = %id, error = %e, "Initial publish failed");
        }

        // Ack phase. A result frame before any ack wins outright.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return CommandOutcome::cancelled(id.to_string()),
                frame = rx.recv() => match frame {
                    None => {
                        return CommandOutcome::failed(
                            id.to_string(),
                            CommandError::new(ErrorCode::Internal, "correlation channel closed"),
                        );
                    }
                    Some(RpcFrame::Ack(ack)) => {
                        if !ack.accepted {
                            let err = ack.err.unwrap_or_else(|| {
                                CommandError::new(ErrorCode::Internal, "rejected without error")
                            });
                            return CommandOutcome::failed(id.to_string(), err);
                        }
                        if expect == Expect::Ack {
                            return CommandOutcome::done(id.to_string(), None);
                        }
                        break;
                    }
                    Some(RpcFrame::Res(res)) => {
                        if res.is_progress() {
                            // Progress implies the device accepted the command
                            if expect == Expect::Ack {
                                return CommandOutcome::done(id.to_string(), None);
                            }
                            if let (Some(sink), Some(value)) = (&progress, res.progress) {
                                let _ = sink.send(value);
                            }
                            break;
                        }
                        return Self::terminal_from(id, res);
                    }
                },
                _ = tokio::time::sleep(self.config.ack_timeout) => {
                    if attempts >= self.config.max_retries {
                        return CommandOutcome::timeout(id.to_string(), "no ack from device");
                    }
                    attempts += 1;
                    debug!(id = %id, attempt = attempts, "Ack timeout, re-publishing");
                    if let Err(e) = self.publish_req(topic, payload).await {
                        warn!(id = %id, error = %e, "Re-publish failed");
                    }
                }
            }
        }

        // Result phase. Every received frame restarts the timer, so progress
        // frames keep a long-running op alive.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return CommandOutcome::cancelled(id.to_string()),
                frame = rx.recv() => match frame {
                    None => {
                        return CommandOutcome::failed(
                            id.to_string(),
                            CommandError::new(ErrorCode::Internal, "correlation channel closed"),
                        );
                    }
                    // Duplicate ack after the first, or ack after result
                    // already started streaming: ignored
                    Some(RpcFrame::Ack(_)) => {}
                    Some(RpcFrame::Res(res)) => {
                        if res.is_progress() {
                            if let (Some(sink), Some(value)) = (&progress, res.progress) {
                                let _ = sink.send(value);
                            }
                        } else {
                            return Self::terminal_from(id, res);
                        }
                    }
                },
                _ = tokio::time::sleep(result_timeout) => {
                    if attempts >= self.config.max_retries {
                        return CommandOutcome::timeout(id.to_string(), "no result from device");
                    }
                    attempts += 1;
                    debug!(id = %id, attempt = attempts, "Result timeout, re-publishing");
                    if let Err(e) = self.publish_req(topic, payload).await {
                        warn!(id = %id, error = %e, "Re-publish failed");
                    }
                }
            }
        }
    }

    fn terminal_from(id: &str, res: CommandResult) -> CommandOutcome {
        if res.ok {
            CommandOutcome::done(id.to_string(), res.result)
        } else {
            let err = res
                .err
                .unwrap_or_else(|| CommandError::new(ErrorCode::Internal, "failed without error"));
            CommandOutcome::failed(id.to_string(), err)
        }
    }

    async fn publish_req(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.publisher
            .publish_bytes(topic, payload, QoS::AtLeastOnce, false)
            .await
    }

    /// Route an incoming `cmd/ack` frame
    pub fn handle_ack(&self, ack: CommandAck) {
        match self.pending.get(&ack.id) {
            Some(entry) => {
                let _ = entry.tx.send(RpcFrame::Ack(ack));
            }
            None => {
                // Ack after result is the common benign case here
                debug!(id = %ack.id, "Ack for unknown or finished command ignored");
            }
        }
    }

    /// Route an incoming `cmd/res` frame
    pub fn handle_res(&self, res: CommandResult) {
        match self.pending.get(&res.id) {
            Some(entry) => {
                let _ = entry.tx.send(RpcFrame::Res(res));
            }
            None => match self.completed.get(&res.id) {
                Some(CommandState::Cancelled) => {
                    // Recorded for the log, never delivered to the caller
                    debug!(id = %res.id, ok = res.ok, "Result after cancellation recorded, not delivered");
                }
                Some(state) => {
                    debug!(id = %res.id, ?state, "Duplicate result ignored, first terminal wins");
                }
                None => {
                    debug!(id = %res.id, "Result for unknown command ignored");
                }
            },
        }
    }

    /// Re-publish pending commands whose deadline has not elapsed; called on
    /// transport resume. Expired commands run out locally and surface
    /// Timeout to their callers.
    pub async fn on_transport_resumed(&self) {
        let now = Instant::now();
        // Snapshot first: publishing must not hold map shards across awaits
        let snapshot: Vec<(String, String, Vec<u8>)> = self
            .pending
            .iter()
            .filter(|entry| now < entry.deadline)
            .map(|entry| (entry.key().clone(), entry.topic.clone(), entry.payload.clone()))
            .collect();

        let mut republished = 0usize;
        for (id, topic, payload) in snapshot {
            if let Err(e) = self.publish_req(&topic, &payload).await {
                warn!(id = %id, error = %e, "Resume re-publish failed");
            } else {
                republished += 1;
            }
        }
        if republished > 0 {
            debug!(count = republished, "Re-published pending commands after reconnect");
        }
    }

    /// Watch the transport and reconcile pending commands on every resume
    pub fn spawn_reconnect_watch(
        self: &Arc<Self>,
        mut conn_rx: broadcast::Receiver<ConnectionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match conn_rx.recv().await {
                    Ok(ConnectionEvent::Up) => engine.on_transport_resumed().await,
                    Ok(ConnectionEvent::Down) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

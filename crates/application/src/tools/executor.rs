//! Tool executor
//!
//! Enforces the category policies (Read concurrency, Test rate limits, Act
//! via change-set only), validates input schema-first, bounds in-flight runs
//! per session and globally, and isolates tool panics into error results.

use crate::registry::DeviceRegistry;
use crate::rpc::RpcEngine;
use crate::telemetry::TelemetrySink;
use crate::topology::TopologyStore;
use dashmap::DashMap;
use domain::command::ErrorCode;
use domain::device::DeviceId;
use domain::tool::{ToolCategory, ToolError, ToolResult};
use infrastructure::config::ToolLimits;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use super::{Tool, ToolContext, ToolOutput, ToolRegistry, schema};

#[derive(Clone)]
pub struct InvokeOptions {
    pub session_id: Option<String>,
    pub dry_run: bool,
    pub change_set_id: Option<String>,
    pub cancel: CancellationToken,
    pub trace_id: Option<String>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            dry_run: false,
            change_set_id: None,
            cancel: CancellationToken::new(),
            trace_id: None,
        }
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    rpc: Arc<RpcEngine>,
    devices: Arc<DeviceRegistry>,
    topology: Arc<TopologyStore>,
    telemetry: Arc<TelemetrySink>,
    limits: ToolLimits,
    global_slots: Arc<Semaphore>,
    session_slots: DashMap<String, Arc<Semaphore>>,
    test_slots: DashMap<DeviceId, Arc<Semaphore>>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        rpc: Arc<RpcEngine>,
        devices: Arc<DeviceRegistry>,
        topology: Arc<TopologyStore>,
        telemetry: Arc<TelemetrySink>,
        limits: ToolLimits,
    ) -> Self {
        let global_slots = Arc::new(Semaphore::new(limits.global_inflight.max(1)));
        Self {
            registry,
            rpc,
            devices,
            topology,
            telemetry,
            limits,
            global_slots,
            session_slots: DashMap::new(),
            test_slots: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn error_output(trace_id: String, err: ToolError) -> ToolOutput {
        ToolOutput::result_only(ToolResult::error(trace_id, err))
    }

    /// Run one tool invocation to completion under all policy bounds
    pub async fn invoke(&self, name: &str, args: &Value, opts: InvokeOptions) -> ToolOutput {
        let trace_id = opts
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(tool) = self.registry.get(name) else {
            return Self::error_output(
                trace_id,
                ToolError {
                    code: ErrorCode::Unsupported.as_str().to_string(),
                    msg: format!("unknown tool: {name}"),
                    field: None,
                },
            );
        };
        let spec = tool.spec().clone();

        // Schema first: a validation failure never contacts a device
        if let Err(err) = schema::validate_args(args, &spec.input_schema) {
            return Self::error_output(trace_id, err);
        }

        // Act tools mutate device state and only run inside a change-set
        if spec.category == ToolCategory::Act && opts.change_set_id.is_none() {
            return Self::error_output(
                trace_id,
                ToolError {
                    code: ErrorCode::Forbidden.as_str().to_string(),
                    msg: format!("{name} is an Act tool and must run via a change-set"),
                    field: None,
                },
            );
        }

        let _global = match self.global_slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Self::error_output(
                    trace_id,
                    ToolError {
                        code: ErrorCode::Internal.as_str().to_string(),
                        msg: "executor shutting down".to_string(),
                        field: None,
                    },
                );
            }
        };

        let _session = match &opts.session_id {
            Some(session_id) => {
                let sem = self
                    .session_slots
                    .entry(session_id.clone())
                    .or_insert_with(|| {
                        Arc::new(Semaphore::new(self.limits.per_session_inflight.max(1)))
                    })
                    .clone();
                sem.acquire_owned().await.ok()
            }
            None => None,
        };

        // Tests emit active traffic; queue them per device
        let _test_slot = if spec.category == ToolCategory::Test {
            match args
                .get("device")
                .and_then(Value::as_str)
                .and_then(|raw| DeviceId::new(raw).ok())
            {
                Some(device) => {
                    let sem = self
                        .test_slots
                        .entry(device)
                        .or_insert_with(|| {
                            Arc::new(Semaphore::new(self.limits.test_per_device.max(1)))
                        })
                        .clone();
                    sem.acquire_owned().await.ok()
                }
                None => None,
            }
        } else {
            None
        };

        let ctx = ToolContext {
            rpc: self.rpc.clone(),
            registry: self.devices.clone(),
            topology: self.topology.clone(),
            telemetry: self.telemetry.clone(),
            session_id: opts.session_id.clone(),
            trace_id: trace_id.clone(),
            dry_run: opts.dry_run,
            change_set_id: opts.change_set_id.clone(),
            cancel: opts.cancel.clone(),
        };

        if opts.cancel.is_cancelled() {
            return Self::error_output(
                trace_id,
                ToolError {
                    code: ErrorCode::Internal.as_str().to_string(),
                    msg: "cancelled before start".to_string(),
                    field: None,
                },
            );
        }

        // Run in a task so a panicking tool becomes an error result instead
        // of taking the worker down
        let args_owned = args.clone();
        let tool_task: Arc<dyn Tool> = tool;
        let handle =
            tokio::spawn(async move { tool_task.execute(&ctx, &args_owned).await });

        match handle.await {
            Ok(output) => output,
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(tool = %name, "Tool panicked");
                } else {
                    warn!(tool = %name, "Tool task aborted");
                }
                Self::error_output(
                    trace_id,
                    ToolError {
                        code: ErrorCode::Internal.as_str().to_string(),
                        msg: format!("tool {name} aborted"),
                        field: None,
                    },
                )
            }
        }
    }

    /// Drop the per-session limiter once a session closes
    pub fn release_session(&self, session_id: &str) {
        self.session_slots.remove(session_id);
    }
}

//! Built-in diagnosis toolbox
//!
//! Reads are pure queries over the stores or the device, Tests emit active
//! traffic through the RPC engine, Acts mutate device state and always
//! produce a rollback descriptor.

mod act;
mod read;

use super::{Tool, ToolContext};
use crate::rpc::{CallOptions, CommandOutcome};
use domain::command::ErrorCode;
use domain::device::DeviceId;
use domain::envelope::Trace;
use domain::tool::{ToolError, ToolResult};
use serde_json::Value;
use std::sync::Arc;

/// Every built-in, ready for registration
pub fn all() -> Vec<Arc<dyn Tool>> {
    let mut tools = read::all();
    tools.extend(test::all());
    tools.extend(act::all());
    tools
}

pub(crate) fn device_arg(args: &Value) -> Result<DeviceId, ToolError> {
    let raw = args.get("device").and_then(Value::as_str).ok_or(ToolError {
        code: ErrorCode::InvalidArgs.as_str().to_string(),
        msg: "device is required".to_string(),
        field: Some("args.device".to_string()),
    })?;
    DeviceId::new(raw).map_err(|e| ToolError {
        code: ErrorCode::InvalidArgs.as_str().to_string(),
        msg: e.to_string(),
        field: Some("args.device".to_string()),
    })
}

/// RPC options threaded from the tool context
pub(crate) fn rpc_options(ctx: &ToolContext) -> CallOptions {
    CallOptions {
        dry_run: ctx.dry_run.then_some(true),
        change_set_id: ctx.change_set_id.clone(),
        trace: Trace {
            session_id: ctx.session_id.clone(),
            trace_id: Some(ctx.trace_id.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Map a command outcome onto the unified result envelope
pub(crate) fn result_from_outcome(trace_id: &str, outcome: CommandOutcome) -> ToolResult {
    use domain::command::CommandState;

    match outcome.state {
        CommandState::Done => ToolResult::ok(trace_id)
            .with_metrics(outcome.result.unwrap_or_else(|| serde_json::json!({}))),
        CommandState::Cancelled => ToolResult::error(
            trace_id,
            ToolError {
                code: ErrorCode::Internal.as_str().to_string(),
                msg: "command cancelled".to_string(),
                field: None,
            },
        ),
        _ => {
            let (code, msg) = match outcome.err {
                Some(err) => (err.code, err.msg),
                None => (
                    ErrorCode::Timeout.as_str().to_string(),
                    "command timed out".to_string(),
                ),
            };
            ToolResult::error(
                trace_id,
                ToolError {
                    code,
                    msg,
                    field: None,
                },
            )
        }
    }
}

//! Act tools: device mutations, change-set only, always reversible
//!
//! Reversible acts capture the current setting through a read op before
//! touching anything and hand back a rollback descriptor that restores it.
//! Transient acts (steer, deauth) have nothing to restore; their descriptor
//! is a no-op step so a change-set containing them still applies.

use super::{device_arg, result_from_outcome, rpc_options};
use crate::tools::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use domain::change_set::RollbackStep;
use domain::command::ErrorCode;
use domain::tool::{ToolCategory, ToolError, ToolResult, ToolRisk, ToolSpec};
use serde_json::{Value, json};
use std::sync::Arc;

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ActTool::reversible(
            "wifi.set_power",
            ToolRisk::Medium,
            false,
            "wifi.get_radios",
            &["power_dbm"],
            json!({
                "type": "object",
                "required": ["device", "power_dbm"],
                "properties": {
                    "device": { "type": "string" },
                    "radio": { "type": "string" },
                    "power_dbm": { "type": "integer", "minimum": 0, "maximum": 30 }
                }
            }),
        )),
        Arc::new(ActTool::reversible(
            "wifi.set_channel",
            ToolRisk::Medium,
            false,
            "wifi.get_radios",
            &["channel", "width"],
            json!({
                "type": "object",
                "required": ["device", "channel"],
                "properties": {
                    "device": { "type": "string" },
                    "radio": { "type": "string" },
                    "channel": { "type": "integer", "minimum": 1, "maximum": 177 },
                    "width": { "type": "string", "enum": ["20MHz", "40MHz", "80MHz", "160MHz"] }
                }
            }),
        )),
        Arc::new(ActTool::reversible(
            "wifi.set_roaming",
            ToolRisk::Medium,
            false,
            "wifi.get_radios",
            &["roaming"],
            json!({
                "type": "object",
                "required": ["device", "roaming"],
                "properties": {
                    "device": { "type": "string" },
                    "roaming": { "type": "object" }
                }
            }),
        )),
        Arc::new(ActTool::reversible(
            "mesh.set_backhaul",
            ToolRisk::High,
            true,
            "mesh.get_backhaul",
            &["mode", "uplink"],
            json!({
                "type": "object",
                "required": ["device", "mode"],
                "properties": {
                    "device": { "type": "string" },
                    "mode": { "type": "string", "enum": ["auto", "wired", "wireless"] },
                    "uplink": { "type": "string" }
                }
            }),
        )),
        Arc::new(ActTool::reversible(
            "dhcpdns.set",
            ToolRisk::High,
            true,
            "dhcpdns.get_config",
            &["dhcp", "dns"],
            json!({
                "type": "object",
                "required": ["device"],
                "properties": {
                    "device": { "type": "string" },
                    "dhcp": { "type": "object" },
                    "dns": { "type": "object" }
                }
            }),
        )),
        Arc::new(ActTool::transient(
            "wifi.client_steer",
            ToolRisk::Medium,
            false,
            json!({
                "type": "object",
                "required": ["device", "client_mac", "target_bssid"],
                "properties": {
                    "device": { "type": "string" },
                    "client_mac": { "type": "string" },
                    "target_bssid": { "type": "string" }
                }
            }),
        )),
        Arc::new(ActTool::transient(
            "wifi.deauth",
            ToolRisk::High,
            true,
            json!({
                "type": "object",
                "required": ["device", "client_mac"],
                "properties": {
                    "device": { "type": "string" },
                    "client_mac": { "type": "string" }
                }
            }),
        )),
    ]
}

struct ActTool {
    spec: ToolSpec,
    /// Read op used to capture the pre-change setting
    read_op: Option<&'static str>,
    /// Keys copied from the read result into the rollback args
    rollback_keys: &'static [&'static str],
}

impl ActTool {
    fn reversible(
        name: &str,
        risk: ToolRisk,
        approval_required: bool,
        read_op: &'static str,
        rollback_keys: &'static [&'static str],
        input_schema: Value,
    ) -> Self {
        Self {
            spec: ToolSpec {
                name: name.to_string(),
                category: ToolCategory::Act,
                input_schema,
                output_schema: json!({ "type": "object" }),
                risk,
                requires_dry_run: true,
                approval_required,
            },
            read_op: Some(read_op),
            rollback_keys,
        }
    }

    fn transient(name: &str, risk: ToolRisk, approval_required: bool, input_schema: Value) -> Self {
        Self {
            spec: ToolSpec {
                name: name.to_string(),
                category: ToolCategory::Act,
                input_schema,
                output_schema: json!({ "type": "object" }),
                risk,
                requires_dry_run: true,
                approval_required,
            },
            read_op: None,
            rollback_keys: &[],
        }
    }

    async fn capture_rollback(
        &self,
        ctx: &ToolContext,
        args: &Value,
        device: &domain::device::DeviceId,
    ) -> Result<RollbackStep, ToolError> {
        let Some(read_op) = self.read_op else {
            // Transient mutation: nothing to restore
            return Ok(RollbackStep {
                tool: self.spec.name.clone(),
                args: json!({ "device": device.as_str(), "noop": true }),
            });
        };

        let mut read_opts = rpc_options(ctx);
        read_opts.dry_run = None; // the capture read is always real
        let outcome = ctx
            .rpc
            .call(
                device,
                read_op,
                json!({ "device": device.as_str() }),
                read_opts,
                &ctx.cancel,
            )
            .await;

        if !outcome.is_ok() {
            return Err(ToolError {
                code: ErrorCode::Internal.as_str().to_string(),
                msg: format!("cannot capture rollback state via {read_op}"),
                field: None,
            });
        }

        let current = outcome.result.unwrap_or_else(|| json!({}));
        let mut rollback_args = serde_json::Map::new();
        rollback_args.insert("device".to_string(), json!(device.as_str()));
        if let Some(radio) = args.get("radio") {
            rollback_args.insert("radio".to_string(), radio.clone());
        }
        for key in self.rollback_keys {
            if let Some(value) = current.get(*key) {
                rollback_args.insert((*key).to_string(), value.clone());
            }
        }

        Ok(RollbackStep {
            tool: self.spec.name.clone(),
            args: Value::Object(rollback_args),
        })
    }
}

#[async_trait]
impl Tool for ActTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> ToolOutput {
        // A transient act's rollback descriptor re-enters here as a no-op
        if args.get("noop").and_then(Value::as_bool) == Some(true) {
            return ToolOutput::result_only(
                ToolResult::ok(&ctx.trace_id).with_advice("rollback no-op"),
            );
        }

        let device = match device_arg(args) {
            Ok(device) => device,
            Err(err) => return ToolOutput::result_only(ToolResult::error(&ctx.trace_id, err)),
        };

        let rollback = match self.capture_rollback(ctx, args, &device).await {
            Ok(step) => step,
            Err(err) => return ToolOutput::result_only(ToolResult::error(&ctx.trace_id, err)),
        };

        let outcome = ctx
            .rpc
            .call(
                &device,
                &self.spec.name,
                args.clone(),
                rpc_options(ctx),
                &ctx.cancel,
            )
            .await;

        ToolOutput {
            result: result_from_outcome(&ctx.trace_id, outcome),
            rollback: Some(rollback),
        }
    }
}

//! Read tools: pure queries, no device mutation, high concurrency

use super::{device_arg, result_from_outcome, rpc_options};
use crate::tools::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use chrono::DateTime;
use domain::tool::{ToolCategory, ToolResult, ToolRisk, ToolSpec};
use serde_json::{Value, json};
use std::sync::Arc;

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetTopology::new()),
        Arc::new(ClientsList::new()),
        Arc::new(DeviceOpRead::new(
            "wifi.get_radios",
            "Radio inventory of an access point",
            json!({
                "type": "object",
                "required": ["device"],
                "properties": { "device": { "type": "string" } }
            }),
        )),
        Arc::new(DeviceOpRead::new(
            "dhcpdns.get_config",
            "DHCP/DNS configuration of the router",
            json!({
                "type": "object",
                "required": ["device"],
                "properties": { "device": { "type": "string" } }
            }),
        )),
        Arc::new(DeviceOpRead::new(
            "traffic.top_talkers",
            "Heaviest flows seen by the device",
            json!({
                "type": "object",
                "required": ["device"],
                "properties": {
                    "device": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100 }
                }
            }),
        )),
    ]
}

/// `net.get_topology` — current (or historical) site graph
struct GetTopology {
    spec: ToolSpec,
}

impl GetTopology {
    fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "net.get_topology".to_string(),
                category: ToolCategory::Read,
                input_schema: json!({
                    "type": "object",
                    "properties": { "at": { "type": "string" } }
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": { "nodes": { "type": "integer" }, "edges": { "type": "integer" } }
                }),
                risk: ToolRisk::Low,
                requires_dry_run: false,
                approval_required: false,
            },
        }
    }
}

#[async_trait]
impl Tool for GetTopology {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> ToolOutput {
        let at = args
            .get("at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        let graph = ctx.topology.graph_at(ctx.rpc.scope(), at);
        let result = ToolResult::ok(&ctx.trace_id)
            .with_metrics(json!({
                "nodes": graph.nodes.len(),
                "edges": graph.edges.len(),
                "at": graph.at,
            }))
            .with_evidence(json!({ "graph": graph }));
        ToolOutput::result_only(result)
    }
}

/// `clients.list` — current client association table from roaming inference
struct ClientsList {
    spec: ToolSpec,
}

impl ClientsList {
    fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "clients.list".to_string(),
                category: ToolCategory::Read,
                input_schema: json!({ "type": "object" }),
                output_schema: json!({
                    "type": "object",
                    "properties": { "clients": { "type": "integer" } }
                }),
                risk: ToolRisk::Low,
                requires_dry_run: false,
                approval_required: false,
            },
        }
    }
}

#[async_trait]
impl Tool for ClientsList {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> ToolOutput {
        let associations = ctx.topology.associations();
        let evidence: Vec<Value> = associations
            .iter()
            .map(|a| {
                json!({
                    "mac": a.client_mac,
                    "bssid": a.bssid,
                    "rssi": a.rssi,
                    "ts": a.ts,
                })
            })
            .collect();

        let mut result = ToolResult::ok(&ctx.trace_id)
            .with_metrics(json!({ "clients": associations.len() }));
        result.evidence = evidence;
        ToolOutput::result_only(result)
    }
}

/// Generic passthrough read executed on the device itself
struct DeviceOpRead {
    spec: ToolSpec,
}

impl DeviceOpRead {
    fn new(name: &str, summary: &str, input_schema: Value) -> Self {
        Self {
            spec: ToolSpec {
                name: name.to_string(),
                category: ToolCategory::Read,
                input_schema,
                output_schema: json!({ "type": "object", "description": summary }),
                risk: ToolRisk::Low,
                requires_dry_run: false,
                approval_required: false,
            },
        }
    }
}

#[async_trait]
impl Tool for DeviceOpRead {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> ToolOutput {
        let device = match device_arg(args) {
            Ok(device) => device,
            Err(err) => {
                return ToolOutput::result_only(ToolResult::error(&ctx.trace_id, err));
            }
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
        ToolOutput::result_only(result_from_outcome(&ctx.trace_id, outcome))
    }
}

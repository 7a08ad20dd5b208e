//! Topology entities
//!
//! Nodes and edges are stored as flat tables keyed by id and versioned by
//! snapshot `ts` — never as interlinked pointers.

use crate::device::DeviceId;
use crate::envelope::ts_ms;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A network interface as reported by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// Node in the topology graph, from `topology/discovery`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    /// Stable node id; the device MAC for managed devices
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// router, ap, mesh-node, switch, client, …
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub routing: serde_json::Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Edge in the topology graph, from `topology/connections` or inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    /// wired, wireless, mesh-backhaul, …
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metrics: serde_json::Value,
}

/// One discovery snapshot (nodes) at an instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    #[serde(with = "ts_ms")]
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub nodes: Vec<TopologyNode>,
}

/// One connections snapshot (edges) at an instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    #[serde(with = "ts_ms")]
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub edges: Vec<TopologyEdge>,
}

/// Point-in-time view: latest discovery + connections with `ts <= at`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopologyGraph {
    pub at: Option<DateTime<Utc>>,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

/// Difference between two point-in-time graphs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopologyDiff {
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub added_edges: Vec<String>,
    pub removed_edges: Vec<String>,
}

impl TopologyDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

/// Quality classification of a roam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoamQuality {
    Smooth,
    Delayed,
    Flapping,
}

/// Derived roaming event — never published by any single device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoamingEvent {
    pub client_mac: String,
    pub from_bssid: String,
    pub to_bssid: String,
    #[serde(with = "ts_ms")]
    pub t_leave: DateTime<Utc>,
    #[serde(with = "ts_ms")]
    pub t_join: DateTime<Utc>,
    pub rssi_before: i32,
    pub rssi_after: i32,
    pub quality: RoamQuality,
}

/// Payload of `telemetry/wifi_clients`, published by each AP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiClientReport {
    pub bssid: String,
    #[serde(default)]
    pub clients: Vec<WifiClientEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiClientEntry {
    pub mac: String,
    pub rssi: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_decode_with_unknown_fields() {
        let node: TopologyNode = serde_json::from_value(json!({
            "id": "aabbccddeeff",
            "role": "ap",
            "interfaces": [{"name": "wlan0", "mac": "aa:bb:cc:dd:ee:01"}],
            "vendor_blob": {"x": 1}
        }))
        .unwrap();
        assert_eq!(node.role.as_deref(), Some("ap"));
        assert_eq!(node.interfaces.len(), 1);
    }

    #[test]
    fn test_wifi_client_report_decode() {
        let report: WifiClientReport = serde_json::from_value(json!({
            "bssid": "aa:bb:cc:dd:ee:01",
            "clients": [{"mac": "11:22:33:44:55:66", "rssi": -55}]
        }))
        .unwrap();
        assert_eq!(report.clients[0].rssi, -55);
    }
}

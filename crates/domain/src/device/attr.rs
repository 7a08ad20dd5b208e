use serde::{Deserialize, Serialize};

/// Retained, immutable hardware facts for a device
///
/// Replaced atomically when a new retained `attr` message arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAttr {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub hw: Option<String>,
    /// Wire schemas the firmware can speak, e.g. `["cmd/1.0", "state/1.2"]`
    #[serde(default)]
    pub supported_schemas: Vec<String>,
    /// Capability flags, e.g. `["wifi", "mesh", "dhcp_server"]`
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl DeviceAttr {
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }
}

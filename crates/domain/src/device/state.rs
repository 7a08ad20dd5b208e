use serde::{Deserialize, Serialize};

/// Overall device health as reported by the device itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    Warn,
    Error,
}

impl Default for Health {
    fn default() -> Self {
        Self::Ok
    }
}

/// Network-facing portion of a device state report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetInfo {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub gw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub bytes_rx: u64,
    #[serde(default)]
    pub bytes_tx: u64,
    /// Mesh parent node, when the device is a mesh leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Self-diagnosis counters carried inside a state report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub restart_count: u64,
}

/// Retained device state, one per DeviceId
///
/// Mutated only by ingestion of a `state` message; a retained empty payload
/// removes it. `uptime_s` must not decrease unless `restart_count` increases;
/// a regression is accepted but flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub uptime_s: u64,
    #[serde(default)]
    pub cpu_pct: f64,
    #[serde(default)]
    pub mem_pct: f64,
    #[serde(default)]
    pub disk_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    #[serde(default)]
    pub net: NetInfo,
    #[serde(default)]
    pub diagnosis: DiagnosisInfo,
    /// Device-family specific fields we do not model; kept verbatim
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl DeviceState {
    /// True when `other` (the newer report) regressed uptime without a
    /// matching restart_count bump
    pub fn uptime_regressed_without_restart(&self, newer: &DeviceState) -> bool {
        newer.uptime_s < self.uptime_s
            && newer.diagnosis.restart_count <= self.diagnosis.restart_count
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            health: Health::Ok,
            firmware: None,
            uptime_s: 0,
            cpu_pct: 0.0,
            mem_pct: 0.0,
            disk_pct: 0.0,
            temp_c: None,
            net: NetInfo::default(),
            diagnosis: DiagnosisInfo::default(),
            extra: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let state: DeviceState = serde_json::from_value(json!({
            "health": "warn",
            "uptime_s": 120,
            "net": { "ip": "192.168.1.1", "bytes_rx": 10, "bytes_tx": 20, "fancy_new_field": 1 },
            "brand_new_top_level": { "x": 1 }
        }))
        .unwrap();

        assert_eq!(state.health, Health::Warn);
        assert_eq!(state.uptime_s, 120);
        assert_eq!(state.net.ip.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn test_uptime_regression_detection() {
        let old = DeviceState {
            uptime_s: 500,
            ..Default::default()
        };
        let mut newer = DeviceState {
            uptime_s: 10,
            ..Default::default()
        };

        assert!(old.uptime_regressed_without_restart(&newer));

        newer.diagnosis.restart_count = 1;
        assert!(!old.uptime_regressed_without_restart(&newer));
    }

    #[test]
    fn test_uptime_increase_is_not_regression() {
        let old = DeviceState {
            uptime_s: 500,
            ..Default::default()
        };
        let newer = DeviceState {
            uptime_s: 600,
            ..Default::default()
        };
        assert!(!old.uptime_regressed_without_restart(&newer));
    }
}

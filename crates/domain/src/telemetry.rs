use crate::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only time-series sample; never retained on the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub device_id: DeviceId,
    pub metric: String,
    pub value: serde_json::Value,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<serde_json::Value>,
}

impl TelemetryPoint {
    pub fn new(
        device_id: DeviceId,
        metric: impl Into<String>,
        value: serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            metric: metric.into(),
            value,
            ts,
            labels: None,
        }
    }
}

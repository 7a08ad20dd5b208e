use crate::device::DeviceId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Append-only diagnostic event
///
/// `device_id` is absent for controller-origin events (ingress overflow,
/// change-set alerts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    pub event_type: String,
    pub severity: Severity,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl DeviceEvent {
    pub fn new(
        device_id: Option<DeviceId>,
        event_type: impl Into<String>,
        severity: Severity,
        extra: serde_json::Value,
    ) -> Self {
        Self {
            device_id,
            event_type: event_type.into(),
            severity,
            ts: Utc::now(),
            extra,
        }
    }

    /// `uptime_s` went backwards without a restart_count bump
    pub fn uptime_regression(device_id: DeviceId, old_uptime: u64, new_uptime: u64) -> Self {
        Self::new(
            Some(device_id),
            "Suspicious.UptimeRegression",
            Severity::Warning,
            serde_json::json!({ "old_uptime_s": old_uptime, "new_uptime_s": new_uptime }),
        )
    }

    pub fn presence_online(device_id: DeviceId) -> Self {
        Self::new(
            Some(device_id),
            "Presence.Online",
            Severity::Info,
            serde_json::Value::Null,
        )
    }

    pub fn presence_offline(device_id: DeviceId, reason: Option<String>) -> Self {
        Self::new(
            Some(device_id),
            "Presence.Offline",
            Severity::Warning,
            serde_json::json!({ "reason": reason }),
        )
    }

    /// A second live transport session appeared for an already-online device
    pub fn duplicate_session(device_id: DeviceId) -> Self {
        Self::new(
            Some(device_id),
            "Duplicate.Session",
            Severity::Warning,
            serde_json::Value::Null,
        )
    }

    pub fn ingress_overflow(dropped: u64) -> Self {
        Self::new(
            None,
            "IngressOverflow",
            Severity::Warning,
            serde_json::json!({ "dropped": dropped }),
        )
    }

    /// Rollback itself failed; operator action required
    pub fn change_set_partial(change_set_id: impl Into<String>) -> Self {
        Self::new(
            None,
            "ChangeSet.Partial",
            Severity::Error,
            serde_json::json!({ "change_set_id": change_set_id.into() }),
        )
    }
}

/// Sink for diagnostic events raised by any component
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: DeviceEvent);
}

/// Sink that drops everything; handy default for tests
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: DeviceEvent) {}
}

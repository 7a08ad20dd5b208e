use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Online/offline view derived from the retained `lwt` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub status: PresenceStatus,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Presence {
    pub fn online(ts: DateTime<Utc>) -> Self {
        Self {
            status: PresenceStatus::Online,
            ts,
            reason: None,
        }
    }

    pub fn offline(ts: DateTime<Utc>, reason: Option<String>) -> Self {
        Self {
            status: PresenceStatus::Offline,
            ts,
            reason,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

/// Reason attached to an orderly controller/device shutdown
pub const REASON_NORMAL_SHUTDOWN: &str = "normal_shutdown";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_wire_format() {
        let p = Presence::offline(Utc::now(), Some(REASON_NORMAL_SHUTDOWN.to_string()));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["status"], "offline");
        assert_eq!(v["reason"], "normal_shutdown");
    }

    #[test]
    fn test_presence_decode_without_reason() {
        let p: Presence =
            serde_json::from_str(r#"{"status":"online","ts":"2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(p.is_online());
        assert!(p.reason.is_none());
    }
}

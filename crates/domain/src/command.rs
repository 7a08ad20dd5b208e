//! Command protocol frames
//!
//! A command travels `cmd/req` → `cmd/ack` → `cmd/res`, correlated by its id.
//! The id doubles as the idempotency key: retries re-use it and devices dedup
//! on it, answering with the prior terminal result if one exists.

use crate::envelope::ts_ms;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_RESULT_TIMEOUT_MS: u64 = 30_000;

/// What the caller expects back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expect {
    Ack,
    Result,
    None,
}

impl Default for Expect {
    fn default() -> Self {
        Self::Result
    }
}

/// Error taxonomy for the RPC layer
///
/// Device-supplied codes are surfaced verbatim as strings on the wire; this
/// enum is the engine-side view used for mapping and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "E_BUSY")]
    Busy,
    #[serde(rename = "E_INVALID_ARGS")]
    InvalidArgs,
    #[serde(rename = "E_FORBIDDEN")]
    Forbidden,
    #[serde(rename = "E_INTERNAL")]
    Internal,
    // Engine-only codes, never sent by devices
    #[serde(rename = "E_TRANSPORT")]
    Transport,
    #[serde(rename = "E_DECODE")]
    Decode,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "E_TIMEOUT",
            Self::Unsupported => "E_UNSUPPORTED",
            Self::Busy => "E_BUSY",
            Self::InvalidArgs => "E_INVALID_ARGS",
            Self::Forbidden => "E_FORBIDDEN",
            Self::Internal => "E_INTERNAL",
            Self::Transport => "E_TRANSPORT",
            Self::Decode => "E_DECODE",
        }
    }

    /// Safe to retry with the same command id
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Busy)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error block carried in ack/res frames
///
/// `code` stays a raw string so device-supplied codes survive verbatim even
/// when they are not in our taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: String,
    pub msg: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            msg: msg.into(),
        }
    }

    /// Engine-side view; unknown device codes map to `Internal`
    pub fn error_code(&self) -> ErrorCode {
        match self.code.as_str() {
            "E_TIMEOUT" => ErrorCode::Timeout,
            "E_UNSUPPORTED" => ErrorCode::Unsupported,
            "E_BUSY" => ErrorCode::Busy,
            "E_INVALID_ARGS" => ErrorCode::InvalidArgs,
            "E_FORBIDDEN" => ErrorCode::Forbidden,
            "E_TRANSPORT" => ErrorCode::Transport,
            "E_DECODE" => ErrorCode::Decode,
            _ => ErrorCode::Internal,
        }
    }
}

/// `…/cmd/req` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: String,
    pub op: String,
    pub schema: String,
    pub args: serde_json::Value,
    pub timeout_ms: u64,
    #[serde(default)]
    pub expect: Expect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_set_id: Option<String>,
    #[serde(with = "ts_ms")]
    pub ts: DateTime<Utc>,
}

/// `…/cmd/ack` payload — due within one second of the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub id: String,
    #[serde(with = "ts_ms")]
    pub ts: DateTime<Utc>,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<CommandError>,
}

/// `…/cmd/res` payload — interim frames carry `progress`, the terminal frame
/// carries `ok` plus `result` or `err`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    #[serde(with = "ts_ms")]
    pub ts: DateTime<Utc>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<CommandError>,
}

impl CommandResult {
    pub fn is_progress(&self) -> bool {
        self.progress.is_some()
    }
}

/// Lifecycle of a command as tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    Pending,
    Acked,
    Running,
    Done,
    Failed,
    Timeout,
    Cancelled,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let req = CommandRequest {
            id: "c-42".into(),
            op: "net.ping".into(),
            schema: "cmd/1.0".into(),
            args: json!({"target": "8.8.8.8", "count": 3}),
            timeout_ms: 5000,
            expect: Expect::Result,
            reply_to: None,
            dry_run: None,
            change_set_id: None,
            ts: Utc::now(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["id"], "c-42");
        assert_eq!(v["expect"], "result");
        assert!(v.get("dry_run").is_none());
        assert!(v.get("reply_to").is_none());
    }

    #[test]
    fn test_ack_decode_with_error() {
        let ack: CommandAck = serde_json::from_value(json!({
            "id": "c-1",
            "ts": "2026-01-01T00:00:00.000Z",
            "accepted": false,
            "err": {"code": "E_BUSY", "msg": "queue full"}
        }))
        .unwrap();
        assert!(!ack.accepted);
        let err = ack.err.unwrap();
        assert_eq!(err.error_code(), ErrorCode::Busy);
        assert!(err.error_code().retryable());
    }

    #[test]
    fn test_device_error_code_survives_verbatim() {
        let err = CommandError {
            code: "E_VENDOR_WEIRD".into(),
            msg: "??".into(),
        };
        // Unknown codes map to Internal engine-side but stay verbatim on the wire
        assert_eq!(err.error_code(), ErrorCode::Internal);
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["code"], "E_VENDOR_WEIRD");
    }

    #[test]
    fn test_progress_vs_terminal_frames() {
        let progress: CommandResult = serde_json::from_value(json!({
            "id": "c-1",
            "ts": "2026-01-01T00:00:00.000Z",
            "ok": true,
            "progress": {"pct": 40}
        }))
        .unwrap();
        assert!(progress.is_progress());

        let terminal: CommandResult = serde_json::from_value(json!({
            "id": "c-1",
            "ts": "2026-01-01T00:00:01.000Z",
            "ok": true,
            "result": {"loss_pct": 0}
        }))
        .unwrap();
        assert!(!terminal.is_progress());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CommandState::Pending.is_terminal());
        assert!(!CommandState::Acked.is_terminal());
        assert!(!CommandState::Running.is_terminal());
        assert!(CommandState::Done.is_terminal());
        assert!(CommandState::Failed.is_terminal());
        assert!(CommandState::Timeout.is_terminal());
        assert!(CommandState::Cancelled.is_terminal());
    }
}

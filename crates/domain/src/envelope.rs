//! Wire envelope codec
//!
//! `{ schema: "<kind>/<major>.<minor>", ts, trace?, payload }` — unknown
//! top-level and payload keys are ignored for forward compatibility, and
//! timestamps are always encoded UTC `Z` with millisecond precision.

use crate::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialize `DateTime<Utc>` as ISO-8601 UTC with millisecond precision.
/// Decoding accepts any RFC 3339 offset and normalises to UTC.
pub mod ts_ms {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Correlation block threaded through every exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Trace {
    pub fn is_empty(&self) -> bool {
        self.req_id.is_none()
            && self.correlation_id.is_none()
            && self.session_id.is_none()
            && self.trace_id.is_none()
    }
}

/// Parsed `<kind>/<major>.<minor>` schema tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub kind: String,
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let bad = || DomainError::BadSchema(raw.to_string());

        let (kind, version) = raw.rsplit_once('/').ok_or_else(bad)?;
        if kind.is_empty() {
            return Err(bad());
        }
        let (major, minor) = version.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            kind: kind.to_string(),
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }

    pub fn compatible_with(&self, supported_major: u32) -> bool {
        self.major == supported_major
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}.{}", self.kind, self.major, self.minor)
    }
}

/// The message envelope shared by every topic kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema: String,
    #[serde(with = "ts_ms")]
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(schema: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            schema: schema.into(),
            ts: Utc::now(),
            trace: None,
            payload,
        }
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        if !trace.is_empty() {
            self.trace = Some(trace);
        }
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::BadEnvelope(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DomainError::BadEnvelope(e.to_string()))
    }

    pub fn schema_version(&self) -> Result<SchemaVersion> {
        SchemaVersion::parse(&self.schema)
    }

    /// Decode the payload into a typed struct, ignoring unknown keys
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DomainError::BadEnvelope(format!("payload: {e}")))
    }
}

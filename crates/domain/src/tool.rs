//! Tool taxonomy and the unified result envelope

use serde::{Deserialize, Serialize};

/// Read = pure query, Test = active probe, Act = state mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCategory {
    Read,
    Test,
    Act,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Warn,
    Error,
}

/// Static description of a tool, served by `tool_schema`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub category: ToolCategory,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub risk: ToolRisk,
    pub requires_dry_run: bool,
    pub approval_required: bool,
}

/// Failure detail inside a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub msg: String,
    /// Dotted path of the offending input field, for validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Unified envelope every tool returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub metrics: serde_json::Value,
    pub evidence: Vec<serde_json::Value>,
    pub advice: Vec<String>,
    /// In [0, 1]
    pub confidence: f64,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ToolError>,
}

impl ToolResult {
    pub fn ok(trace_id: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Ok,
            metrics: serde_json::json!({}),
            evidence: Vec::new(),
            advice: Vec::new(),
            confidence: 1.0,
            trace_id: trace_id.into(),
            err: None,
        }
    }

    pub fn error(trace_id: impl Into<String>, err: ToolError) -> Self {
        Self {
            status: ToolStatus::Error,
            metrics: serde_json::json!({}),
            evidence: Vec::new(),
            advice: Vec::new(),
            confidence: 0.0,
            trace_id: trace_id.into(),
            err: Some(err),
        }
    }

    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_advice(mut self, advice: impl Into<String>) -> Self {
        self.advice.push(advice.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_builders() {
        let r = ToolResult::ok("t-1")
            .with_metrics(json!({"loss_pct": 0.0}))
            .with_evidence(json!({"raw": "64 bytes from 8.8.8.8"}))
            .with_advice("link looks healthy")
            .with_confidence(0.9);
        assert!(r.is_ok());
        assert_eq!(r.metrics["loss_pct"], 0.0);
        assert_eq!(r.evidence.len(), 1);
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn test_confidence_clamped() {
        let r = ToolResult::ok("t-1").with_confidence(3.0);
        assert_eq!(r.confidence, 1.0);
        let r = ToolResult::ok("t-1").with_confidence(-1.0);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_error_result_carries_field_path() {
        let r = ToolResult::error(
            "t-2",
            ToolError {
                code: "E_INVALID_ARGS".into(),
                msg: "missing".into(),
                field: Some("args.channel".into()),
            },
        );
        assert_eq!(r.status, ToolStatus::Error);
        assert_eq!(r.err.unwrap().field.as_deref(), Some("args.channel"));
    }
}

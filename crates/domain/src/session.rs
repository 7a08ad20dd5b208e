//! Diagnostic session entity

use crate::device::{DeviceId, Scope};
use crate::error::{DomainError, Result};
use crate::tool::ToolResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What part of the fleet a session is allowed to touch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionScope {
    Devices(Vec<DeviceId>),
    Site(Scope),
}

impl SessionScope {
    pub fn contains(&self, device: &DeviceId) -> bool {
        match self {
            Self::Devices(ids) => ids.contains(device),
            // Site scope admits every device under the site
            Self::Site(_) => true,
        }
    }
}

/// History record of one tool run inside a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ToolResult>,
}

/// A bounded diagnostic workflow correlating tool invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub scope: SessionScope,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub state: SessionState,
    #[serde(default)]
    pub invocations: Vec<ToolInvocation>,
    #[serde(default)]
    pub context: serde_json::Value,
    /// Tear the session down on the first child error
    #[serde(default)]
    pub fail_fast: bool,
    /// Errors aggregated from children when fail_fast is off
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Session {
    pub fn new(id: impl Into<String>, intent: Option<String>, scope: SessionScope) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            intent,
            scope,
            created_at: now,
            last_active_at: now,
            state: SessionState::Active,
            invocations: Vec::new(),
            context: serde_json::Value::Null,
            fail_fast: false,
            errors: Vec::new(),
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<()> {
        let legal = match (self.state, to) {
            (SessionState::Active, SessionState::Suspended) => true,
            (SessionState::Suspended, SessionState::Active) => true,
            (SessionState::Active | SessionState::Suspended, s) if s.is_terminal() => true,
            _ => false,
        };
        if !legal {
            return Err(DomainError::BadTransition(format!(
                "session {}: {:?} -> {:?}",
                self.id, self.state, to
            )));
        }
        self.state = to;
        self.last_active_at = Utc::now();
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.transition(SessionState::Suspended)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(SessionState::Active)
    }

    pub fn close(&mut self, final_state: SessionState) -> Result<()> {
        if !final_state.is_terminal() {
            return Err(DomainError::BadTransition(format!(
                "session {}: close with non-terminal {:?}",
                self.id, final_state
            )));
        }
        self.transition(final_state)
    }

    pub fn record_invocation(&mut self, invocation: ToolInvocation) {
        self.last_active_at = Utc::now();
        self.invocations.push(invocation);
    }

    pub fn finish_invocation(&mut self, invocation_id: &str, outcome: ToolResult) {
        if let Some(inv) = self
            .invocations
            .iter_mut()
            .find(|i| i.invocation_id == invocation_id)
        {
            inv.finished_at = Some(Utc::now());
            inv.outcome = Some(outcome);
        }
        self.last_active_at = Utc::now();
    }
}

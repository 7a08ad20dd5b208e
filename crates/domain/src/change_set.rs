//! Change-set entity: a transactional bundle of Act operations
//!
//! Lifecycle: `draft → previewed → applied → rolled_back`, with `partial` as
//! the operator-attention state when a rollback itself fails. A change-set is
//! never applied without a successful preview for the same id, and actions
//! are immutable after creation.

use crate::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetState {
    Draft,
    Previewed,
    Applied,
    RolledBack,
    Partial,
}

/// One Act operation inside a change-set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAction {
    /// Tool name, e.g. `wifi.set_channel`
    pub tool: String,
    pub args: serde_json::Value,
}

/// Inverse operation recorded before apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub tool: String,
    pub args: serde_json::Value,
}

/// Outcome of one dry-run during preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunResult {
    pub ok: bool,
    /// Predicted impact reported by the device/tool
    #[serde(default)]
    pub predicted: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Rollback descriptor the action would need; apply refuses without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub actions: Vec<ChangeAction>,
    #[serde(default)]
    pub dry_run_results: Vec<DryRunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rollback_plan: Vec<RollbackStep>,
    pub state: ChangeSetState,
    pub created_at: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(
        id: impl Into<String>,
        session_id: Option<String>,
        actions: Vec<ChangeAction>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id,
            actions,
            dry_run_results: Vec::new(),
            applied_at: None,
            rollback_plan: Vec::new(),
            state: ChangeSetState::Draft,
            created_at: Utc::now(),
        }
    }

    /// Record a completed preview. All-ok moves `draft → previewed`; any
    /// failure keeps `draft` and clears any earlier preview's rollback plan.
    pub fn record_preview(&mut self, results: Vec<DryRunResult>) -> Result<()> {
        if self.state != ChangeSetState::Draft && self.state != ChangeSetState::Previewed {
            return Err(DomainError::BadTransition(format!(
                "change-set {}: preview in {:?}",
                self.id, self.state
            )));
        }
        let all_ok = results.iter().all(|r| r.ok);
        self.rollback_plan = if all_ok {
            results.iter().filter_map(|r| r.rollback.clone()).collect()
        } else {
            Vec::new()
        };
        self.dry_run_results = results;
        self.state = if all_ok {
            ChangeSetState::Previewed
        } else {
            ChangeSetState::Draft
        };
        Ok(())
    }

    /// Every action must have produced a rollback descriptor during preview
    pub fn fully_reversible(&self) -> bool {
        self.state == ChangeSetState::Previewed && self.rollback_plan.len() == self.actions.len()
    }

    pub fn mark_applied(&mut self) -> Result<()> {
        if self.state != ChangeSetState::Previewed {
            return Err(DomainError::BadTransition(format!(
                "change-set {}: apply in {:?}",
                self.id, self.state
            )));
        }
        self.state = ChangeSetState::Applied;
        self.applied_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_rolled_back(&mut self) -> Result<()> {
        match self.state {
            ChangeSetState::Applied | ChangeSetState::Partial | ChangeSetState::Previewed => {
                self.state = ChangeSetState::RolledBack;
                Ok(())
            }
            _ => Err(DomainError::BadTransition(format!(
                "change-set {}: rollback in {:?}",
                self.id, self.state
            ))),
        }
    }

    pub fn mark_partial(&mut self) {
        self.state = ChangeSetState::Partial;
    }

    /// `rollback()` is legal only from applied or partial
    pub fn can_rollback(&self) -> bool {
        matches!(
            self.state,
            ChangeSetState::Applied | ChangeSetState::Partial
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action() -> ChangeAction {
        ChangeAction {
            tool: "wifi.set_channel".into(),
            args: json!({"device": "aabbccddeeff", "channel": 36}),
        }
    }

    fn ok_dry_run() -> DryRunResult {
        DryRunResult {
            ok: true,
            predicted: json!({"channel": 36}),
            reason: None,
            rollback: Some(RollbackStep {
                tool: "wifi.set_channel".into(),
                args: json!({"device": "aabbccddeeff", "channel": 1}),
            }),
        }
    }

    #[test]
    fn test_preview_success_path() {
        let mut cs = ChangeSet::new("cs-1", None, vec![action()]);
        cs.record_preview(vec![ok_dry_run()]).unwrap();
        assert_eq!(cs.state, ChangeSetState::Previewed);
        assert!(cs.fully_reversible());
    }

    #[test]
    fn test_preview_failure_stays_draft() {
        let mut cs = ChangeSet::new("cs-1", None, vec![action()]);
        cs.record_preview(vec![DryRunResult {
            ok: false,
            predicted: serde_json::Value::Null,
            reason: Some("dfs_required".into()),
            rollback: None,
        }])
        .unwrap();
        assert_eq!(cs.state, ChangeSetState::Draft);
        assert!(!cs.fully_reversible());
        assert_eq!(cs.dry_run_results[0].reason.as_deref(), Some("dfs_required"));
    }

    #[test]
    fn test_apply_requires_preview() {
        let mut cs = ChangeSet::new("cs-1", None, vec![action()]);
        assert!(cs.mark_applied().is_err());
        cs.record_preview(vec![ok_dry_run()]).unwrap();
        cs.mark_applied().unwrap();
        assert_eq!(cs.state, ChangeSetState::Applied);
        assert!(cs.applied_at.is_some());
    }

    #[test]
    fn test_rollback_legal_states() {
        let mut cs = ChangeSet::new("cs-1", None, vec![action()]);
        assert!(!cs.can_rollback());
        cs.record_preview(vec![ok_dry_run()]).unwrap();
        cs.mark_applied().unwrap();
        assert!(cs.can_rollback());
        cs.mark_rolled_back().unwrap();
        assert_eq!(cs.state, ChangeSetState::RolledBack);
        assert!(!cs.can_rollback());
    }

    #[test]
    fn test_partial_requires_operator() {
        let mut cs = ChangeSet::new("cs-1", None, vec![action()]);
        cs.record_preview(vec![ok_dry_run()]).unwrap();
        cs.mark_applied().unwrap();
        cs.mark_partial();
        assert_eq!(cs.state, ChangeSetState::Partial);
        // Partial can still be rolled back manually
        assert!(cs.can_rollback());
    }

    #[test]
    fn test_missing_rollback_descriptor_blocks_reversibility() {
        let mut cs = ChangeSet::new("cs-1", None, vec![action()]);
        cs.record_preview(vec![DryRunResult {
            ok: true,
            predicted: serde_json::Value::Null,
            reason: None,
            rollback: None,
        }])
        .unwrap();
        assert_eq!(cs.state, ChangeSetState::Previewed);
        assert!(!cs.fully_reversible());
    }
}

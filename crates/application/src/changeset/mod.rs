//! Change-set manager
//!
//! Act operations only reach devices through here: record intent, dry-run
//! everything, then apply sequentially with reverse-order rollback on the
//! first failure. `partial` means a rollback itself failed and an operator
//! has to look.

use crate::tools::{InvokeOptions, ToolExecutor};
use dashmap::DashMap;
use domain::change_set::{ChangeAction, ChangeSet, ChangeSetState, DryRunResult, RollbackStep};
use domain::event::{DeviceEvent, EventSink};
use domain::tool::ToolCategory;
use infrastructure::store::{keys, kv::KvStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ChangeSetError {
    #[error("Change-set not found: {0}")]
    NotFound(String),

    #[error("Unknown tool in actions: {0}")]
    UnknownTool(String),

    #[error("Tool {0} is not an Act tool")]
    NotAnAct(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Approval token required")]
    ApprovalRequired,

    #[error("Change-set {0} has a transition in progress")]
    Busy(String),

    #[error("Rollback not allowed from state {0:?}")]
    RollbackIllegal(ChangeSetState),
}

pub struct ChangeSetManager {
    sets: DashMap<String, Arc<Mutex<ChangeSet>>>,
    executor: Arc<ToolExecutor>,
    store: Arc<dyn KvStore>,
    events: Arc<dyn EventSink>,
}

impl ChangeSetManager {
    pub fn new(
        executor: Arc<ToolExecutor>,
        store: Arc<dyn KvStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            sets: DashMap::new(),
            executor,
            store,
            events,
        }
    }

    async fn persist(&self, change_set: &ChangeSet) {
        if let Err(e) = infrastructure::store::kv::put_json(
            self.store.as_ref(),
            &keys::change_set(&change_set.id),
            change_set,
        )
        .await
        {
            warn!(change_set_id = %change_set.id, error = %e, "Failed to persist change-set");
        }
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<ChangeSet>>, ChangeSetError> {
        self.sets
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ChangeSetError::NotFound(id.to_string()))
    }

    /// Record intent; actions are immutable afterwards
    pub async fn create(
        &self,
        session_id: Option<String>,
        actions: Vec<ChangeAction>,
    ) -> Result<String, ChangeSetError> {
        if actions.is_empty() {
            return Err(ChangeSetError::PreconditionFailed(
                "change-set needs at least one action".to_string(),
            ));
        }
        for action in &actions {
            let spec = self
                .executor
                .registry()
                .get(&action.tool)
                .map(|t| t.spec().clone())
                .ok_or_else(|| ChangeSetError::UnknownTool(action.tool.clone()))?;
            if spec.category != ToolCategory::Act {
                return Err(ChangeSetError::NotAnAct(action.tool.clone()));
            }
        }

        let id = Uuid::new_v4().to_string();
        let change_set = ChangeSet::new(&id, session_id, actions);
        self.persist(&change_set).await;
        self.sets.insert(id.clone(), Arc::new(Mutex::new(change_set)));
        info!(change_set_id = %id, "Change-set created");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<ChangeSet, ChangeSetError> {
        let entry = self.entry(id)?;
        let guard = entry.lock().await;
        Ok(guard.clone())
    }

    /// Dry-run every action; all must return ok for `previewed`
    ///
    /// Preview is pure: with no intervening state change, running it twice
    /// yields the same predicted impact.
    pub async fn preview(&self, id: &str) -> Result<Vec<DryRunResult>, ChangeSetError> {
        let entry = self.entry(id)?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| ChangeSetError::Busy(id.to_string()))?;

        if guard.state != ChangeSetState::Draft && guard.state != ChangeSetState::Previewed {
            return Err(ChangeSetError::PreconditionFailed(format!(
                "preview in state {:?}",
                guard.state
            )));
        }

        let mut results = Vec::with_capacity(guard.actions.len());
        for action in guard.actions.clone() {
            let output = self
                .executor
                .invoke(
                    &action.tool,
                    &action.args,
                    InvokeOptions {
                        session_id: guard.session_id.clone(),
                        dry_run: true,
                        change_set_id: Some(id.to_string()),
                        cancel: CancellationToken::new(),
                        trace_id: None,
                    },
                )
                .await;

            results.push(DryRunResult {
                ok: output.result.is_ok(),
                predicted: output.result.metrics.clone(),
                reason: output.result.err.as_ref().map(|e| e.msg.clone()),
                rollback: output.rollback,
            });
        }

        guard
            .record_preview(results.clone())
            .map_err(|e| ChangeSetError::PreconditionFailed(e.to_string()))?;
        self.persist(&guard).await;
        info!(change_set_id = %id, state = ?guard.state, "Change-set previewed");
        Ok(results)
    }

    /// Execute the previewed actions sequentially; never parallel within a
    /// change-set. First error rolls already-applied actions back in reverse.
    pub async fn apply(
        &self,
        id: &str,
        approval_token: Option<String>,
    ) -> Result<ChangeSetState, ChangeSetError> {
        let entry = self.entry(id)?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| ChangeSetError::Busy(id.to_string()))?;

        if guard.state != ChangeSetState::Previewed {
            return Err(ChangeSetError::PreconditionFailed(format!(
                "apply requires a successful preview, state is {:?}",
                guard.state
            )));
        }
        if !guard.fully_reversible() {
            return Err(ChangeSetError::PreconditionFailed(
                "an action is missing its rollback descriptor".to_string(),
            ));
        }

        let needs_approval = guard.actions.iter().any(|action| {
            self.executor
                .registry()
                .get(&action.tool)
                .map(|t| t.spec().approval_required)
                .unwrap_or(false)
        });
        if needs_approval && approval_token.is_none() {
            return Err(ChangeSetError::ApprovalRequired);
        }

        let mut applied: Vec<RollbackStep> = Vec::new();
        let mut failure: Option<String> = None;

        for (index, action) in guard.actions.clone().into_iter().enumerate() {
            let output = self
                .executor
                .invoke(
                    &action.tool,
                    &action.args,
                    InvokeOptions {
                        session_id: guard.session_id.clone(),
                        dry_run: false,
                        change_set_id: Some(id.to_string()),
                        cancel: CancellationToken::new(),
                        trace_id: None,
                    },
                )
                .await;

            if output.result.is_ok() {
                applied.push(guard.rollback_plan[index].clone());
            } else {
                let msg = output
                    .result
                    .err
                    .map(|e| e.msg)
                    .unwrap_or_else(|| "action failed".to_string());
                warn!(change_set_id = %id, action = %action.tool, error = %msg, "Apply failed");
                failure = Some(msg);
                break;
            }
        }

        let state = match failure {
            None => {
                guard
                    .mark_applied()
                    .map_err(|e| ChangeSetError::PreconditionFailed(e.to_string()))?;
                ChangeSetState::Applied
            }
            Some(_) => {
                // Best-effort recovery of the actions that did land
                if self.run_rollback_steps(id, &applied, &guard).await {
                    let _ = guard.mark_rolled_back();
                    ChangeSetState::RolledBack
                } else {
                    guard.mark_partial();
                    self.events
                        .emit(DeviceEvent::change_set_partial(id))
                        .await;
                    ChangeSetState::Partial
                }
            }
        };

        self.persist(&guard).await;
        info!(change_set_id = %id, state = ?state, "Change-set apply finished");
        Ok(state)
    }

    /// Apply the stored rollback descriptors; legal from applied or partial
    pub async fn rollback(&self, id: &str) -> Result<ChangeSetState, ChangeSetError> {
        let entry = self.entry(id)?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| ChangeSetError::Busy(id.to_string()))?;

        if !guard.can_rollback() {
            return Err(ChangeSetError::RollbackIllegal(guard.state));
        }

        let steps = guard.rollback_plan.clone();
        let state = if self.run_rollback_steps(id, &steps, &guard).await {
            let _ = guard.mark_rolled_back();
            ChangeSetState::RolledBack
        } else {
            guard.mark_partial();
            self.events.emit(DeviceEvent::change_set_partial(id)).await;
            ChangeSetState::Partial
        };

        self.persist(&guard).await;
        info!(change_set_id = %id, state = ?state, "Change-set rollback finished");
        Ok(state)
    }

    /// Reverse-order execution of rollback steps; true when all succeeded
    async fn run_rollback_steps(
        &self,
        id: &str,
        steps: &[RollbackStep],
        change_set: &ChangeSet,
    ) -> bool {
        let mut clean = true;
        for step in steps.iter().rev() {
            let output = self
                .executor
                .invoke(
                    &step.tool,
                    &step.args,
                    InvokeOptions {
                        session_id: change_set.session_id.clone(),
                        dry_run: false,
                        change_set_id: Some(id.to_string()),
                        cancel: CancellationToken::new(),
                        trace_id: None,
                    },
                )
                .await;
            if !output.result.is_ok() {
                error!(change_set_id = %id, tool = %step.tool, "Rollback step failed");
                clean = false;
            }
        }
        clean
    }
}

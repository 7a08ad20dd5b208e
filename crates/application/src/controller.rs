//! Programmatic RPC surface
//!
//! The one facade external callers (HTTP layer, orchestrators) talk to.
//! Cross-component references stay opaque ids; every lookup goes through the
//! owning component.

use crate::changeset::{ChangeSetError, ChangeSetManager};
use crate::events::EventHub;
use crate::registry::{DeviceFilter, DeviceRecord, DeviceRegistry};
use crate::rpc::RpcEngine;
use crate::session::{SessionError, SessionManager, SessionRequest};
use crate::telemetry::TelemetrySink;
use crate::tools::{InvokeOptions, ToolExecutor};
use crate::topology::TopologyStore;
use chrono::{DateTime, Utc};
use domain::change_set::{ChangeAction, ChangeSet, ChangeSetState, DryRunResult};
use domain::device::{DeviceId, Scope};
use domain::error::DomainError;
use domain::session::{Session, SessionState};
use domain::tool::{ToolResult, ToolSpec};
use domain::topology::{RoamingEvent, TopologyGraph};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    ChangeSet(#[from] ChangeSetError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Per-invocation options on the tool surface
#[derive(Debug, Clone, Default)]
pub struct InvokeToolOptions {
    pub dry_run: bool,
    pub change_set_id: Option<String>,
}

pub struct Controller {
    registry: Arc<DeviceRegistry>,
    topology: Arc<TopologyStore>,
    telemetry: Arc<TelemetrySink>,
    rpc: Arc<RpcEngine>,
    executor: Arc<ToolExecutor>,
    sessions: Arc<SessionManager>,
    change_sets: Arc<ChangeSetManager>,
    hub: Arc<EventHub>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        topology: Arc<TopologyStore>,
        telemetry: Arc<TelemetrySink>,
        rpc: Arc<RpcEngine>,
        executor: Arc<ToolExecutor>,
        sessions: Arc<SessionManager>,
        change_sets: Arc<ChangeSetManager>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            registry,
            topology,
            telemetry,
            rpc,
            executor,
            sessions,
            change_sets,
            hub,
        }
    }

    // ---- Toolbox ----

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.executor.registry().list()
    }

    pub fn tool_schema(&self, name: &str) -> Option<ToolSpec> {
        self.executor.registry().get(name).map(|t| t.spec().clone())
    }

    /// Run a tool inside a session; the invocation is recorded either way
    pub async fn invoke_tool(
        &self,
        session_id: &str,
        name: &str,
        args: serde_json::Value,
        opts: InvokeToolOptions,
    ) -> Result<ToolResult, ControllerError> {
        let (invocation_id, cancel) = self
            .sessions
            .begin_invocation(session_id, name, &args)
            .await?;

        let output = self
            .executor
            .invoke(
                name,
                &args,
                InvokeOptions {
                    session_id: Some(session_id.to_string()),
                    dry_run: opts.dry_run,
                    change_set_id: opts.change_set_id,
                    cancel,
                    trace_id: None,
                },
            )
            .await;

        self.sessions
            .finish_invocation(session_id, &invocation_id, output.result.clone())
            .await?;
        Ok(output.result)
    }

    // ---- Sessions ----

    pub async fn create_session(&self, req: SessionRequest) -> Result<Session, ControllerError> {
        Ok(self.sessions.create(req).await?)
    }

    pub fn get_session(&self, id: &str) -> Result<Session, ControllerError> {
        Ok(self.sessions.get(id)?)
    }

    pub async fn suspend_session(&self, id: &str) -> Result<(), ControllerError> {
        Ok(self.sessions.suspend(id).await?)
    }

    pub async fn resume_session(&self, id: &str) -> Result<(), ControllerError> {
        Ok(self.sessions.resume(id).await?)
    }

    /// Close a session: children are cancelled and change-sets the session
    /// applied are rolled back automatically
    pub async fn close_session(
        &self,
        id: &str,
        final_state: SessionState,
    ) -> Result<Session, ControllerError> {
        let owned = self.sessions.close(id, final_state).await?;
        for change_set_id in owned {
            match self.change_sets.get(&change_set_id).await {
                Ok(cs) if cs.state == ChangeSetState::Applied => {
                    if let Err(e) = self.change_sets.rollback(&change_set_id).await {
                        warn!(change_set_id = %change_set_id, error = %e, "Auto-rollback on close failed");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(change_set_id = %change_set_id, error = %e, "Owned change-set lookup failed");
                }
            }
        }
        self.executor.release_session(id);
        Ok(self.sessions.get(id)?)
    }

    // ---- Change-sets ----

    pub async fn create_change_set(
        &self,
        session_id: Option<String>,
        actions: Vec<ChangeAction>,
    ) -> Result<String, ControllerError> {
        let id = self
            .change_sets
            .create(session_id.clone(), actions)
            .await?;
        if let Some(session_id) = session_id {
            self.sessions.attach_change_set(&session_id, &id)?;
        }
        Ok(id)
    }

    pub async fn get_change_set(&self, id: &str) -> Result<ChangeSet, ControllerError> {
        Ok(self.change_sets.get(id).await?)
    }

    pub async fn preview_change_set(
        &self,
        id: &str,
    ) -> Result<Vec<DryRunResult>, ControllerError> {
        Ok(self.change_sets.preview(id).await?)
    }

    pub async fn apply_change_set(
        &self,
        id: &str,
        approval_token: Option<String>,
    ) -> Result<ChangeSetState, ControllerError> {
        Ok(self.change_sets.apply(id, approval_token).await?)
    }

    pub async fn rollback_change_set(&self, id: &str) -> Result<ChangeSetState, ControllerError> {
        Ok(self.change_sets.rollback(id).await?)
    }

    // ---- Device and topology queries ----

    pub fn get_device_state(&self, id: &str) -> Result<DeviceRecord, ControllerError> {
        let device_id = DeviceId::new(id)?;
        self.registry
            .get(&device_id)
            .ok_or_else(|| ControllerError::DeviceNotFound(id.to_string()))
    }

    pub fn list_devices(&self, filter: &DeviceFilter) -> Vec<(DeviceId, DeviceRecord)> {
        self.registry.list(filter)
    }

    pub fn query_topology(
        &self,
        tenant: &str,
        site: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<TopologyGraph, ControllerError> {
        let scope = Scope::new(tenant, site)?;
        Ok(self.topology.graph_at(&scope, at))
    }

    pub fn query_roaming_history(
        &self,
        client_mac: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<RoamingEvent> {
        self.topology.roaming_history(client_mac, from, to)
    }

    // ---- Accessors for the outer layer ----

    pub fn events(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn telemetry(&self) -> &Arc<TelemetrySink> {
        &self.telemetry
    }

    pub fn rpc(&self) -> &Arc<RpcEngine> {
        &self.rpc
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}

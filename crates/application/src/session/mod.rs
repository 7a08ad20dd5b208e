//! Session manager
//!
//! Sessions bound diagnostic workflows: they carry the cancellation signal
//! for every child tool run, own the change-sets created under them, and
//! keep the invocation history for post-mortems.

use chrono::Utc;
use dashmap::DashMap;
use domain::session::{Session, SessionScope, SessionState, ToolInvocation};
use domain::tool::{ToolResult, ToolStatus};
use infrastructure::store::{keys, kv::KvStore};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} is not active")]
    NotActive(String),

    #[error("Too many active sessions (limit {0})")]
    Limit(usize),

    #[error("Invalid transition: {0}")]
    Transition(String),
}

struct SessionEntry {
    session: Session,
    cancel: CancellationToken,
    change_sets: Vec<String>,
}

/// Parameters for a new session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub intent: Option<String>,
    pub scope: SessionScope,
    pub metadata: serde_json::Value,
    pub fail_fast: bool,
}

pub struct SessionManager {
    sessions: DashMap<String, SessionEntry>,
    store: Arc<dyn KvStore>,
    max_active: usize,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KvStore>, max_active: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            max_active: max_active.max(1),
        }
    }

    async fn persist(&self, session: &Session) {
        if let Err(e) =
            infrastructure::store::kv::put_json(self.store.as_ref(), &keys::session(&session.id), session)
                .await
        {
            warn!(session_id = %session.id, error = %e, "Failed to persist session");
        }
    }

    /// Create a session, evicting the oldest suspended one at the cap
    pub async fn create(&self, req: SessionRequest) -> Result<Session, SessionError> {
        let live = self
            .sessions
            .iter()
            .filter(|e| !e.session.state.is_terminal())
            .count();
        if live >= self.max_active {
            let evicted = self.evict_oldest_suspended();
            if evicted.is_none() {
                return Err(SessionError::Limit(self.max_active));
            }
        }

        let id = Uuid::new_v4().to_string();
        let mut session = Session::new(&id, req.intent, req.scope);
        session.context = req.metadata;
        session.fail_fast = req.fail_fast;

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                session: session.clone(),
                cancel: CancellationToken::new(),
                change_sets: Vec::new(),
            },
        );
        self.persist(&session).await;
        info!(session_id = %id, intent = ?session.intent, "Session created");
        Ok(session)
    }

    fn evict_oldest_suspended(&self) -> Option<String> {
        let oldest = self
            .sessions
            .iter()
            .filter(|e| e.session.state == SessionState::Suspended)
            .min_by_key(|e| e.session.last_active_at)
            .map(|e| e.key().clone())?;

        if let Some(mut entry) = self.sessions.get_mut(&oldest) {
            entry.cancel.cancel();
            let _ = entry.session.close(SessionState::Cancelled);
        }
        info!(session_id = %oldest, "Evicted oldest suspended session");
        Some(oldest)
    }

    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        self.sessions
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self.sessions.iter().map(|e| e.session.clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// The session's cancellation signal, for fan-out into child work
    pub fn cancel_token(&self, id: &str) -> Result<CancellationToken, SessionError> {
        self.sessions
            .get(id)
            .map(|e| e.cancel.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub async fn suspend(&self, id: &str) -> Result<(), SessionError> {
        let session = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            entry
                .session
                .suspend()
                .map_err(|e| SessionError::Transition(e.to_string()))?;
            entry.session.clone()
        };
        self.persist(&session).await;
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<(), SessionError> {
        let session = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            entry
                .session
                .resume()
                .map_err(|e| SessionError::Transition(e.to_string()))?;
            entry.session.clone()
        };
        self.persist(&session).await;
        Ok(())
    }

    /// Close a session: cancel in-flight children and return the change-set
    /// ids it owns so the caller can roll back the applied ones
    pub async fn close(
        &self,
        id: &str,
        final_state: SessionState,
    ) -> Result<Vec<String>, SessionError> {
        let (session, change_sets) = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            entry
                .session
                .close(final_state)
                .map_err(|e| SessionError::Transition(e.to_string()))?;
            entry.cancel.cancel();
            (entry.session.clone(), entry.change_sets.clone())
        };
        self.persist(&session).await;
        info!(session_id = %id, state = ?final_state, "Session closed");
        Ok(change_sets)
    }

    /// Tie a change-set to the session that created it
    pub fn attach_change_set(&self, id: &str, change_set_id: &str) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        entry.change_sets.push(change_set_id.to_string());
        Ok(())
    }

    /// Record the start of a tool run; fails unless the session is active
    pub async fn begin_invocation(
        &self,
        id: &str,
        tool: &str,
        args: &serde_json::Value,
    ) -> Result<(String, CancellationToken), SessionError> {
        let (invocation_id, cancel, session) = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            if entry.session.state != SessionState::Active {
                return Err(SessionError::NotActive(id.to_string()));
            }
            let invocation_id = Uuid::new_v4().to_string();
            entry.session.record_invocation(ToolInvocation {
                invocation_id: invocation_id.clone(),
                tool: tool.to_string(),
                args: args.clone(),
                started_at: Utc::now(),
                finished_at: None,
                outcome: None,
            });
            (
                invocation_id,
                entry.cancel.clone(),
                entry.session.clone(),
            )
        };
        self.persist(&session).await;
        Ok((invocation_id, cancel))
    }

    /// Record a finished tool run. With `fail_fast`, an error result fails
    /// the whole session; otherwise errors aggregate and the session runs on.
    pub async fn finish_invocation(
        &self,
        id: &str,
        invocation_id: &str,
        outcome: ToolResult,
    ) -> Result<(), SessionError> {
        let (session, fail_now) = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

            let failed = outcome.status == ToolStatus::Error;
            if failed {
                let msg = outcome
                    .err
                    .as_ref()
                    .map(|e| e.msg.clone())
                    .unwrap_or_else(|| "tool failed".to_string());
                entry.session.errors.push(msg);
            }
            entry
                .session
                .finish_invocation(invocation_id, outcome);

            let fail_now = failed && entry.session.fail_fast;
            if fail_now {
                let _ = entry.session.close(SessionState::Failed);
                entry.cancel.cancel();
            }
            (entry.session.clone(), fail_now)
        };
        self.persist(&session).await;
        if fail_now {
            info!(session_id = %id, "Session failed fast on child error");
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| !e.session.state.is_terminal())
            .count()
    }
}

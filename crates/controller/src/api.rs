//! HTTP surface over the controller facade
//!
//! Thin JSON mapping of the programmatic RPC surface; no auth provider, the
//! opaque approval token is passed straight through.

use application::changeset::ChangeSetError;
use application::controller::{ControllerError, InvokeToolOptions};
use application::registry::DeviceFilter;
use application::session::{SessionError, SessionRequest};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Json,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use domain::change_set::ChangeAction;
use domain::device::DeviceId;
use domain::session::{SessionScope, SessionState};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::AppState;

use tower_http::cors::{Any, CorsLayer};

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/tools/{name}", get(tool_schema))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/close", post(close_session))
        .route("/api/sessions/{id}/suspend", post(suspend_session))
        .route("/api/sessions/{id}/resume", post(resume_session))
        .route("/api/sessions/{id}/tools/{name}", post(invoke_tool))
        .route("/api/change-sets", post(create_change_set))
        .route("/api/change-sets/{id}", get(get_change_set))
        .route("/api/change-sets/{id}/preview", post(preview_change_set))
        .route("/api/change-sets/{id}/apply", post(apply_change_set))
        .route("/api/change-sets/{id}/rollback", post(rollback_change_set))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/topology", get(query_topology))
        .route("/api/roaming/{mac}", get(query_roaming))
        .route("/api/events", get(sse_events))
        .layer(cors)
        .with_state(state)
}

fn error_response(e: ControllerError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        ControllerError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        ControllerError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
        ControllerError::ChangeSet(ChangeSetError::NotFound(_)) => StatusCode::NOT_FOUND,
        ControllerError::ChangeSet(ChangeSetError::ApprovalRequired) => StatusCode::FORBIDDEN,
        ControllerError::Session(SessionError::Limit(_) | SessionError::NotActive(_)) => {
            StatusCode::CONFLICT
        }
        ControllerError::ChangeSet(
            ChangeSetError::PreconditionFailed(_)
            | ChangeSetError::Busy(_)
            | ChangeSetError::RollbackIllegal(_),
        ) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.list_tools())
}

async fn tool_schema(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.tool_schema(&name) {
        Some(spec) => Json(json!(spec)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown tool: {name}") })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    intent: Option<String>,
    /// Device macs; omitted means the whole configured site
    #[serde(default)]
    devices: Option<Vec<String>>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    fail_fast: bool,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    let scope = match body.devices {
        Some(raw) => {
            let mut devices = Vec::with_capacity(raw.len());
            for mac in raw {
                match DeviceId::new(&mac) {
                    Ok(id) => devices.push(id),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "error": e.to_string() })),
                        )
                            .into_response();
                    }
                }
            }
            SessionScope::Devices(devices)
        }
        None => match domain::device::Scope::new(&state.config.tenant, &state.config.site) {
            Ok(scope) => SessionScope::Site(scope),
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response();
            }
        },
    };

    match state
        .controller
        .create_session(SessionRequest {
            intent: body.intent,
            scope,
            metadata: body.metadata,
            fail_fast: body.fail_fast,
        })
        .await
    {
        Ok(session) => Json(json!(session)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn get_session(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.get_session(&id) {
        Ok(session) => Json(json!(session)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct CloseSessionBody {
    final_state: SessionState,
}

async fn close_session(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CloseSessionBody>,
) -> impl IntoResponse {
    match state.controller.close_session(&id, body.final_state).await {
        Ok(session) => Json(json!(session)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn suspend_session(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.suspend_session(&id).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn resume_session(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.resume_session(&id).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct InvokeToolBody {
    #[serde(default)]
    args: serde_json::Value,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    change_set_id: Option<String>,
}

async fn invoke_tool(
    Path((id, name)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvokeToolBody>,
) -> impl IntoResponse {
    match state
        .controller
        .invoke_tool(
            &id,
            &name,
            body.args,
            InvokeToolOptions {
                dry_run: body.dry_run,
                change_set_id: body.change_set_id,
            },
        )
        .await
    {
        Ok(result) => Json(json!(result)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct CreateChangeSetBody {
    #[serde(default)]
    session_id: Option<String>,
    actions: Vec<ChangeAction>,
}

async fn create_change_set(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateChangeSetBody>,
) -> impl IntoResponse {
    match state
        .controller
        .create_change_set(body.session_id, body.actions)
        .await
    {
        Ok(id) => Json(json!({ "change_set_id": id })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn get_change_set(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.get_change_set(&id).await {
        Ok(change_set) => Json(json!(change_set)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn preview_change_set(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.preview_change_set(&id).await {
        Ok(results) => Json(json!(results)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize, Default)]
struct ApplyBody {
    #[serde(default)]
    approval_token: Option<String>,
}

async fn apply_change_set(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Option<Json<ApplyBody>>,
) -> impl IntoResponse {
    let token = body.and_then(|Json(b)| b.approval_token);
    match state.controller.apply_change_set(&id, token).await {
        Ok(state) => Json(json!({ "state": state })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn rollback_change_set(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.rollback_change_set(&id).await {
        Ok(state) => Json(json!({ "state": state })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct DeviceFilterQuery {
    #[serde(default)]
    online_only: bool,
    #[serde(default)]
    capability: Option<String>,
}

async fn list_devices(
    Query(query): Query<DeviceFilterQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let devices = state.controller.list_devices(&DeviceFilter {
        online_only: query.online_only,
        capability: query.capability,
    });
    let list: Vec<_> = devices
        .into_iter()
        .map(|(id, record)| {
            json!({
                "device_id": id,
                "online": record.is_online(),
                "state": record.state,
                "attr": record.attr,
                "presence": record.presence,
                "last_seen": record.last_seen,
            })
        })
        .collect();
    Json(list)
}

async fn get_device(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.controller.get_device_state(&id) {
        Ok(record) => Json(json!({
            "device_id": id,
            "online": record.is_online(),
            "state": record.state,
            "attr": record.attr,
            "presence": record.presence,
            "last_seen": record.last_seen,
            "last_topology_ts": record.last_topology_ts,
        }))
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct TopologyQuery {
    #[serde(default)]
    tenant: Option<String>,
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

async fn query_topology(
    Query(query): Query<TopologyQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let tenant = query.tenant.unwrap_or_else(|| state.config.tenant.clone());
    let site = query.site.unwrap_or_else(|| state.config.site.clone());
    match state.controller.query_topology(&tenant, &site, query.at) {
        Ok(graph) => Json(json!(graph)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct RoamingQuery {
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
}

async fn query_roaming(
    Path(mac): Path<String>,
    Query(query): Query<RoamingQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - chrono::Duration::hours(24));
    Json(state.controller.query_roaming_history(&mac, from, to))
}

async fn sse_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.controller.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(Event::default().event("diagnostic").data(data))),
            Err(_) => None,
        },
        // Laggards skip to newest
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

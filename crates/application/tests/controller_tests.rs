mod support;

use application::changeset::ChangeSetManager;
use application::controller::{Controller, InvokeToolOptions};
use application::session::{SessionManager, SessionRequest};
use domain::change_set::{ChangeAction, ChangeSetState};
use domain::session::{SessionScope, SessionState};
use domain::tool::ToolStatus;
use serde_json::json;
use std::sync::{Arc, Mutex};
use support::{FakeDevice, ok_result, stack};

const DEVICE: &str = "aabbccddeeff";

fn controller(s: &support::TestStack) -> Controller {
    let sessions = Arc::new(SessionManager::new(s.store.clone(), 8));
    let change_sets = Arc::new(ChangeSetManager::new(
        s.executor.clone(),
        s.store.clone(),
        s.hub.clone(),
    ));
    Controller::new(
        s.registry.clone(),
        s.topology.clone(),
        s.telemetry.clone(),
        s.engine.clone(),
        s.executor.clone(),
        sessions,
        change_sets,
        s.hub.clone(),
    )
}

fn session_request() -> SessionRequest {
    SessionRequest {
        intent: Some("wifi keeps dropping".into()),
        scope: SessionScope::Devices(vec![]),
        metadata: serde_json::Value::Null,
        fail_fast: false,
    }
}

#[tokio::test]
async fn test_invoke_tool_records_history() {
    let device = FakeDevice::new().on_ok("net.ping", json!({"loss_pct": 0.0, "rtt_avg_ms": 8.0}));
    let s = stack(device);
    let ctrl = controller(&s);

    let session = ctrl.create_session(session_request()).await.unwrap();
    let result = ctrl
        .invoke_tool(
            &session.id,
            "net.ping",
            json!({"device": DEVICE, "target": "8.8.8.8", "count": 3}),
            InvokeToolOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, ToolStatus::Ok);
    assert_eq!(result.metrics["loss_pct"], 0.0);
    assert!(!result.advice.is_empty());

    let state = ctrl.get_session(&session.id).unwrap();
    assert_eq!(state.invocations.len(), 1);
    assert_eq!(state.invocations[0].tool, "net.ping");
    assert!(state.invocations[0].outcome.is_some());
}

#[tokio::test]
async fn test_invalid_args_never_reach_device() {
    let s = stack(FakeDevice::new());
    let ctrl = controller(&s);

    let session = ctrl.create_session(session_request()).await.unwrap();
    let result = ctrl
        .invoke_tool(
            &session.id,
            "net.ping",
            json!({"device": DEVICE}),
            InvokeToolOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, ToolStatus::Error);
    let err = result.err.unwrap();
    assert_eq!(err.code, "E_INVALID_ARGS");
    assert_eq!(err.field.as_deref(), Some("args.target"));
    assert!(s.transport.published_requests().is_empty());
}

#[tokio::test]
async fn test_list_tools_and_schema() {
    let s = stack(FakeDevice::new());
    let ctrl = controller(&s);

    let tools = ctrl.list_tools();
    assert!(tools.len() >= 15);

    let ping = ctrl.tool_schema("net.ping").unwrap();
    assert_eq!(ping.name, "net.ping");
    assert!(ctrl.tool_schema("does.not.exist").is_none());
}

#[tokio::test]
async fn test_close_session_rolls_back_applied_change_sets() {
    let channel = Arc::new(Mutex::new(1i64));
    let read_chan = channel.clone();
    let write_chan = channel.clone();

    let device = FakeDevice::new()
        .on("wifi.get_radios", move |req| {
            ok_result(
                &req.id,
                json!({"channel": *read_chan.lock().unwrap(), "width": "80MHz"}),
            )
        })
        .on("wifi.set_channel", move |req| {
            if req.dry_run != Some(true) {
                *write_chan.lock().unwrap() = req.args["channel"].as_i64().unwrap_or(0);
            }
            ok_result(&req.id, json!({}))
        });

    let s = stack(device);
    let ctrl = controller(&s);

    let session = ctrl.create_session(session_request()).await.unwrap();
    let cs_id = ctrl
        .create_change_set(
            Some(session.id.clone()),
            vec![ChangeAction {
                tool: "wifi.set_channel".into(),
                args: json!({"device": DEVICE, "channel": 36}),
            }],
        )
        .await
        .unwrap();

    ctrl.preview_change_set(&cs_id).await.unwrap();
    let state = ctrl.apply_change_set(&cs_id, None).await.unwrap();
    assert_eq!(state, ChangeSetState::Applied);
    assert_eq!(*channel.lock().unwrap(), 36);

    // Closing the session reverts what it applied
    let closed = ctrl
        .close_session(&session.id, SessionState::Completed)
        .await
        .unwrap();
    assert_eq!(closed.state, SessionState::Completed);
    assert_eq!(*channel.lock().unwrap(), 1);
    assert_eq!(
        ctrl.get_change_set(&cs_id).await.unwrap().state,
        ChangeSetState::RolledBack
    );
}

#[tokio::test]
async fn test_query_surface() {
    let s = stack(FakeDevice::new());
    let ctrl = controller(&s);

    // Unknown device is a clean error, not a panic
    assert!(ctrl.get_device_state(DEVICE).is_err());
    assert!(ctrl.get_device_state("not-a-mac").is_err());

    let graph = ctrl.query_topology("acme", "home-1", None).unwrap();
    assert!(graph.nodes.is_empty());
    assert!(ctrl.query_topology("Bad Tenant", "home-1", None).is_err());

    let roams = ctrl.query_roaming_history(
        "11:22:33:44:55:66",
        chrono::Utc::now() - chrono::Duration::hours(1),
        chrono::Utc::now(),
    );
    assert!(roams.is_empty());
}

use anyhow::Result;
use application::{
    ChangeSetManager, Controller, DeviceRegistry, EventHub, IngestPipeline, RpcEngine,
    SessionManager, TelemetrySink, ToolExecutor, ToolRegistry, TopologyStore,
};
use clap::Parser;
use domain::device::{DeviceId, Presence, REASON_NORMAL_SHUTDOWN, Scope};
use domain::envelope::Envelope;
use domain::topic::{Topic, TopicKind, subscription_patterns};
use infrastructure::mqtt::client::MqttTransport;
use infrastructure::mqtt::ingress::IngressQueue;
use infrastructure::store::sqlite::SqliteKvStore;
use infrastructure::ControllerConfig;
use rumqttc::{LastWill, QoS};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use controller::{api, state::AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory (expects default.toml inside)
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// API Port
    #[arg(long, default_value = "3000")]
    api_port: u16,
}

fn lwt_payload(online: bool, reason: Option<String>) -> Result<Vec<u8>> {
    let presence = if online {
        Presence::online(chrono::Utc::now())
    } else {
        Presence::offline(chrono::Utc::now(), reason)
    };
    Ok(Envelope::new("lwt/1.0", serde_json::to_value(&presence)?).encode()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,controller=debug,application=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    dotenv::dotenv().ok();

    info!("RTK home-network diagnosis controller starting");
    let config = ControllerConfig::load(&args.config_dir)?;
    let scope = Scope::new(&config.tenant, &config.site)?;
    let controller_id = DeviceId::new(&config.mqtt.controller_mac)?;

    // Persistence
    info!(path = %config.storage.path, "Opening key/value store");
    let store = Arc::new(SqliteKvStore::new(&config.storage.path).await?);

    // Event hub and stores
    let hub = Arc::new(EventHub::new(store.clone()));
    let registry = Arc::new(DeviceRegistry::new(store.clone(), hub.clone()));
    let restored = registry.warm_start().await?;
    info!(records = restored, "Device registry restored");

    let topology = Arc::new(TopologyStore::new(store.clone()));
    let snapshots = topology.warm_start().await?;
    info!(snapshots = snapshots, "Topology history restored");

    let telemetry = Arc::new(TelemetrySink::new());

    // Transport
    let lwt_topic = Topic::device(scope.clone(), controller_id.clone(), TopicKind::Lwt).to_string();
    let last_will = LastWill::new(
        &lwt_topic,
        lwt_payload(false, None)?,
        QoS::AtLeastOnce,
        true,
    );
    let announce = (lwt_topic.clone(), lwt_payload(true, None)?);

    let ingress = Arc::new(IngressQueue::new(config.ingress_capacity));
    info!(host = %config.mqtt.host, port = %config.mqtt.port, client_id = %config.mqtt.client_id, "Connecting to MQTT");
    let transport = MqttTransport::connect(
        &config.mqtt.host,
        config.mqtt.port,
        &config.mqtt.client_id,
        config.mqtt.keep_alive_secs,
        Some(last_will),
        Some(announce),
        ingress.clone(),
        hub.clone(),
    )
    .await?;

    let patterns = subscription_patterns(config.mqtt.telemetry);
    transport.subscribe_many(&patterns).await?;
    info!(patterns = patterns.len(), "Subscribed to controller pattern set");

    // RPC engine
    let rpc = Arc::new(RpcEngine::new(
        Arc::new(transport.clone()),
        application::rpc::RpcConfig::from_limits(scope.clone(), &config.rpc),
    ));
    rpc.spawn_reconnect_watch(transport.connection_events());

    // Toolbox
    let tools = Arc::new(ToolRegistry::with_builtins(&config.toolbox.enabled));
    info!(tools = tools.len(), "Toolbox registered");
    let executor = Arc::new(ToolExecutor::new(
        tools,
        rpc.clone(),
        registry.clone(),
        topology.clone(),
        telemetry.clone(),
        config.tools.clone(),
    ));

    // Sessions and change-sets
    let sessions = Arc::new(SessionManager::new(store.clone(), config.sessions.max_active));
    let change_sets = Arc::new(ChangeSetManager::new(
        executor.clone(),
        store.clone(),
        hub.clone(),
    ));

    let controller = Arc::new(Controller::new(
        registry.clone(),
        topology.clone(),
        telemetry.clone(),
        rpc.clone(),
        executor,
        sessions,
        change_sets,
        hub.clone(),
    ));

    // Ingest pipeline
    let shutdown = CancellationToken::new();
    let pipeline = Arc::new(IngestPipeline::new(
        ingress,
        registry,
        topology,
        telemetry,
        rpc,
        hub,
        store,
        config.storage.mqtt_log,
    ));
    let ingest_task = tokio::spawn(pipeline.run(shutdown.clone()));

    // HTTP surface
    let app_state = Arc::new(AppState::new(controller, config));
    let router = api::create_router(app_state);
    let addr = format!("0.0.0.0:{}", args.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Signal listener failed"),
            }
            server_shutdown.cancel();
        })
        .await?;

    // Orderly exit: retained offline LWT with the normal_shutdown reason
    shutdown.cancel();
    if let Err(e) = transport
        .shutdown(
            &lwt_topic,
            &lwt_payload(false, Some(REASON_NORMAL_SHUTDOWN.to_string()))?,
        )
        .await
    {
        warn!(error = %e, "Graceful MQTT shutdown failed");
    }
    let _ = ingest_task.await;
    info!("Controller stopped");
    Ok(())
}

//! Application layer - Use cases and orchestration
//!
//! Everything between the MQTT transport and the programmatic RPC surface:
//! the device registry, topology store with roaming inference, the command
//! correlation engine, the diagnostic toolbox, sessions, and change-sets.

pub mod changeset;
pub mod controller;
pub mod events;
pub mod ingest;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod topology;

pub use changeset::ChangeSetManager;
pub use controller::Controller;
pub use events::EventHub;
pub use ingest::IngestPipeline;
pub use registry::DeviceRegistry;
pub use rpc::RpcEngine;
pub use session::SessionManager;
pub use telemetry::TelemetrySink;
pub use tools::{ToolExecutor, ToolRegistry};
pub use topology::TopologyStore;

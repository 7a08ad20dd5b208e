//! Domain layer - Pure types and codecs with no external dependencies
//!
//! This crate contains:
//! - Value Objects (DeviceId, Scope, Topic, SchemaVersion)
//! - Wire codecs (topic scheme, message envelope, command frames)
//! - Entities (DeviceState, Session, ChangeSet, TopologyNode/Edge)
//! - Diagnostic events and the sink interface
//!
//! Principles:
//! - No dependencies on infrastructure
//! - Protocol rules enforced at domain level
//! - Testable in isolation

pub mod change_set;
pub mod command;
pub mod device;
pub mod envelope;
pub mod error;
pub mod event;
pub mod session;
pub mod telemetry;
pub mod tool;
pub mod topic;
pub mod topology;

// Re-export commonly used types
pub use command::{CommandAck, CommandError, CommandRequest, CommandResult, ErrorCode, Expect};
pub use device::{DeviceAttr, DeviceId, DeviceState, Health, Presence, PresenceStatus, Scope};
pub use envelope::{Envelope, SchemaVersion, Trace};
pub use error::DomainError;
pub use event::{DeviceEvent, EventSink, Severity};
pub use topic::{Address, CmdLeg, Topic, TopicKind, TopologyChannel};

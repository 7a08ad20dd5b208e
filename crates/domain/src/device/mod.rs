mod attr;
mod id;
mod presence;
mod scope;
mod state;

pub use attr::DeviceAttr;
pub use id::DeviceId;
pub use presence::{Presence, PresenceStatus, REASON_NORMAL_SHUTDOWN};
pub use scope::Scope;
pub use state::{DeviceState, DiagnosisInfo, Health, NetInfo};

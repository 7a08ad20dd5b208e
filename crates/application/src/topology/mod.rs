mod roaming;
mod store;

pub use roaming::{ClientAssociation, RoamingTracker};
pub use store::TopologyStore;

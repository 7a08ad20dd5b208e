pub mod client;
pub mod ingress;

// Publish QoS is part of the transport contract; re-exported so callers of
// MqttPublisherClient do not need a direct rumqttc dependency
pub use rumqttc::QoS;

pub use client::{ConnectionEvent, MqttMessage, MqttPublisherClient, MqttTransport};
pub use ingress::{IngressQueue, PushOutcome};

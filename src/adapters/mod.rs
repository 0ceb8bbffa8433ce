// Adapters layer: concrete implementations for external systems (MQTT broker, GPIO, inbound payload shapes).

pub mod gpio;
pub mod inbound;
pub mod mqtt;

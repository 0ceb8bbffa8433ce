pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::mqtt::MqttBus;
pub use config::{BridgeConfig, CliArgs};
pub use core::{
    bridge::Bridge, commands::Modem, dispatcher::Dispatcher, power::PowerToggle,
    serial::SerialLink,
};
pub use utils::error::{BridgeError, Result};

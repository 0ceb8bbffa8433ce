use crate::config::toml_config::BridgeConfig;
use crate::utils::error::{BridgeError, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "gsm-bridge")]
#[command(about = "Bridges MQTT triggers to a serial-attached GSM modem")]
pub struct CliArgs {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override serial.port
    #[arg(long)]
    pub port: Option<String>,

    /// Override mqtt.host
    #[arg(long)]
    pub mqtt_host: Option<String>,

    /// Override mqtt.port
    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// Override phone.number
    #[arg(long)]
    pub phone: Option<String>,

    /// Flat overrides, e.g. --set sensors.door=frontdoor
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Enable verbose output (serial traffic included)
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl CliArgs {
    pub fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_file(path)?,
            None => BridgeConfig::default(),
        };
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut BridgeConfig) -> Result<()> {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(host) = &self.mqtt_host {
            config.mqtt.host = host.clone();
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(phone) = &self.phone {
            config.phone.number = phone.clone();
        }

        for entry in &self.overrides {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| BridgeError::ConfigError {
                    field: entry.clone(),
                    message: "override must look like KEY=VALUE".to_string(),
                })?;
            config.apply_override(key.trim(), value)?;
            tracing::info!("🔧 {} overridden from command line", key.trim());
        }

        Ok(())
    }
}

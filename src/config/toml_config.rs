use crate::utils::error::{BridgeError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub topics: TopicsConfig,
    pub gpio: GpioConfig,
    pub phone: PhoneConfig,
    pub sensors: SensorsConfig,
    pub balance: BalanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: Option<String>,
    pub retry_interval_seconds: u64,
    pub keep_alive_seconds: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            host: "localhost".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: None,
            retry_interval_seconds: 10,
            keep_alive_seconds: 30,
        }
    }
}

impl MqttConfig {
    pub fn broker_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopicsConfig {
    pub subscribe: String,
    pub publish: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            subscribe: "domoticz/out".to_string(),
            publish: "domoticz/in".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioConfig {
    /// BCM number of the pin wired to the modem's power key.
    pub power_pin: u8,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self { power_pin: 17 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhoneConfig {
    pub number: String,
}

/// Names of the home-automation devices mapped onto modem actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorsConfig {
    pub power: String,
    pub door: String,
    pub balance: String,
    pub bell: String,
    pub door_message: String,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            power: "sim900".to_string(),
            door: "door".to_string(),
            balance: "balance".to_string(),
            bell: "bell".to_string(),
            door_message: "Door was open!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BalanceConfig {
    pub ussd_code: String,
    pub pattern: String,
    pub idx: u32,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            ussd_code: "*111#".to_string(),
            pattern: crate::core::balance::DEFAULT_BALANCE_PATTERN.to_string(),
            idx: 1,
        }
    }
}

impl BridgeConfig {
    /// Loads a configuration file; missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BridgeError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BridgeError::ConfigError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| BridgeError::ConfigError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Sets one flat `section.key` entry, e.g. `mqtt.port=1884`.
    ///
    /// The raw value is coerced to the type of the current entry; keys that are
    /// currently unset (such as `mqtt.client_id`) are taken as strings.
    pub fn apply_override(&mut self, key: &str, raw: &str) -> Result<()> {
        let override_error = |message: String| BridgeError::ConfigError {
            field: key.to_string(),
            message,
        };

        let mut tree = toml::Value::try_from(&*self)
            .map_err(|e| override_error(format!("cannot serialize configuration: {}", e)))?;

        let (section, entry) = key
            .split_once('.')
            .ok_or_else(|| override_error("expected <section>.<key>".to_string()))?;

        let table = tree
            .get_mut(section)
            .and_then(toml::Value::as_table_mut)
            .ok_or_else(|| override_error(format!("unknown section '{}'", section)))?;

        let value = match table.get(entry) {
            Some(toml::Value::Integer(_)) => raw
                .parse::<i64>()
                .map(toml::Value::Integer)
                .map_err(|_| override_error(format!("'{}' is not an integer", raw)))?,
            Some(toml::Value::Boolean(_)) => raw
                .parse::<bool>()
                .map(toml::Value::Boolean)
                .map_err(|_| override_error(format!("'{}' is not a boolean", raw)))?,
            Some(toml::Value::Float(_)) => raw
                .parse::<f64>()
                .map(toml::Value::Float)
                .map_err(|_| override_error(format!("'{}' is not a number", raw)))?,
            _ => toml::Value::String(raw.to_string()),
        };
        table.insert(entry.to_string(), value);

        *self = tree
            .try_into()
            .map_err(|e| override_error(format!("rejected override: {}", e)))?;
        Ok(())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_path("serial.port", &self.serial.port)?;
        validation::validate_positive_number("serial.baud_rate", self.serial.baud_rate as u64, 1)?;

        validation::validate_non_empty_string("mqtt.host", &self.mqtt.host)?;
        validation::validate_range("mqtt.port", self.mqtt.port, 1, u16::MAX)?;
        validation::validate_broker_url("mqtt.protocol", &self.mqtt.broker_url())?;
        validation::validate_positive_number(
            "mqtt.retry_interval_seconds",
            self.mqtt.retry_interval_seconds,
            1,
        )?;
        validation::validate_range("mqtt.keep_alive_seconds", self.mqtt.keep_alive_seconds, 5, 65_535)?;

        validation::validate_non_empty_string("topics.subscribe", &self.topics.subscribe)?;
        validation::validate_non_empty_string("topics.publish", &self.topics.publish)?;

        validation::validate_range("gpio.power_pin", self.gpio.power_pin, 0, 27)?;

        if !self.phone.number.is_empty() {
            validation::validate_phone_number("phone.number", &self.phone.number)?;
        }

        validation::validate_phone_number("balance.ussd_code", &self.balance.ussd_code)?;
        validation::validate_balance_pattern("balance.pattern", &self.balance.pattern)?;

        Ok(())
    }
}

impl Validate for BridgeConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

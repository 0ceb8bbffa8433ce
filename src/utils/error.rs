use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    SerialError(#[from] tokio_serial::Error),

    #[error("MQTT client error: {0}")]
    MqttError(#[from] rumqttc::ClientError),

    #[error("GPIO error: {message}")]
    GpioError { message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Malformed payload: {message}")]
    PayloadError { message: String },
}

impl BridgeError {
    pub fn gpio(message: impl Into<String>) -> Self {
        BridgeError::GpioError {
            message: message.into(),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        BridgeError::PayloadError {
            message: message.into(),
        }
    }

    /// Errors after which the bridge cannot keep serving triggers.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::SerialError(_)
                | BridgeError::GpioError { .. }
                | BridgeError::ConfigError { .. }
                | BridgeError::InvalidConfigValueError { .. }
                | BridgeError::MissingConfigError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

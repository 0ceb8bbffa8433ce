use crate::config::GpioConfig;
use crate::domain::ports::{PinProvider, PowerPin};
use crate::utils::error::{BridgeError, Result};
use std::sync::Arc;

/// Power-key pin on a Raspberry Pi header, claimed through `/dev/gpiomem`.
#[cfg(feature = "rpi")]
#[derive(Debug, Clone)]
pub struct RaspberryPins {
    bcm_pin: u8,
}

#[cfg(feature = "rpi")]
impl RaspberryPins {
    pub fn new(config: &GpioConfig) -> Self {
        Self {
            bcm_pin: config.power_pin,
        }
    }
}

#[cfg(feature = "rpi")]
impl PinProvider for RaspberryPins {
    fn acquire(&self) -> Result<PowerPin> {
        let gpio = rppal::gpio::Gpio::new()
            .map_err(|e| BridgeError::gpio(format!("cannot open GPIO controller: {}", e)))?;
        let pin = gpio
            .get(self.bcm_pin)
            .map_err(|e| BridgeError::gpio(format!("cannot claim GPIO {}: {}", self.bcm_pin, e)))?;

        // Dropping the pin restores its previous mode and releases it.
        Ok(Box::new(pin.into_output_low()))
    }
}

/// Stand-in for builds without GPIO support; every pulse fails.
#[derive(Debug, Clone, Default)]
pub struct UnavailablePins;

impl PinProvider for UnavailablePins {
    fn acquire(&self) -> Result<PowerPin> {
        Err(BridgeError::gpio(
            "power control unavailable: built without the `rpi` feature",
        ))
    }
}

pub fn power_pins(config: &GpioConfig) -> Arc<dyn PinProvider> {
    #[cfg(feature = "rpi")]
    {
        Arc::new(RaspberryPins::new(config))
    }
    #[cfg(not(feature = "rpi"))]
    {
        tracing::warn!(
            "GPIO {} not driven: built without the `rpi` feature",
            config.power_pin
        );
        Arc::new(UnavailablePins)
    }
}

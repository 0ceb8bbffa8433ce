use crate::domain::ports::PinProvider;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const PULSE_HOLD: Duration = Duration::from_secs(3);

/// Emulates a press of the modem's power key through a GPIO line.
///
/// The pin is claimed for one pulse and released afterwards. There is no
/// feedback; whether the modem changed state can only be learned by probing.
pub struct PowerToggle {
    pins: Arc<dyn PinProvider>,
    hold: Duration,
    busy: Mutex<()>,
}

impl PowerToggle {
    pub fn new(pins: Arc<dyn PinProvider>) -> Self {
        Self {
            pins,
            hold: PULSE_HOLD,
            busy: Mutex::new(()),
        }
    }

    /// LOW, hold, HIGH, hold, LOW. Concurrent callers are queued.
    pub async fn pulse(&self) -> Result<()> {
        let _busy = self.busy.lock().await;
        let mut pin = self.pins.acquire()?;

        tracing::info!("🔌 Pulsing modem power key");
        pin.set_low().unwrap_or_else(|never| match never {});
        tokio::time::sleep(self.hold).await;
        pin.set_high().unwrap_or_else(|never| match never {});
        tokio::time::sleep(self.hold).await;
        pin.set_low().unwrap_or_else(|never| match never {});

        drop(pin);
        tracing::debug!("Power key released");
        Ok(())
    }
}

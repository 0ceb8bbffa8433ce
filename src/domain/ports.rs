use crate::utils::error::Result;
use async_trait::async_trait;
use embedded_hal::digital::OutputPin;
use std::convert::Infallible;

/// Output pin handed out for the duration of one power pulse.
pub type PowerPin = Box<dyn OutputPin<Error = Infallible> + Send>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn subscribe(&self, topic: &str) -> Result<()>;
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// Claims the modem power pin. Dropping the returned pin releases it.
pub trait PinProvider: Send + Sync {
    fn acquire(&self) -> Result<PowerPin>;
}

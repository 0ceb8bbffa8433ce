pub mod balance;
pub mod bridge;
pub mod commands;
pub mod dispatcher;
pub mod power;
pub mod queue;
pub mod serial;

pub use crate::domain::model::{BalanceResult, InboundMessage, Outbound, Trigger};
pub use crate::domain::ports::{MessageBus, PinProvider, PowerPin};
pub use crate::utils::error::Result;

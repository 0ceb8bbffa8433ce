use serde::{Deserialize, Serialize};
use std::fmt;

/// A phone-level action requested from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    PowerOn,
    PowerOff,
    PowerToggle,
    SendSms { number: String, text: String },
    Dial { number: String },
    QueryBalance,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::PowerOn => "power_on",
            Trigger::PowerOff => "power_off",
            Trigger::PowerToggle => "power_toggle",
            Trigger::SendSms { .. } => "send_sms",
            Trigger::Dial { .. } => "dial",
            Trigger::QueryBalance => "query_balance",
        }
    }
}

/// Prepaid balance read back over USSD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceResult {
    Amount(f64),
    Unparseable,
}

impl BalanceResult {
    pub const SENTINEL: f64 = -1.0;

    pub fn value(&self) -> f64 {
        match self {
            BalanceResult::Amount(amount) => *amount,
            BalanceResult::Unparseable => Self::SENTINEL,
        }
    }
}

impl fmt::Display for BalanceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Result the dispatcher hands back for publishing.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Balance(BalanceResult),
}

/// Raw message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Canonical inbound shape: `{"action": "...", "args": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub action: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Domoticz-style device update published with the balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub idx: u32,
    pub nvalue: i64,
    pub svalue: String,
}

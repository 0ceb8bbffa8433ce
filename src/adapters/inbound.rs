//! Decoding of bus messages into [`Trigger`]s.
//!
//! The canonical form is `{"action": "...", "args": {...}}`. Two older
//! shapes are still accepted:
//!
//! - sensor updates `{"name": "...", "nvalue": N, ...}` as published by
//!   Domoticz, where `name` picks the device and `nvalue` the command;
//! - topic routing, where the topic ends in `power`, `sms/send`,
//!   `getbalance` or `call` and the payload is plain text.

use crate::config::BridgeConfig;
use crate::domain::model::{ActionEnvelope, InboundMessage, Trigger};
use crate::utils::error::{BridgeError, Result};
use crate::utils::validation;
use serde_json::Value;

/// SUB submits an SMS body and ESC aborts it; either would end the body
/// early and leave the rest to be read as commands.
const SMS_BODY_FORBIDDEN: [char; 2] = ['\u{1a}', '\u{1b}'];

#[derive(Debug, Clone)]
pub struct InboundRouter {
    default_number: String,
    door_message: String,
    power_sensor: String,
    door_sensor: String,
    balance_sensor: String,
    bell_sensor: String,
}

impl InboundRouter {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            default_number: config.phone.number.clone(),
            door_message: config.sensors.door_message.clone(),
            power_sensor: config.sensors.power.clone(),
            door_sensor: config.sensors.door.clone(),
            balance_sensor: config.sensors.balance.clone(),
            bell_sensor: config.sensors.bell.clone(),
        }
    }

    /// `Ok(None)` means the message is valid but not addressed to the modem.
    pub fn route(&self, message: &InboundMessage) -> Result<Option<Trigger>> {
        let text = std::str::from_utf8(&message.payload)
            .map_err(|e| BridgeError::payload(format!("payload is not UTF-8: {}", e)))?;

        if let Some(trigger) = self.route_topic(&message.topic, text)? {
            return Ok(Some(trigger));
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::payload(format!("payload is not JSON: {}", e)))?;

        if value.get("action").is_some() {
            let envelope: ActionEnvelope = serde_json::from_value(value)?;
            return self.from_envelope(envelope).map(Some);
        }
        if value.get("name").is_some() {
            return self.from_sensor(&value);
        }

        Err(BridgeError::payload(
            "expected an 'action' or a sensor 'name' field",
        ))
    }

    fn route_topic(&self, topic: &str, text: &str) -> Result<Option<Trigger>> {
        let body = text.trim();

        if topic_ends_with(topic, "power") {
            let trigger = match body.to_ascii_lowercase().as_str() {
                "on" => Trigger::PowerOn,
                "off" => Trigger::PowerOff,
                "toggle" => Trigger::PowerToggle,
                other => {
                    return Err(BridgeError::payload(format!(
                        "unknown power command '{}'",
                        other
                    )))
                }
            };
            return Ok(Some(trigger));
        }

        if topic_ends_with(topic, "sms/send") {
            let (number, message) = body
                .split_once(' ')
                .ok_or_else(|| BridgeError::payload("expected '<number> <text>'"))?;
            return Ok(Some(Trigger::SendSms {
                number: routed_number(number)?,
                text: sms_body(message.trim_start())?,
            }));
        }

        if topic_ends_with(topic, "getbalance") {
            return Ok(Some(Trigger::QueryBalance));
        }

        if topic_ends_with(topic, "call") {
            return Ok(Some(Trigger::Dial {
                number: self.number_or_default(Some(body))?,
            }));
        }

        Ok(None)
    }

    fn from_envelope(&self, envelope: ActionEnvelope) -> Result<Trigger> {
        let arg = |key: &str| envelope.args.get(key).and_then(Value::as_str);

        match envelope.action.as_str() {
            "power_on" => Ok(Trigger::PowerOn),
            "power_off" => Ok(Trigger::PowerOff),
            "power_toggle" => Ok(Trigger::PowerToggle),
            "query_balance" => Ok(Trigger::QueryBalance),
            "send_sms" => Ok(Trigger::SendSms {
                number: self.number_or_default(arg("number"))?,
                text: sms_body(arg("text").unwrap_or(&self.door_message))?,
            }),
            "dial" => Ok(Trigger::Dial {
                number: self.number_or_default(arg("number"))?,
            }),
            other => Err(BridgeError::payload(format!("unknown action '{}'", other))),
        }
    }

    fn from_sensor(&self, value: &Value) -> Result<Option<Trigger>> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::payload("sensor 'name' must be a string"))?;
        let nvalue = value
            .get("nvalue")
            .and_then(numeric)
            .ok_or_else(|| BridgeError::payload("sensor 'nvalue' must be numeric"))?;

        if name == self.power_sensor {
            return match nvalue {
                1 => Ok(Some(Trigger::PowerOn)),
                0 => Ok(Some(Trigger::PowerOff)),
                2 => Ok(Some(Trigger::PowerToggle)),
                other => {
                    tracing::warn!("Unknown {} power command: {}", name, other);
                    Ok(None)
                }
            };
        }

        if name == self.door_sensor && nvalue == 0 {
            return Ok(Some(Trigger::SendSms {
                number: self.number_or_default(None)?,
                text: self.door_message.clone(),
            }));
        }

        if name == self.balance_sensor {
            return Ok(Some(Trigger::QueryBalance));
        }

        if name == self.bell_sensor && nvalue == 1 {
            return Ok(Some(Trigger::Dial {
                number: self.number_or_default(None)?,
            }));
        }

        Ok(None)
    }

    fn number_or_default(&self, number: Option<&str>) -> Result<String> {
        let number = number
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.default_number);
        if number.is_empty() {
            return Err(BridgeError::MissingConfigError {
                field: "phone.number".to_string(),
            });
        }
        routed_number(number)
    }
}

/// Numbers end up inside `ATD...;` and `AT+CMGS="..."`, so only dialable
/// characters get through.
fn routed_number(number: &str) -> Result<String> {
    validation::validate_phone_number("number", number)
        .map_err(|_| BridgeError::payload(format!("invalid phone number {:?}", number)))?;
    Ok(number.to_string())
}

fn sms_body(text: &str) -> Result<String> {
    if text.contains(SMS_BODY_FORBIDDEN) {
        return Err(BridgeError::payload(
            "SMS text must not contain CTRL-Z or ESC",
        ));
    }
    Ok(text.to_string())
}

fn topic_ends_with(topic: &str, suffix: &str) -> bool {
    topic == suffix
        || topic
            .strip_suffix(suffix)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Integer part of a JSON number or numeric string, like Domoticz sends.
fn numeric(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> InboundRouter {
        let mut config = BridgeConfig::default();
        config.phone.number = "+380501234567".to_string();
        InboundRouter::new(&config)
    }

    fn route(topic: &str, payload: &str) -> Result<Option<Trigger>> {
        router().route(&InboundMessage::new(topic, payload))
    }

    #[test]
    fn test_canonical_actions() {
        assert_eq!(
            route("gsm/in", r#"{"action":"power_on"}"#).unwrap(),
            Some(Trigger::PowerOn)
        );
        assert_eq!(
            route("gsm/in", r#"{"action":"query_balance","args":{}}"#).unwrap(),
            Some(Trigger::QueryBalance)
        );
        assert_eq!(
            route(
                "gsm/in",
                r#"{"action":"send_sms","args":{"number":"+380671112233","text":"hi"}}"#
            )
            .unwrap(),
            Some(Trigger::SendSms {
                number: "+380671112233".to_string(),
                text: "hi".to_string()
            })
        );
        assert_eq!(
            route("gsm/in", r#"{"action":"dial"}"#).unwrap(),
            Some(Trigger::Dial {
                number: "+380501234567".to_string()
            })
        );
        assert!(route("gsm/in", r#"{"action":"reboot"}"#).is_err());
    }

    #[test]
    fn test_sensor_updates() {
        let cases = [
            (r#"{"name":"sim900","nvalue":1}"#, Some(Trigger::PowerOn)),
            (r#"{"name":"sim900","nvalue":0}"#, Some(Trigger::PowerOff)),
            (r#"{"name":"sim900","nvalue":"2"}"#, Some(Trigger::PowerToggle)),
            (r#"{"name":"sim900","nvalue":7}"#, None),
            (r#"{"name":"balance","nvalue":0,"idx":3}"#, Some(Trigger::QueryBalance)),
            (
                r#"{"name":"door","nvalue":0.0}"#,
                Some(Trigger::SendSms {
                    number: "+380501234567".to_string(),
                    text: "Door was open!".to_string(),
                }),
            ),
            (r#"{"name":"door","nvalue":1}"#, None),
            (
                r#"{"name":"bell","nvalue":1}"#,
                Some(Trigger::Dial {
                    number: "+380501234567".to_string(),
                }),
            ),
            (r#"{"name":"bell","nvalue":0}"#, None),
            (r#"{"name":"kitchen lamp","nvalue":1}"#, None),
        ];

        for (payload, expected) in cases {
            assert_eq!(route("domoticz/out", payload).unwrap(), expected, "{}", payload);
        }
    }

    #[test]
    fn test_topic_suffix_routing() {
        assert_eq!(route("gsm/power", "on").unwrap(), Some(Trigger::PowerOn));
        assert_eq!(route("gsm/power", " OFF\n").unwrap(), Some(Trigger::PowerOff));
        assert_eq!(route("gsm/power", "toggle").unwrap(), Some(Trigger::PowerToggle));
        assert!(route("gsm/power", "reboot").is_err());

        assert_eq!(
            route("gsm/sms/send", "+380671112233 Gate is open").unwrap(),
            Some(Trigger::SendSms {
                number: "+380671112233".to_string(),
                text: "Gate is open".to_string()
            })
        );
        assert!(route("gsm/sms/send", "+380671112233").is_err());

        assert_eq!(route("gsm/getbalance", "").unwrap(), Some(Trigger::QueryBalance));
        assert_eq!(
            route("gsm/call", "0671112233").unwrap(),
            Some(Trigger::Dial {
                number: "0671112233".to_string()
            })
        );
        assert_eq!(
            route("gsm/call", "").unwrap(),
            Some(Trigger::Dial {
                number: "+380501234567".to_string()
            })
        );
    }

    #[test]
    fn test_suffix_must_be_whole_segment() {
        assert!(topic_ends_with("gsm/call", "call"));
        assert!(topic_ends_with("call", "call"));
        assert!(!topic_ends_with("gsm/recall", "call"));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(route("domoticz/out", "not json").is_err());
        assert!(route("domoticz/out", r#"{"idx":3}"#).is_err());
        assert!(route("domoticz/out", r#"{"name":"sim900"}"#).is_err());
        assert!(router()
            .route(&InboundMessage::new("domoticz/out", vec![0xff, 0xfe]))
            .is_err());
    }

    #[test]
    fn test_numbers_with_command_characters_are_rejected() {
        let bad_numbers = ["123\r\nAT+CFUN=0", "123\"", "0501234567;AT", "050-123"];

        for number in bad_numbers {
            let envelope = serde_json::json!({"action": "dial", "args": {"number": number}});
            let sms = serde_json::json!({"action": "send_sms", "args": {"number": number, "text": "hi"}});
            for payload in [envelope.to_string(), sms.to_string()] {
                assert!(
                    matches!(
                        route("gsm/in", &payload),
                        Err(BridgeError::PayloadError { .. })
                    ),
                    "{}",
                    payload
                );
            }

            assert!(matches!(
                route("gsm/call", number),
                Err(BridgeError::PayloadError { .. })
            ));
            assert!(matches!(
                route("gsm/sms/send", &format!("{} hello", number)),
                Err(BridgeError::PayloadError { .. })
            ));
        }
    }

    #[test]
    fn test_configured_number_is_checked_too() {
        let mut config = BridgeConfig::default();
        config.phone.number = "123\"\r\nAT+CFUN=0".to_string();
        let router = InboundRouter::new(&config);

        let message = InboundMessage::new("domoticz/out", r#"{"name":"bell","nvalue":1}"#);
        assert!(matches!(
            router.route(&message),
            Err(BridgeError::PayloadError { .. })
        ));
    }

    #[test]
    fn test_sms_text_cannot_leave_input_mode() {
        let payload = serde_json::json!({
            "action": "send_sms",
            "args": {"number": "+380671112233", "text": "hi\u{1a}AT+CFUN=0\r"}
        });
        assert!(matches!(
            route("gsm/in", &payload.to_string()),
            Err(BridgeError::PayloadError { .. })
        ));
        assert!(route("gsm/sms/send", "+380671112233 hi\u{1b}AT+CFUN=0").is_err());

        assert_eq!(
            route("gsm/sms/send", "+380671112233 line one\nline two").unwrap(),
            Some(Trigger::SendSms {
                number: "+380671112233".to_string(),
                text: "line one\nline two".to_string()
            })
        );
    }

    #[test]
    fn test_missing_phone_number() {
        let router = InboundRouter::new(&BridgeConfig::default());
        let message = InboundMessage::new("domoticz/out", r#"{"name":"bell","nvalue":1}"#);
        assert!(matches!(
            router.route(&message),
            Err(BridgeError::MissingConfigError { .. })
        ));
    }
}

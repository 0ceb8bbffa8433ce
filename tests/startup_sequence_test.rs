mod common;

use common::{echo_ok, fake_modem, modem, reply, Journal, MockBus, RecordingPins};
use gsm_bridge::adapters::gpio::UnavailablePins;
use gsm_bridge::core::bridge::ENSURE_ON_ATTEMPTS;
use gsm_bridge::core::InboundMessage;
use gsm_bridge::{Bridge, BridgeConfig, BridgeError, Dispatcher, Modem, PowerToggle};
use std::sync::Arc;
use tokio::sync::mpsc;

fn responsive_modem(cmd: &str) -> Vec<common::Reply> {
    match cmd {
        "AT" | "AT+CMGF=1" | "AT+CSCS=\"GSM\"" => echo_ok(cmd),
        "ATD*111#" => vec![
            reply("ATD*111#\r\n"),
            reply("OK\r\n"),
            reply("+CUSD: 0,\"Na rahunku 15.75 grn\",15\r\n"),
        ],
        _ => vec![],
    }
}

fn bridge(
    journal: &Journal,
    pins: &RecordingPins,
    responder: fn(&str) -> Vec<common::Reply>,
) -> (Bridge<MockBus>, common::Wire) {
    let config = BridgeConfig::default();
    let (link, wire) = fake_modem(journal.clone(), responder);
    let dispatcher = Dispatcher::new(modem(link, pins), &config.balance).unwrap();
    let bridge = Bridge::new(MockBus::new(journal.clone()), dispatcher, &config);
    (bridge, wire)
}

#[tokio::test(start_paused = true)]
async fn test_startup_order() {
    let journal = Journal::default();
    let pins = RecordingPins::default();
    let (bridge, _wire) = bridge(&journal, &pins, responsive_modem);

    let report = bridge.start().await.unwrap();

    assert!(report.modem_on);
    assert_eq!(report.ensure_on_attempts, 1);
    assert_eq!(pins.pulses(), 0);
    assert_eq!(
        journal.entries(),
        vec![
            "bus connect",
            "bus subscribe domoticz/out",
            "serial AT",
            "serial AT",
            "serial AT+CMGF=1",
            "serial AT+CSCS=\"GSM\"",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_startup_completes_with_silent_modem() {
    let journal = Journal::default();
    let pins = RecordingPins::default();
    let (bridge, wire) = bridge(&journal, &pins, |_| vec![]);

    let report = bridge.start().await.unwrap();

    assert!(!report.modem_on);
    assert_eq!(report.ensure_on_attempts, ENSURE_ON_ATTEMPTS);
    assert_eq!(pins.pulses(), ENSURE_ON_ATTEMPTS as usize);

    let commands = wire.commands();
    assert_eq!(
        &commands[commands.len() - 3..],
        ["AT", "AT+CMGF=1", "AT+CSCS=\"GSM\""]
    );
}

#[tokio::test(start_paused = true)]
async fn test_balance_request_is_published() {
    let journal = Journal::default();
    let pins = RecordingPins::default();
    let (bridge, _wire) = bridge(&journal, &pins, responsive_modem);

    let message = InboundMessage::new("domoticz/out", r#"{"name":"balance","nvalue":0}"#);
    bridge.handle_message(&message).await.unwrap();

    assert_eq!(
        bridge.bus().published(),
        vec![(
            "domoticz/in".to_string(),
            r#"{"idx":1,"nvalue":0,"svalue":"15.75"}"#.to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_is_dropped() {
    let journal = Journal::default();
    let pins = RecordingPins::default();
    let (bridge, wire) = bridge(&journal, &pins, responsive_modem);

    for payload in ["not json", r#"{"action":"reboot"}"#, r#"{"idx":3}"#] {
        let message = InboundMessage::new("domoticz/out", payload);
        bridge.handle_message(&message).await.unwrap();
    }

    assert!(bridge.bus().published().is_empty());
    assert!(wire.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_injected_commands_never_reach_the_modem() {
    let journal = Journal::default();
    let pins = RecordingPins::default();
    let (bridge, wire) = bridge(&journal, &pins, responsive_modem);

    let payloads = [
        r#"{"action":"dial","args":{"number":"123\r\nAT+CFUN=0"}}"#,
        r#"{"action":"send_sms","args":{"number":"123\"\rAT+CFUN=0","text":"hi"}}"#,
    ];
    for payload in payloads {
        let message = InboundMessage::new("domoticz/out", payload);
        bridge.handle_message(&message).await.unwrap();
    }
    bridge
        .handle_message(&InboundMessage::new("gsm/call", "123\r\nAT+CFUN=0"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(wire.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_handles_messages_until_channel_closes() {
    let journal = Journal::default();
    let pins = RecordingPins::default();
    let (bridge, _wire) = bridge(&journal, &pins, responsive_modem);

    let (tx, rx) = mpsc::channel(4);
    tx.send(InboundMessage::new("domoticz/out", "garbage"))
        .await
        .unwrap();
    tx.send(InboundMessage::new(
        "domoticz/out",
        r#"{"action":"query_balance"}"#,
    ))
    .await
    .unwrap();
    drop(tx);

    bridge.run(rx).await.unwrap();

    assert_eq!(bridge.bus().published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_gpio_failure() {
    let journal = Journal::default();
    let config = BridgeConfig::default();
    let (link, _wire) = fake_modem(journal.clone(), |_| vec![]);
    let modem = Arc::new(Modem::new(link, PowerToggle::new(Arc::new(UnavailablePins))));
    let dispatcher = Dispatcher::new(modem, &config.balance).unwrap();
    let bridge = Bridge::new(MockBus::new(journal.clone()), dispatcher, &config);

    let (tx, rx) = mpsc::channel(4);
    tx.send(InboundMessage::new("gsm/power", "toggle"))
        .await
        .unwrap();

    let err = bridge.run(rx).await.unwrap_err();
    assert!(matches!(err, BridgeError::GpioError { .. }));
}

#[test]
fn test_messages_for_other_devices_are_ignored() {
    tokio_test::block_on(async {
        let journal = Journal::default();
        let pins = RecordingPins::default();
        let (bridge, wire) = bridge(&journal, &pins, responsive_modem);

        let message = InboundMessage::new("domoticz/out", r#"{"name":"kitchen lamp","nvalue":1}"#);
        bridge.handle_message(&message).await.unwrap();

        assert!(bridge.bus().published().is_empty());
        assert!(wire.commands().is_empty());
        assert_eq!(pins.pulses(), 0);
    });
}

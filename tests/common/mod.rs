#![allow(dead_code)]

use async_trait::async_trait;
use embedded_hal::digital::{ErrorType, OutputPin};
use gsm_bridge::core::queue::ResponseQueue;
use gsm_bridge::domain::ports::{MessageBus, PinProvider, PowerPin};
use gsm_bridge::{Modem, PowerToggle, Result, SerialLink};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Ordered record of everything the bridge did to the outside world.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// One chunk the fake modem writes back, optionally after a pause.
pub struct Reply {
    pub after: Duration,
    pub text: String,
}

pub fn reply(text: &str) -> Reply {
    reply_after(Duration::ZERO, text)
}

pub fn reply_after(after: Duration, text: &str) -> Reply {
    Reply {
        after,
        text: text.to_string(),
    }
}

/// Echo plus OK, like a modem with echo enabled.
pub fn echo_ok(command: &str) -> Vec<Reply> {
    vec![reply(&format!("{}\r\n", command)), reply("OK\r\n")]
}

/// What the fake modem received from the link.
#[derive(Clone, Default)]
pub struct Wire {
    bytes: Arc<Mutex<Vec<u8>>>,
    commands: Arc<Mutex<Vec<String>>>,
    journal: Journal,
}

impl Wire {
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    /// Lines as the modem saw them; CR, LF and CTRL-Z all end a line.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

/// A serial link whose far end answers through `responder`.
pub fn fake_modem<F>(journal: Journal, responder: F) -> (SerialLink, Wire)
where
    F: Fn(&str) -> Vec<Reply> + Send + 'static,
{
    let (ours, theirs) = tokio::io::duplex(4096);
    let link = SerialLink::from_stream("fake", ours, ResponseQueue::new());
    let wire = Wire {
        journal,
        ..Wire::default()
    };
    tokio::spawn(run_fake_modem(theirs, responder, wire.clone()));
    (link, wire)
}

async fn run_fake_modem<F>(mut port: DuplexStream, responder: F, wire: Wire)
where
    F: Fn(&str) -> Vec<Reply>,
{
    let mut buf = [0u8; 256];
    let mut line = Vec::new();

    loop {
        let n = match port.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        wire.bytes.lock().unwrap().extend_from_slice(&buf[..n]);

        for &byte in &buf[..n] {
            if !matches!(byte, b'\r' | b'\n' | 0x1a) {
                line.push(byte);
                continue;
            }
            if line.is_empty() {
                continue;
            }

            let command = String::from_utf8_lossy(&line).into_owned();
            line.clear();
            wire.commands.lock().unwrap().push(command.clone());
            wire.journal.push(format!("serial {}", command));

            let replies = responder(&command);
            for chunk in replies {
                if !chunk.after.is_zero() {
                    tokio::time::sleep(chunk.after).await;
                }
                if port.write_all(chunk.text.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Power pins that count completed pulses.
#[derive(Clone, Default)]
pub struct RecordingPins {
    pub pulses: Arc<AtomicUsize>,
}

impl RecordingPins {
    pub fn pulses(&self) -> usize {
        self.pulses.load(Ordering::SeqCst)
    }
}

struct RecordingPin {
    pulses: Arc<AtomicUsize>,
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> std::result::Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> std::result::Result<(), Infallible> {
        Ok(())
    }
}

impl Drop for RecordingPin {
    fn drop(&mut self) {
        self.pulses.fetch_add(1, Ordering::SeqCst);
    }
}

impl PinProvider for RecordingPins {
    fn acquire(&self) -> Result<PowerPin> {
        Ok(Box::new(RecordingPin {
            pulses: self.pulses.clone(),
        }))
    }
}

pub fn modem(link: SerialLink, pins: &RecordingPins) -> Arc<Modem> {
    Arc::new(Modem::new(link, PowerToggle::new(Arc::new(pins.clone()))))
}

/// Message bus that only writes to the journal.
#[derive(Clone, Default)]
pub struct MockBus {
    pub journal: Journal,
    pub published: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockBus {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            published: Arc::default(),
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn connect(&self) -> Result<()> {
        self.journal.push("bus connect");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.journal.push(format!("bus subscribe {}", topic));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.journal.push(format!("bus publish {}", topic));
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

//! AT command vocabulary issued over a [`SerialLink`].
//!
//! All modem traffic goes through a [`ModemSession`]. A session holds the
//! modem's lock from creation to drop, so "clear, issue, wait, drain"
//! sequences from different triggers never interleave on the shared queue.

use crate::core::power::PowerToggle;
use crate::core::queue::ResponseQueue;
use crate::core::serial::SerialLink;
use crate::utils::error::Result;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const PROBE_SETTLE: Duration = Duration::from_secs(3);
pub const PROMPT_POLL_ATTEMPTS: u32 = 30;
pub const PROMPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const SETUP_REPLY_WAIT: Duration = Duration::from_secs(5);
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

const PROBE: &str = "AT";
const SMS_TEXT_MODE: &str = "AT+CMGF=1";
const SMS_ENCODING_GSM: &str = "AT+CSCS=\"GSM\"";
const SMS_PROMPT: &str = ">";

/// Commands run during startup with the wait/settle/clear pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupCommand {
    Probe,
    SmsTextMode,
    SmsEncodingGsm,
}

impl SetupCommand {
    pub fn command(&self) -> &'static str {
        match self {
            SetupCommand::Probe => PROBE,
            SetupCommand::SmsTextMode => SMS_TEXT_MODE,
            SetupCommand::SmsEncodingGsm => SMS_ENCODING_GSM,
        }
    }
}

pub struct Modem {
    link: SerialLink,
    power: PowerToggle,
    lock: Mutex<()>,
}

impl Modem {
    pub fn new(link: SerialLink, power: PowerToggle) -> Self {
        Self {
            link,
            power,
            lock: Mutex::new(()),
        }
    }

    /// Waits for exclusive use of the modem.
    pub async fn session(&self) -> ModemSession<'_> {
        let guard = self.lock.lock().await;
        ModemSession {
            link: &self.link,
            power: &self.power,
            _guard: guard,
        }
    }

    pub fn shutdown(&self) {
        self.link.shutdown();
    }
}

pub struct ModemSession<'a> {
    link: &'a SerialLink,
    power: &'a PowerToggle,
    _guard: MutexGuard<'a, ()>,
}

impl ModemSession<'_> {
    fn queue(&self) -> &ResponseQueue {
        self.link.queue()
    }

    pub fn clear(&self) {
        self.queue().clear();
    }

    pub fn pop(&self) -> Option<String> {
        self.queue().pop()
    }

    pub fn drain_all(&self) -> Vec<String> {
        self.queue().drain_all()
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    pub async fn await_count(&self, min_count: usize, max_wait: Duration) -> bool {
        self.queue()
            .await_count(min_count, max_wait, RESPONSE_POLL_INTERVAL)
            .await
    }

    /// CTRL-Z to reset any half-entered input, then the command line.
    async fn issue(&self, command: &str) -> bool {
        let primed = self.link.write_ctrl_z().await;
        let sent = self.link.write(&format!("{}\r\n", command)).await;
        primed && sent
    }

    pub async fn probe(&self) -> bool {
        self.issue(PROBE).await
    }

    pub async fn set_sms_text_mode(&self) -> bool {
        self.issue(SMS_TEXT_MODE).await
    }

    pub async fn set_sms_encoding_gsm(&self) -> bool {
        self.issue(SMS_ENCODING_GSM).await
    }

    pub async fn set_sms_center_number(&self, number: &str) -> bool {
        self.issue(&format!("AT+CSCA=\"{}\"", number)).await
    }

    /// Returns whether the `>` prompt was seen. The body is submitted either
    /// way.
    pub async fn send_sms(&self, number: &str, text: &str) -> bool {
        self.clear();
        self.issue(&format!("AT+CMGS=\"{}\"", number)).await;

        let prompted = self.await_prompt().await;
        if !prompted {
            tracing::warn!("No SMS prompt from modem, sending message body anyway");
        }

        self.link.write(text).await;
        self.link.write_ctrl_z().await;
        self.link.write("\r\n").await;
        prompted
    }

    async fn await_prompt(&self) -> bool {
        let mut remaining = PROMPT_POLL_ATTEMPTS;
        loop {
            if let Some(line) = self.pop() {
                if line.trim() == SMS_PROMPT {
                    return true;
                }
            }
            if remaining == 0 {
                return false;
            }
            remaining -= 1;
            tokio::time::sleep(PROMPT_POLL_INTERVAL).await;
        }
    }

    /// Voice call. The trailing `;` keeps the modem from treating it as a
    /// data call.
    pub async fn dial_voice(&self, number: &str) -> bool {
        let number = number.trim_end_matches(';');
        self.issue(&format!("ATD{};", number)).await
    }

    /// USSD request such as `*111#`.
    pub async fn dial_ussd(&self, code: &str) -> bool {
        self.issue(&format!("ATD{}", code)).await
    }

    pub async fn pulse(&self) -> Result<()> {
        self.power.pulse().await
    }

    /// Probes the modem, toggling power once if it stays silent.
    ///
    /// Only a GPIO failure is an error; an unresponsive modem is `Ok(false)`.
    pub async fn ensure_on(&self) -> Result<bool> {
        self.clear();
        let mut reply = self.probe_reply().await;

        if reply.is_empty() {
            tracing::info!("Modem did not answer probe, toggling power");
            self.pulse().await?;
            self.clear();
            reply = self.probe_reply().await;
        }

        let on = is_probe_ok(&reply);
        tracing::debug!("Probe reply {:?} -> on={}", normalize_reply(&reply), on);
        Ok(on)
    }

    async fn probe_reply(&self) -> Vec<String> {
        self.probe().await;
        tokio::time::sleep(PROBE_SETTLE).await;
        self.drain_all()
    }

    /// Clear, issue, wait up to 5s for two lines, settle, clear.
    ///
    /// Returns whether the two lines arrived; startup proceeds regardless.
    pub async fn run_setup(&self, step: SetupCommand) -> bool {
        self.clear();
        self.issue(step.command()).await;
        let answered = self.await_count(2, SETUP_REPLY_WAIT).await;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.clear();
        if !answered {
            tracing::warn!("No reply to {} within {:?}", step.command(), SETUP_REPLY_WAIT);
        }
        answered
    }
}

/// Joins reply lines with single spaces, collapsing all whitespace.
pub fn normalize_reply(lines: &[String]) -> String {
    lines
        .iter()
        .flat_map(|line| line.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the reply holds the `AT` echo immediately followed by `OK`,
/// whether they arrived as two lines or one merged line.
pub fn is_probe_ok(lines: &[String]) -> bool {
    let normalized = normalize_reply(lines);
    let tokens: Vec<&str> = normalized.split(' ').collect();
    tokens.windows(2).any(|pair| pair == ["AT", "OK"])
}

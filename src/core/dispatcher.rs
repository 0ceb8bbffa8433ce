use crate::config::BalanceConfig;
use crate::core::balance::BalanceParser;
use crate::core::commands::{Modem, ModemSession, SETTLE_DELAY};
use crate::domain::model::{BalanceResult, Outbound, Trigger};
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;

const SMS_REPLY_WAIT: Duration = Duration::from_secs(5);
const USSD_REPLY_WAIT: Duration = Duration::from_secs(5);
const USSD_GAP: Duration = Duration::from_secs(1);

/// Turns triggers into modem command sequences, one session at a time.
pub struct Dispatcher {
    modem: Arc<Modem>,
    balance: BalanceParser,
    ussd_code: String,
}

impl Dispatcher {
    pub fn new(modem: Arc<Modem>, config: &BalanceConfig) -> Result<Self> {
        Ok(Self {
            modem,
            balance: BalanceParser::new(&config.pattern)?,
            ussd_code: config.ussd_code.clone(),
        })
    }

    pub fn modem(&self) -> &Modem {
        &self.modem
    }

    /// Runs the trigger to completion. Only a balance query yields an
    /// outbound message; everything else is best effort.
    pub async fn handle(&self, trigger: Trigger) -> Result<Option<Outbound>> {
        tracing::info!("▶️ Handling {}", trigger.name());
        let session = self.modem.session().await;

        match trigger {
            Trigger::PowerOn => {
                let on = session.ensure_on().await?;
                tracing::info!("Ensure on: {}", on);
                Ok(None)
            }
            Trigger::PowerOff => {
                let on = session.ensure_on().await?;
                tracing::info!("Ensure on before toggle: {}", on);
                if !on {
                    tracing::warn!("Modem state unknown, power-off toggle may turn it on");
                }
                session.pulse().await?;
                Ok(None)
            }
            Trigger::PowerToggle => {
                session.pulse().await?;
                Ok(None)
            }
            Trigger::SendSms { number, text } => {
                self.send_sms(&session, &number, &text).await;
                Ok(None)
            }
            Trigger::Dial { number } => {
                tracing::info!("📞 Dialing {}", number);
                session.dial_voice(&number).await;
                Ok(None)
            }
            Trigger::QueryBalance => {
                let balance = self.query_balance(&session).await;
                tracing::info!("💰 Balance: {}", balance);
                Ok(Some(Outbound::Balance(balance)))
            }
        }
    }

    async fn send_sms(&self, session: &ModemSession<'_>, number: &str, text: &str) {
        tracing::info!("✉️ Sending SMS to {}", number);
        session.clear();
        session.send_sms(number, text).await;
        if !session.await_count(1, SMS_REPLY_WAIT).await {
            tracing::warn!("No reply after SMS submission to {}", number);
        }
        session.clear();
        tokio::time::sleep(SETTLE_DELAY).await;
    }

    async fn query_balance(&self, session: &ModemSession<'_>) -> BalanceResult {
        session.clear();
        session.dial_ussd(&self.ussd_code).await;

        // The first two lines are the echo and the OK, not the USSD reply.
        session.await_count(2, USSD_REPLY_WAIT).await;
        session.pop();
        session.pop();

        tokio::time::sleep(USSD_GAP).await;
        session.await_count(1, USSD_REPLY_WAIT).await;

        let reply = session.drain_all().join(" ");
        tracing::info!("Parsing message: {}", reply);
        self.balance.extract(&reply)
    }
}

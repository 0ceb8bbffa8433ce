use crate::adapters::inbound::InboundRouter;
use crate::config::{BridgeConfig, TopicsConfig};
use crate::core::commands::SetupCommand;
use crate::core::dispatcher::Dispatcher;
use crate::domain::model::{DeviceUpdate, InboundMessage, Outbound};
use crate::domain::ports::MessageBus;
use crate::utils::error::Result;
use tokio::sync::mpsc;

pub const ENSURE_ON_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub modem_on: bool,
    pub ensure_on_attempts: u32,
}

/// Connects the message bus to the dispatcher.
pub struct Bridge<B: MessageBus> {
    bus: B,
    dispatcher: Dispatcher,
    router: InboundRouter,
    topics: TopicsConfig,
    balance_idx: u32,
}

impl<B: MessageBus> Bridge<B> {
    pub fn new(bus: B, dispatcher: Dispatcher, config: &BridgeConfig) -> Self {
        Self {
            bus,
            dispatcher,
            router: InboundRouter::new(config),
            topics: config.topics.clone(),
            balance_idx: config.balance.idx,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Connect, subscribe, bring the modem up and configure SMS.
    ///
    /// An unresponsive modem does not abort startup; the report says whether
    /// it answered.
    pub async fn start(&self) -> Result<StartupReport> {
        tracing::info!("Connecting to MQTT broker");
        self.bus.connect().await?;

        tracing::info!("Subscribing to {}", self.topics.subscribe);
        self.bus.subscribe(&self.topics.subscribe).await?;

        tracing::info!("Ensuring GSM module is on");
        let session = self.dispatcher.modem().session().await;
        let mut modem_on = false;
        let mut attempts = 0;
        while attempts < ENSURE_ON_ATTEMPTS && !modem_on {
            attempts += 1;
            modem_on = session.ensure_on().await?;
        }
        if !modem_on {
            tracing::warn!(
                "⚠️ GSM module did not answer after {} attempts, continuing anyway",
                attempts
            );
        }

        session.run_setup(SetupCommand::Probe).await;
        tracing::info!("Setting SMS mode to text");
        session.run_setup(SetupCommand::SmsTextMode).await;
        tracing::info!("Setting SMS encoding to GSM");
        session.run_setup(SetupCommand::SmsEncodingGsm).await;

        tracing::info!(
            "✅ Finished initializing. GSM module indicated working: {}",
            modem_on
        );
        Ok(StartupReport {
            modem_on,
            ensure_on_attempts: attempts,
        })
    }

    /// Handles inbound messages one at a time until the channel closes.
    ///
    /// Failures are logged per message; only fatal errors end the loop.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) -> Result<()> {
        while let Some(message) = inbound.recv().await {
            if let Err(e) = self.handle_message(&message).await {
                if e.is_fatal() {
                    tracing::error!("❌ Fatal error while handling {}: {}", message.topic, e);
                    return Err(e);
                }
                tracing::error!("Failure when processing message on {}: {}", message.topic, e);
            }
        }
        tracing::info!("Inbound channel closed");
        Ok(())
    }

    pub async fn handle_message(&self, message: &InboundMessage) -> Result<()> {
        let trigger = match self.router.route(message) {
            Ok(Some(trigger)) => trigger,
            Ok(None) => {
                tracing::debug!("Ignoring message on {}", message.topic);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Dropping malformed message on {}: {}", message.topic, e);
                return Ok(());
            }
        };

        if let Some(outbound) = self.dispatcher.handle(trigger).await? {
            self.publish(outbound).await?;
        }
        Ok(())
    }

    async fn publish(&self, outbound: Outbound) -> Result<()> {
        match outbound {
            Outbound::Balance(balance) => {
                let update = DeviceUpdate {
                    idx: self.balance_idx,
                    nvalue: 0,
                    svalue: balance.to_string(),
                };
                let payload = serde_json::to_string(&update)?;
                self.bus.publish(&self.topics.publish, &payload).await
            }
        }
    }
}

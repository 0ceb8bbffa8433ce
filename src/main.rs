use anyhow::Context;
use clap::Parser;
use gsm_bridge::adapters::gpio::power_pins;
use gsm_bridge::utils::{logger, validation::Validate};
use gsm_bridge::{Bridge, CliArgs, Dispatcher, Modem, MqttBus, PowerToggle, SerialLink};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    logger::init_logger(args.verbose, args.json_logs);

    tracing::info!("Starting gsm-bridge");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load configuration: {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let link = SerialLink::open(&config.serial)
        .with_context(|| format!("failed to open serial port {}", config.serial.port))?;
    let power = PowerToggle::new(power_pins(&config.gpio));
    let modem = Arc::new(Modem::new(link, power));
    let dispatcher = Dispatcher::new(modem.clone(), &config.balance)
        .context("failed to build dispatcher")?;

    let (bus, inbound) = MqttBus::new(&config.mqtt);
    let bridge = Bridge::new(bus, dispatcher, &config);

    let outcome = tokio::select! {
        result = async {
            let report = bridge.start().await?;
            tracing::info!(
                "🚀 Bridge ready (modem on: {}, ensure-on attempts: {})",
                report.modem_on,
                report.ensure_on_attempts
            );
            bridge.run(inbound).await
        } => result.context("bridge stopped with a fatal error"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
            Ok(())
        }
    };

    modem.shutdown();
    bridge.bus().disconnect().await;

    if let Err(e) = &outcome {
        tracing::error!("❌ {:#}", e);
    }
    outcome
}

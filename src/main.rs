use clap::{Parser, Subcommand};
use lorawan_node::{
    init_logger, log_info, Callbacks, ChannelPlan, ControllerConfig, FileSessionStore,
    LoraController, LoraError, MockMacEngine, MockScript, OutboundMessage, RadioIdentity,
    SessionManager,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lorawan-node")]
#[command(about = "Simulated LoRaWAN station driver for the session controller")]
struct Cli {
    /// Path of the session snapshot file standing in for non-volatile storage
    #[arg(short, long, default_value = "session.json")]
    session_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one wake cycle: join, send uplinks, drain the status queue,
    /// then snapshot for the next sleep
    Cycle {
        /// Number of telemetry uplinks to send
        #[arg(short, long, default_value = "2")]
        uplinks: u32,
        /// Planned deep-sleep interval in seconds
        #[arg(long, default_value = "3600")]
        sleep_secs: u32,
        /// Join tier at which the simulated network accepts the device
        #[arg(long, default_value = "1")]
        join_on_attempt: u32,
    },
    /// Print the persisted session snapshot
    ShowSession,
    /// Erase the persisted session
    FactoryReset,
}

#[tokio::main]
async fn main() -> Result<(), LoraError> {
    init_logger();

    let cli = Cli::parse();
    let sessions = SessionManager::new(Box::new(FileSessionStore::new(&cli.session_file)));

    match cli.command {
        Commands::Cycle {
            uplinks,
            sleep_secs,
            join_on_attempt,
        } => {
            let mut script = MockScript::default();
            script.join_outcomes = (1..=join_on_attempt).map(|n| n == join_on_attempt).collect();
            script.time_answer = Some(Some(1_725_000_000));

            let config = ControllerConfig {
                join_tier_base: Duration::from_millis(200),
                join_jitter: (Duration::from_millis(10), Duration::from_millis(50)),
                ..Default::default()
            };
            let callbacks = Callbacks::new()
                .with_downlink(|port, payload| {
                    log_info(&format!(
                        "downlink on port {port}: {}",
                        hex::encode(payload)
                    ));
                })
                .with_time_corrected(|epoch| {
                    log_info(&format!("corrected network time: epoch {epoch}"));
                });

            let controller = LoraController::start(
                RadioIdentity::new([0x26, 0x01, 0x14, 0xAF, 0x00, 0x00, 0x00, 0x01], [0x2B; 16]),
                ChannelPlan::eu868(),
                Box::new(MockMacEngine::new(script)),
                sessions,
                config,
                callbacks,
                sleep_secs,
            )
            .await?;

            controller.join().await?;
            log_info(&format!(
                "joined, device address 0x{:08X}",
                controller.device_address()?
            ));

            for n in 0..uplinks {
                let payload = vec![0xA0, n as u8, 0x17, 0x2C];
                let message = OutboundMessage::new(1, payload)?;
                controller.send(message, Duration::from_secs(10)).await?;
            }

            controller.request_network_time().await?;
            controller.queue(2, vec![0x01])?;
            controller.drain().await;

            controller.prepare_for_sleep(sleep_secs).await?;
            let session = controller.session();
            log_info(&format!(
                "snapshot written, frame counter {}",
                session.frame_counter_up
            ));
            controller.shutdown().await;
        }

        Commands::ShowSession => match sessions.restore(0) {
            Some(session) => log_info(&format!("{session:#?}")),
            None => log_info("no usable session snapshot"),
        },

        Commands::FactoryReset => {
            sessions.clear()?;
            log_info("session snapshot erased");
        }
    }

    Ok(())
}

mod averages;
mod bluetooth;
mod config;
mod error;
mod models;
mod mqtt;
mod orchestrator;
mod utils;

use log::{error, info};
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};

use averages::AverageStore;
use bluetooth::BluerTransport;
use config::AppConfig;
use mqtt::MqttBus;
use orchestrator::PollOrchestrator;
use utils::{duration_to_seconds, format_datetime};

/// Run one polling pass with a fresh view of the average store
async fn run_once(config: &AppConfig, transport: &BluerTransport, bus: &MqttBus) {
    let mut store = AverageStore::load(&config.averages_path);
    PollOrchestrator::new(config, transport, bus)
        .run(&mut store)
        .await;
}

/// Repeat runs every `interval_secs` until a shutdown signal arrives
///
/// The signal is only honoured between runs so a run always finishes and
/// persists its averages.
async fn main_loop(
    config: &AppConfig,
    transport: &BluerTransport,
    bus: &MqttBus,
    interval_secs: u64,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    info!("Polling every {} seconds", interval_secs);

    loop {
        let start_time = OffsetDateTime::now_utc();
        info!("Starting run at: {}", format_datetime(&start_time));

        run_once(config, transport, bus).await;

        if shutdown.try_recv().is_ok() {
            break;
        }

        // Wait until next run should start
        let elapsed = duration_to_seconds(OffsetDateTime::now_utc() - start_time);
        let wait_time = interval_secs.saturating_sub(elapsed);
        info!("Waiting {} seconds until next run", wait_time);

        tokio::select! {
            _ = sleep(Duration::from_secs(wait_time)) => {}
            _ = &mut shutdown => break,
        }
    }

    info!("Program terminated by user. Exiting gracefully.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let transport = match BluerTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to initialise Bluetooth: {}", e);
            return Err(e.into());
        }
    };
    let bus = MqttBus;

    let interval_secs = match config.interval_secs {
        Some(secs) => secs,
        None => {
            run_once(&config, &transport, &bus).await;
            return Ok(());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    main_loop(&config, &transport, &bus, interval_secs, rx).await;
    Ok(())
}

mod config;
mod https;
mod sensor;

use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};

use config::ReporterConfig;
use https::{ReportingEngine, TlsTransport};
use sensor::{HysteresisGate, ThermalProbe};

const SAMPLE_INTERVAL_SECS: u64 = 10;
/// Minimum temperature change (°C) before a new report goes out.
const REPORT_THRESHOLD: f32 = 0.1;
/// Certificate validation cannot succeed with a clock before this year;
/// time synchronization itself is handled outside this process.
const MIN_PLAUSIBLE_YEAR: i32 = 2024;

async fn main_loop(config: ReporterConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting temperature reporting service");

    // A missing sensor is unrecoverable; bail out before the first cycle.
    let probe = ThermalProbe::detect()?;

    let transport = TlsTransport::new(config.host.clone(), config.port, config.ca_file.clone());
    let mut engine = ReportingEngine::new(transport, config.host.clone());
    let mut gate = HysteresisGate::new(REPORT_THRESHOLD);

    loop {
        match probe.sample() {
            Ok(reading) => {
                info!("Temperature value {:.2} °C", reading);
                if gate.should_report(reading) {
                    // The TLS exchange is synchronous retry-loop code; run it
                    // on the blocking pool and take the engine back afterwards.
                    let (returned, delivered) = tokio::task::spawn_blocking(move || {
                        let delivered = engine.report(reading);
                        (engine, delivered)
                    })
                    .await?;
                    engine = returned;

                    // Best-effort telemetry: a failed report is only logged;
                    // the next change triggers a fresh attempt.
                    if !delivered {
                        warn!(
                            "report for {:.2} °C failed; waiting for the next change",
                            reading
                        );
                    }
                }
            }
            Err(e) => error!("sampling failed this cycle: {}", e),
        }

        sleep(Duration::from_secs(SAMPLE_INTERVAL_SECS)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ReporterConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // Handshake validation needs a plausible wall clock; warn early if the
    // time-sync collaborator has not caught up yet.
    let now = OffsetDateTime::now_utc();
    if now.year() < MIN_PLAUSIBLE_YEAR {
        warn!(
            "system clock reads year {}; certificate validation will fail until time is synchronized",
            now.year()
        );
    }

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        let _ = tx.send(());
    });

    // Run main loop or wait for shutdown signal. Dropping the loop future
    // releases the cached TLS session along with the engine that owns it.
    tokio::select! {
        result = main_loop(config) => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}

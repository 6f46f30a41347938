//! HTTP command and telemetry server for the reaction-wheel ADCS.
//!
//! Starts the sensing and control loops on the selected hardware and serves
//! the command/telemetry endpoints until Ctrl-C, which stops and disables the
//! motor before exit.

use std::sync::Arc;

use adcs::AdcsController;
use adcs_server::publisher::{publish_period, MAX_PUBLISH_RATE_HZ};
use adcs_server::{serve, spawn_publisher, AppState, ConfigArgs, HardwareArgs};
use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP command and telemetry server for the reaction-wheel ADCS")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Telemetry stream publish rate in Hz (at most 1000)
    #[arg(long, default_value_t = 20.0)]
    publish_rate: f64,

    #[command(flatten)]
    hardware: HardwareArgs,

    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let Some(period) = publish_period(args.publish_rate) else {
        bail!(
            "--publish-rate must be within (0, {MAX_PUBLISH_RATE_HZ}] Hz, got {}",
            args.publish_rate
        );
    };

    let config = args.config.load()?;
    let hardware = args.hardware.open()?;
    let adcs = AdcsController::spawn(hardware.imu, hardware.motor, config)
        .context("Failed to start ADCS")?;
    let adcs = Arc::new(adcs);

    let state = AppState::new(adcs.clone());
    let publisher = spawn_publisher(adcs.clone(), state.telemetry.clone(), period);

    let listener = TcpListener::bind((args.bind.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.bind, args.port))?;

    tokio::select! {
        result = serve(listener, state) => {
            if let Err(e) = result {
                error!("Server failed: {e}");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C received");
        }
    }

    info!("Shutting down ADCS");
    let controller = adcs.clone();
    tokio::task::spawn_blocking(move || controller.shutdown())
        .await
        .context("Shutdown task failed")?;
    publisher.await.context("Telemetry publisher failed")?;
    info!("Motor stopped and disabled, exiting");
    Ok(())
}

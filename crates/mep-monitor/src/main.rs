//! MEP Monitor - headless acquisition and MEP measurement
//!
//! Connects to the amplifier (or an in-process simulated one), cuts epochs
//! around stimulus triggers and logs their peak-to-peak amplitudes.

mod monitor;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use mep_acquisition::DeviceSession;
use mep_core::{ConnectionState, MeasurementState};
use mep_simulation::SimulatedAmplifier;
use monitor::{MepMonitor, MonitorSnapshot};
use settings::MonitorSettings;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mep-monitor", version, about = "Stream EMG from the amplifier and measure MEPs")]
struct Cli {
    /// Settings file (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "mep_acquisition=trace"; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Run a simulated amplifier on loopback and connect to it
    #[arg(long)]
    simulate: bool,

    /// Write the effective settings to this file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).context("Invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = match &cli.config {
        Some(path) => MonitorSettings::load(path)?,
        None => MonitorSettings::default(),
    };
    settings.validate().context("Invalid settings")?;

    if let Some(path) = &cli.write_config {
        settings.save(path)?;
        info!(path = %path.display(), "settings written");
        return Ok(());
    }

    let simulator = if cli.simulate {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let amplifier = SimulatedAmplifier::bind(settings.simulator.clone(), loopback)
            .await
            .context("Failed to start simulated amplifier")?;
        settings.session.local_addr = loopback;
        settings.session.device_addr = amplifier.join_addr();
        Some(amplifier)
    } else {
        None
    };

    let mut session =
        DeviceSession::new(settings.session.clone()).context("Failed to open device session")?;
    let amplifier = simulator
        .map(|simulator| simulator.spawn(session.local_addr()))
        .transpose()?;
    session.start()?;
    info!(
        local_addr = %session.local_addr(),
        device = %settings.session.device_addr,
        "listening"
    );

    let mut monitor = MepMonitor::new(settings.epoch.clone(), settings.analysis.clone())?;
    let mut ticker = tokio::time::interval(settings.monitor.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut last_connection = ConnectionState::Disconnected;
    let mut last_measurement = MeasurementState::Idle;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = monitor.poll_once(&session);
                if snapshot.connection != last_connection {
                    info!(connection = %snapshot.connection, "device connection changed");
                    last_connection = snapshot.connection;
                }
                let measurement = session.measurement();
                if measurement != last_measurement {
                    info!(
                        %measurement,
                        sampling_rate = ?snapshot.sampling_rate,
                        "measurement state changed"
                    );
                    last_measurement = measurement;
                }
                report(&snapshot);
            }
            result = &mut shutdown => {
                result.context("Failed to listen for ctrl-c")?;
                info!("shutting down");
                break;
            }
        }
    }

    // stop() joins the receive thread, which can block for one receive timeout
    let stats = tokio::task::spawn_blocking(move || {
        session.stop();
        session.stats()
    })
    .await?;
    info!(?stats, "session stats");
    info!(stats = ?monitor.extractor().stats(), "extractor stats");

    if let Some(amplifier) = amplifier {
        if let Err(e) = amplifier.shutdown().await {
            warn!(error = %e, "simulated amplifier failed");
        }
    }
    Ok(())
}

fn report(snapshot: &MonitorSnapshot) {
    if snapshot.new_epochs == 0 {
        return;
    }
    let Some(summary) = &snapshot.summary else {
        return;
    };
    let newest = summary.peak_to_peak.last().copied().unwrap_or_default();
    info!(
        new_epochs = snapshot.new_epochs,
        latest_uv = newest,
        epochs = summary.traces.len(),
        mean_uv = summary.mean_peak_to_peak.unwrap_or_default(),
        "peak-to-peak updated"
    );
}

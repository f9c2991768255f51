//! Flight-category LED board.
//!
//! Polls METARs for the configured stations and shows each station's flight
//! category on its LED, dimming the strip at night.
//!
//! ## Architecture
//! - **Display thread** (std::thread): owns the LED strip, applies commands
//! - **Weather poller** (tokio task): fetches METARs, sends pixel updates
//! - **Dimmer** (tokio task): sends day/night brightness levels
//! - **Shutdown coordinator** (this task): waits for SIGINT/SIGTERM, then
//!   stops the producers, then the display
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/flightboard --config /etc/flightboard.yaml
//! ./target/release/flightboard --config config.example.yaml --dry-run --debug
//! ```

use anyhow::Context;
use clap::Parser;
use flightboard::config::Config;
use flightboard::device::MockDevice;
use flightboard::dimmer::{BrightnessController, Location};
use flightboard::render::{DisplayHandle, spawn_display};
use flightboard::shutdown::{self, ShutdownCoordinator, spawn_task};
use flightboard::weather::{AviationWeatherClient, WeatherPoller};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Aviation weather LED board
#[derive(Parser)]
#[command(name = "flightboard")]
#[command(about = "Show METAR flight categories on a WS281x LED strip")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Drive an in-memory LED device instead of the strip
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("Could not load {}", args.config.display()))?;
    let stations = Arc::new(config.station_map()?);
    let palette = config.palette()?;

    tracing::info!("Flightboard v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        led_count = config.led_count,
        stations = stations.len(),
        metar_refresh_s = config.metar_refresh_rate_s,
        led_refresh_ms = config.led_refresh_rate_ms,
        "Starting"
    );

    // Catch signals before any worker exists so none can slip past.
    let signals = shutdown::install_signal_handler().context("Could not install signal handler")?;

    let display = start_display(&args, &config).context("Could not start LEDs")?;

    let client = AviationWeatherClient::new(config.metar.url.clone(), config.metar_timeout())
        .context("Could not build HTTP client")?;
    let poller = WeatherPoller::new(
        client,
        stations,
        palette,
        display.sender(),
        config.metar_refresh(),
    );
    let weather = spawn_task("weather", tracing::info_span!("weather"), |stop| poller.run(stop));

    let location = Location {
        latitude: config.latitude,
        longitude: config.longitude,
        timezone: config.locale.clone(),
    };
    let dimmer = BrightnessController::new(
        location,
        config.full_brightness(),
        display.sender(),
        config.dimmer_refresh(),
    );
    let dimmer = spawn_task("dimmer", tracing::info_span!("dimmer"), |stop| dimmer.run(stop));

    let report = ShutdownCoordinator::new(config.shutdown_grace())
        .run(signals, vec![weather, dimmer], display.into_worker())
        .await;

    if report.is_clean() {
        tracing::info!("Shut down cleanly.");
    } else {
        tracing::warn!(timed_out = ?report.timed_out, "Shut down with workers still running");
    }
    Ok(())
}

/// Start the display thread on the real strip, or on the mock for
/// `--dry-run` and builds without the `hardware` feature.
fn start_display(args: &Args, config: &Config) -> anyhow::Result<DisplayHandle> {
    let span = tracing::info_span!("display");
    let led_count = config.led_count;
    let brightness = config.full_brightness();
    let period = config.led_refresh();

    #[cfg(feature = "hardware")]
    {
        if !args.dry_run {
            let strip = config.strip;
            let display = spawn_display(
                move || flightboard::ws281x::Ws281xDevice::new(strip, led_count, brightness),
                led_count,
                brightness,
                period,
                span,
            )?;
            return Ok(display);
        }
    }

    #[cfg(not(feature = "hardware"))]
    {
        if !args.dry_run {
            tracing::warn!("Built without the `hardware` feature, using the in-memory LED device");
        }
    }

    tracing::info!("Dry run: LED frames are kept in memory only");
    let display = spawn_display(
        move || MockDevice::new(led_count),
        led_count,
        brightness,
        period,
        span,
    )?;
    Ok(display)
}

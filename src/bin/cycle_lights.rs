//! # Cycle Lights
//!
//! Installation helper: lights each configured LED in turn, logging which
//! station it belongs to, and waits for Enter before moving on. Handy for
//! checking that the strip is wired in the order the config expects.
//!
//! ## Run it
//! ```sh
//! cargo build --release --features hardware --bin cycle_lights
//! sudo ./target/release/cycle_lights --config config.yaml
//! ```

#[cfg(not(feature = "hardware"))]
fn main() {
    eprintln!("This binary requires the 'hardware' feature.");
    eprintln!("Build with: cargo build --release --features hardware");
    std::process::exit(1);
}

#[cfg(feature = "hardware")]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use clap::Parser;
    use flightboard::Color;
    use flightboard::config::Config;
    use flightboard::render::DisplayEngine;
    use flightboard::ws281x::Ws281xDevice;
    use std::path::PathBuf;

    const CRIMSON: Color = Color::new(220, 20, 60);

    /// Light each configured LED in turn
    #[derive(Parser)]
    #[command(name = "cycle_lights")]
    struct Args {
        /// Path to the YAML configuration file
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    }

    tracing_subscriber::fmt().with_target(false).compact().init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Could not load {}", args.config.display()))?;
    let stations = config.station_map()?;

    let brightness = config.full_brightness();
    let device = Ws281xDevice::new(config.strip, config.led_count, brightness);
    let mut engine =
        DisplayEngine::new(device, config.led_count, brightness).context("Could not set up LEDs")?;

    tracing::info!("Hit enter to continue");
    let stdin = std::io::stdin();
    let mut line = String::new();

    for (index, station) in stations.iter() {
        tracing::info!(led = index, station, "Displaying");
        engine.enqueue(index, CRIMSON);
        engine.tick();

        line.clear();
        stdin.read_line(&mut line)?;

        engine.enqueue(index, Color::BLACK);
        engine.tick();
    }

    engine.stop();
    Ok(())
}

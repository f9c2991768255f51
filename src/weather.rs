//! Weather poller: fetch METARs, classify them, emit pixel updates.
//!
//! ## Architecture
//! - `MetarSource` is the retrieval seam; `AviationWeatherClient` is the
//!   real one, tests use a scripted source
//! - `WeatherPoller` runs as a tokio task and sends `DisplayCommand::Pixel`
//!   to the display thread over its `std::sync::mpsc` channel
//! - A cycle either emits all of its updates or none of them
//!
//! ## Rust concepts
//! - `#[async_trait]` for an object-friendly async trait
//! - `tokio::select!` to race a timer against a stop signal
//! - `serde::Deserialize` straight from CSV rows

use crate::config::StationMap;
use crate::render::DisplayCommand;
use crate::{Color, PixelUpdate};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// First column name of the CSV header. Everything before it is preamble.
const HEADER_FIELD: &str = "raw_text";

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("METAR request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("METAR request returned HTTP {0}")]
    Status(u16),
    #[error("METAR response has no `raw_text` header row")]
    MissingHeader,
    #[error("malformed METAR CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("display is no longer accepting updates")]
    DisplayClosed,
}

// ── Flight category ──────────────────────────────────────────────────

/// Coarse visibility/ceiling classification of a METAR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
    /// The report had no category.
    Unknown,
    /// The report had a category we do not know; the text is kept for logs.
    Unrecognized(String),
}

impl FlightCategory {
    /// Classify free text, ignoring case and surrounding whitespace.
    pub fn classify(text: &str) -> Self {
        let text = text.trim();
        match text.to_ascii_uppercase().as_str() {
            "VFR" => Self::Vfr,
            "MVFR" => Self::Mvfr,
            "IFR" => Self::Ifr,
            "LIFR" => Self::Lifr,
            "" => Self::Unknown,
            _ => Self::Unrecognized(text.to_string()),
        }
    }
}

/// Display color for each flight category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub vfr: Color,
    pub mvfr: Color,
    pub ifr: Color,
    pub lifr: Color,
    pub unknown: Color,
    pub unrecognized: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            vfr: Color::new(50, 205, 50),            // limegreen
            mvfr: Color::new(0, 0, 255),             // blue
            ifr: Color::new(255, 0, 0),              // red
            lifr: Color::new(199, 21, 133),          // mediumvioletred
            unknown: Color::new(128, 128, 128),      // grey
            unrecognized: Color::new(250, 235, 215), // antiquewhite
        }
    }
}

impl Palette {
    /// Color for a category. Every fallback to `unrecognized` is logged.
    pub fn color_for(&self, category: &FlightCategory, station: &str) -> Color {
        match category {
            FlightCategory::Vfr => self.vfr,
            FlightCategory::Mvfr => self.mvfr,
            FlightCategory::Ifr => self.ifr,
            FlightCategory::Lifr => self.lifr,
            FlightCategory::Unknown => self.unknown,
            FlightCategory::Unrecognized(text) => {
                tracing::warn!(
                    station,
                    category = %text,
                    "Unrecognized flight category, using fallback color"
                );
                self.unrecognized
            }
        }
    }
}

// ── Reports ──────────────────────────────────────────────────────────

/// The fields of a METAR row the board cares about.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MetarReport {
    pub station_id: String,
    #[serde(default)]
    pub flight_category: String,
}

impl MetarReport {
    pub fn new(station_id: &str, flight_category: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            flight_category: flight_category.to_string(),
        }
    }
}

/// Parse the aviationweather.gov CSV format.
///
/// The body starts with a few lines of free-form preamble (errors,
/// warnings, timing, result count) before the header row. Any row that
/// does not deserialize fails the whole payload.
pub fn parse_metar_csv(body: &str) -> Result<Vec<MetarReport>, WeatherError> {
    let mut start = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.starts_with(HEADER_FIELD) {
            start = Some(offset);
            break;
        }
        offset += line.len();
    }
    let start = start.ok_or(WeatherError::MissingHeader)?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body[start..].as_bytes());

    let mut reports = Vec::new();
    for row in reader.deserialize::<MetarReport>() {
        reports.push(row?);
    }
    Ok(reports)
}

// ── Sources ──────────────────────────────────────────────────────────

/// Where METARs come from.
#[async_trait]
pub trait MetarSource: Send + Sync {
    async fn fetch(&self, stations: &[String]) -> Result<Vec<MetarReport>, WeatherError>;
}

/// HTTP client for the aviationweather.gov data server.
#[derive(Debug, Clone)]
pub struct AviationWeatherClient {
    http: reqwest::Client,
    url: String,
}

impl AviationWeatherClient {
    /// Every request is bounded by `timeout` so a hung server cannot stall
    /// shutdown.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("flightboard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MetarSource for AviationWeatherClient {
    async fn fetch(&self, stations: &[String]) -> Result<Vec<MetarReport>, WeatherError> {
        let res = self
            .http
            .get(&self.url)
            .query(&[("stationString", stations.join(","))])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body = res.text().await?;
        parse_metar_csv(&body)
    }
}

// ── Poller ───────────────────────────────────────────────────────────

pub struct WeatherPoller<S> {
    source: S,
    stations: Arc<StationMap>,
    palette: Palette,
    display: Sender<DisplayCommand>,
    period: Duration,
}

impl<S: MetarSource> WeatherPoller<S> {
    pub fn new(
        source: S,
        stations: Arc<StationMap>,
        palette: Palette,
        display: Sender<DisplayCommand>,
        period: Duration,
    ) -> Self {
        Self {
            source,
            stations,
            palette,
            display,
            period,
        }
    }

    /// One fetch-classify-emit pass. Returns how many updates were sent.
    pub async fn fetch_cycle(&self) -> Result<usize, WeatherError> {
        tracing::debug!(stations = self.stations.len(), "Fetching METARs");
        let reports = self.source.fetch(&self.stations.stations()).await?;

        let updates: Vec<PixelUpdate> = reports
            .iter()
            .filter_map(|report| {
                let Some(index) = self.stations.index_of(&report.station_id) else {
                    tracing::warn!(station = %report.station_id, "No LED configured for station");
                    return None;
                };
                let category = FlightCategory::classify(&report.flight_category);
                let color = self.palette.color_for(&category, &report.station_id);
                Some(PixelUpdate { index, color })
            })
            .collect();

        for update in &updates {
            self.display
                .send(DisplayCommand::Pixel(*update))
                .map_err(|_| WeatherError::DisplayClosed)?;
        }

        tracing::info!(reports = reports.len(), updates = updates.len(), "METAR cycle complete");
        Ok(updates.len())
    }

    /// Poll immediately, then every `period`, until `stop` fires.
    ///
    /// A fetch still in flight when `stop` arrives is dropped.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = &mut stop => {
                    tracing::info!("Abandoning in-flight METAR fetch");
                    break;
                }
                result = self.fetch_cycle() => match result {
                    Ok(_) => {}
                    Err(WeatherError::DisplayClosed) => {
                        tracing::warn!("Display closed, weather poller exiting");
                        break;
                    }
                    Err(e) => tracing::error!("Could not fetch METARs: {}", e),
                },
            }
        }

        tracing::info!("Weather poller stopped");
    }
}

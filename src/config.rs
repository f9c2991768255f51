//! YAML configuration and the station ↔ LED map built from it.
//!
//! Everything here is validated once at startup; any problem is a
//! `ConfigError` and the process refuses to start.
//!
//! ```yaml
//! led_count: 50
//! brightness: 128
//! latitude: 37.62
//! longitude: -122.38
//! locale: America/Los_Angeles
//! leds:
//!   0: KSFO
//!   3: KOAK
//! colors:
//!   vfr: "#00ff00"
//! ```

use crate::weather::Palette;
use crate::{Color, ColorError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_METAR_URL: &str = "https://aviationweather.gov/api/data/dataserver?requestType=retrieve&dataSource=metars&format=csv&mostRecentForEachStation=true&hoursBeforeNow=4";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid color for `{field}`: {source}")]
    Color { field: &'static str, source: ColorError },
}

// ── Config ───────────────────────────────────────────────────────────

/// The whole configuration file.
///
/// # Rust concept: serde defaults
/// `#[serde(default = "...")]` names a function that supplies the value
/// when the key is missing, so the file only needs what differs.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub led_count: usize,
    /// LED index → station identifier. Signed so that a negative index in
    /// the file is reported as out of range instead of a type error.
    #[serde(default)]
    pub leds: BTreeMap<i64, String>,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: u8,
    #[serde(default = "default_metar_refresh_rate_s")]
    pub metar_refresh_rate_s: u64,
    #[serde(default = "default_led_refresh_rate_ms")]
    pub led_refresh_rate_ms: u64,
    #[serde(default = "default_dimmer_refresh_s")]
    pub dimmer_refresh_s: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone name, e.g. `America/Los_Angeles`.
    pub locale: String,
    #[serde(default)]
    pub colors: ColorConfig,
    #[serde(default)]
    pub metar: MetarConfig,
    #[serde(default)]
    pub strip: StripConfig,
}

fn default_brightness() -> u8 {
    128
}

fn default_max_brightness() -> u8 {
    255
}

fn default_metar_refresh_rate_s() -> u64 {
    300
}

fn default_led_refresh_rate_ms() -> u64 {
    100
}

fn default_dimmer_refresh_s() -> u64 {
    10
}

fn default_shutdown_grace_ms() -> u64 {
    500
}

/// Optional hex overrides for the flight-category palette.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColorConfig {
    pub vfr: Option<String>,
    pub mvfr: Option<String>,
    pub ifr: Option<String>,
    pub lifr: Option<String>,
    pub unknown: Option<String>,
    pub unrecognized: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetarConfig {
    #[serde(default = "default_metar_url")]
    pub url: String,
    #[serde(default = "default_metar_timeout_s")]
    pub timeout_s: u64,
}

fn default_metar_url() -> String {
    DEFAULT_METAR_URL.to_string()
}

fn default_metar_timeout_s() -> u64 {
    10
}

impl Default for MetarConfig {
    fn default() -> Self {
        Self {
            url: default_metar_url(),
            timeout_s: default_metar_timeout_s(),
        }
    }
}

/// WS281x wiring. Only used by the `hardware` driver.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StripConfig {
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: i32,
    #[serde(default = "default_dma")]
    pub dma: i32,
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u32,
}

fn default_gpio_pin() -> i32 {
    18
}

fn default_dma() -> i32 {
    10
}

fn default_frequency_hz() -> u32 {
    800_000
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            gpio_pin: default_gpio_pin(),
            dma: default_dma(),
            frequency_hz: default_frequency_hz(),
        }
    }
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.led_count == 0 {
            return Err(ConfigError::Invalid("led_count must be at least 1".to_string()));
        }

        let periods = [
            ("metar_refresh_rate_s", self.metar_refresh_rate_s),
            ("led_refresh_rate_ms", self.led_refresh_rate_ms),
            ("dimmer_refresh_s", self.dimmer_refresh_s),
            ("metar.timeout_s", self.metar.timeout_s),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
        }

        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ConfigError::Invalid(format!(
                "location {}, {} is not a valid latitude/longitude",
                self.latitude, self.longitude
            )));
        }

        self.station_map()?;
        self.palette()?;
        Ok(())
    }

    /// Day brightness, clamped to `max_brightness`.
    pub fn full_brightness(&self) -> u8 {
        self.brightness.min(self.max_brightness)
    }

    pub fn station_map(&self) -> Result<StationMap, ConfigError> {
        StationMap::new(&self.leds, self.led_count)
    }

    /// Default palette with any configured overrides applied.
    pub fn palette(&self) -> Result<Palette, ConfigError> {
        let mut palette = Palette::default();
        let c = &self.colors;
        let overrides = [
            ("vfr", &c.vfr, &mut palette.vfr),
            ("mvfr", &c.mvfr, &mut palette.mvfr),
            ("ifr", &c.ifr, &mut palette.ifr),
            ("lifr", &c.lifr, &mut palette.lifr),
            ("unknown", &c.unknown, &mut palette.unknown),
            ("unrecognized", &c.unrecognized, &mut palette.unrecognized),
        ];

        for (field, hex, slot) in overrides {
            if let Some(hex) = hex {
                *slot =
                    Color::from_hex(hex).map_err(|source| ConfigError::Color { field, source })?;
            }
        }
        Ok(palette)
    }

    pub fn metar_refresh(&self) -> Duration {
        Duration::from_secs(self.metar_refresh_rate_s)
    }

    pub fn led_refresh(&self) -> Duration {
        Duration::from_millis(self.led_refresh_rate_ms)
    }

    pub fn dimmer_refresh(&self) -> Duration {
        Duration::from_secs(self.dimmer_refresh_s)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn metar_timeout(&self) -> Duration {
        Duration::from_secs(self.metar.timeout_s)
    }
}

// ── Station map ──────────────────────────────────────────────────────

/// Bidirectional station identifier ↔ LED index map. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationMap {
    by_index: BTreeMap<usize, String>,
    by_station: HashMap<String, usize>,
}

impl StationMap {
    pub fn new(leds: &BTreeMap<i64, String>, led_count: usize) -> Result<Self, ConfigError> {
        let mut map = Self::default();

        for (&index, station) in leds {
            let index = usize::try_from(index)
                .ok()
                .filter(|&i| i < led_count)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "LED index {index} for {station} is outside 0..{led_count}"
                    ))
                })?;

            if station.len() != 4 || !station.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid(format!(
                    "station {station:?} at LED {index} is not a 4-character identifier"
                )));
            }

            let station = station.to_ascii_uppercase();
            if let Some(other) = map.by_station.insert(station.clone(), index) {
                return Err(ConfigError::Invalid(format!(
                    "station {station} is mapped to both LED {other} and LED {index}"
                )));
            }
            map.by_index.insert(index, station);
        }

        Ok(map)
    }

    /// LED index for a station, ignoring case.
    pub fn index_of(&self, station: &str) -> Option<usize> {
        self.by_station.get(&station.to_ascii_uppercase()).copied()
    }

    pub fn station_at(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    /// All stations, ordered by LED index.
    pub fn stations(&self) -> Vec<String> {
        self.by_index.values().cloned().collect()
    }

    /// `(index, station)` pairs ordered by LED index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.by_index.iter().map(|(&i, s)| (i, s.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    const MINIMAL: &str = "
led_count: 5
latitude: 37.62
longitude: -122.38
locale: America/Los_Angeles
leds:
  0: ksfo
  3: KOAK
";

    fn with_base(extra: &str) -> String {
        format!("{MINIMAL}{extra}")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.led_count, 5);
        assert_eq!(config.brightness, 128);
        assert_eq!(config.max_brightness, 255);
        assert_eq!(config.metar_refresh(), Duration::from_secs(300));
        assert_eq!(config.led_refresh(), Duration::from_millis(100));
        assert_eq!(config.dimmer_refresh(), Duration::from_secs(10));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
        assert_eq!(config.metar.url, DEFAULT_METAR_URL);
        assert_eq!(config.metar_timeout(), Duration::from_secs(10));
        assert_eq!(config.strip.gpio_pin, 18);
    }

    #[test]
    fn station_map_is_bidirectional_and_upper_case() {
        let stations = Config::from_yaml(MINIMAL).unwrap().station_map().unwrap();

        assert_eq!(stations.index_of("KSFO"), Some(0));
        assert_eq!(stations.index_of("koak"), Some(3));
        assert_eq!(stations.index_of("KLAX"), None);
        assert_eq!(stations.station_at(0), Some("KSFO"));
        assert_eq!(stations.station_at(1), None);
        assert_eq!(stations.stations(), vec!["KSFO".to_string(), "KOAK".to_string()]);
        assert_eq!(stations.len(), 2);
    }

    const PLACE: &str = "longitude: 0\nlocale: UTC\n";

    #[rstest]
    #[case("led_count: 0\nlatitude: 0\n", "led_count")]
    #[case("led_count: 2\nlatitude: 0\nleds:\n  2: KSFO\n", "outside")]
    #[case("led_count: 2\nlatitude: 0\nleds:\n  -1: KSFO\n", "outside")]
    #[case("led_count: 2\nlatitude: 0\nleds:\n  0: SFO\n", "4-character")]
    #[case("led_count: 2\nlatitude: 0\nleds:\n  0: KS-O\n", "4-character")]
    #[case("led_count: 2\nlatitude: 0\nleds:\n  0: KSFO\n  1: ksfo\n", "both LED")]
    #[case("led_count: 2\nlatitude: 0\nled_refresh_rate_ms: 0\n", "led_refresh_rate_ms")]
    #[case("led_count: 2\nlatitude: 95\n", "latitude")]
    fn invalid_configs_are_rejected(#[case] yaml: &str, #[case] needle: &str) {
        let err = Config::from_yaml(&format!("{yaml}{PLACE}")).unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "expected {needle:?} in {err}"
        );
    }

    #[test]
    fn missing_required_key_is_a_yaml_error() {
        let err = Config::from_yaml("led_count: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn palette_overrides_apply() {
        let colors = "colors:\n  vfr: \"#0f0\"\n  unknown: \"#101010\"\n";
        let config = Config::from_yaml(&with_base(colors)).unwrap();
        let palette = config.palette().unwrap();

        assert_eq!(palette.vfr, Color::new(0, 255, 0));
        assert_eq!(palette.unknown, Color::new(16, 16, 16));
        assert_eq!(palette.ifr, Palette::default().ifr);
    }

    #[test]
    fn bad_palette_override_names_the_field() {
        let err = Config::from_yaml(&with_base("colors:\n  lifr: \"magenta\"\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Color { field: "lifr", .. }));
    }

    #[rstest]
    #[case(128, 255, 128)]
    #[case(200, 100, 100)]
    fn full_brightness_is_clamped(#[case] brightness: u8, #[case] max: u8, #[case] expected: u8) {
        let config = Config::from_yaml(&with_base(&format!(
            "brightness: {brightness}\nmax_brightness: {max}\n"
        )))
        .unwrap();
        assert_eq!(config.full_brightness(), expected);
    }

    #[test]
    fn load_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.locale, "America/Los_Angeles");
    }

    #[test]
    fn load_missing_file_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope.yaml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("nope.yaml"));
    }
}

//! Automatic dimmer: half brightness between sunset and sunrise.

use crate::render::DisplayCommand;
use crate::sun::{self, SunTimes};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SunError {
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("no sunrise or sunset on {0} at this location")]
    NoSunEvents(chrono::NaiveDate),
}

/// Where the board hangs.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone name
    pub timezone: String,
}

impl Location {
    /// Today's (local) sunrise and sunset around `now`.
    ///
    /// The timezone is resolved on every call so a bad name skips cycles
    /// instead of preventing startup.
    pub fn sun_times(&self, now: DateTime<Utc>) -> Result<SunTimes, SunError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| SunError::UnknownTimezone(self.timezone.clone()))?;

        let today = now.with_timezone(&tz).date_naive();
        let times = sun::sun_times(self.latitude, self.longitude, today, &tz)
            .ok_or(SunError::NoSunEvents(today))?;

        tracing::debug!(
            sunrise = %times.sunrise.with_timezone(&tz),
            sunset = %times.sunset.with_timezone(&tz),
            "Sunrise & sunset"
        );
        Ok(times)
    }
}

/// Periodically decides between day and night brightness.
pub struct BrightnessController {
    location: Location,
    full: u8,
    display: Sender<DisplayCommand>,
    period: Duration,
}

impl BrightnessController {
    pub fn new(
        location: Location,
        full: u8,
        display: Sender<DisplayCommand>,
        period: Duration,
    ) -> Self {
        Self {
            location,
            full,
            display,
            period,
        }
    }

    pub fn dim_level(&self) -> u8 {
        self.full / 2
    }

    /// Brightness for the instant `now`.
    pub fn level_at(&self, now: DateTime<Utc>) -> Result<u8, SunError> {
        let times = self.location.sun_times(now)?;

        if now > times.sunset {
            tracing::debug!("After sunset");
            Ok(self.dim_level())
        } else if now < times.sunrise {
            tracing::debug!("Before sunrise");
            Ok(self.dim_level())
        } else {
            Ok(self.full)
        }
    }

    /// Send the current level to the display. Returns `false` once the
    /// display is gone.
    pub fn tick(&self, now: DateTime<Utc>) -> bool {
        match self.level_at(now) {
            Ok(level) => self.display.send(DisplayCommand::Brightness(level)).is_ok(),
            Err(e) => {
                tracing::error!("Skipping brightness update: {}", e);
                true
            }
        }
    }

    /// Tick immediately, then every `period`, until `stop` fires.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    if !self.tick(Utc::now()) {
                        tracing::warn!("Display closed, dimmer exiting");
                        break;
                    }
                }
            }
        }

        tracing::info!("Dimmer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::mpsc;

    fn sfo() -> Location {
        Location {
            latitude: 37.62,
            longitude: -122.38,
            timezone: "America/Los_Angeles".to_string(),
        }
    }

    fn controller(location: Location) -> (BrightnessController, mpsc::Receiver<DisplayCommand>) {
        let (tx, rx) = mpsc::channel();
        (BrightnessController::new(location, 200, tx, Duration::from_secs(10)), rx)
    }

    #[rstest]
    // 13:00 PDT
    #[case("2024-06-21T20:00:00Z", 200)]
    // 03:00 PDT, before sunrise
    #[case("2024-06-21T10:00:00Z", 100)]
    // 22:00 PDT, after sunset
    #[case("2024-06-22T05:00:00Z", 100)]
    // 07:00 PST in winter
    #[case("2024-12-21T15:00:00Z", 100)]
    // 12:00 PST in winter
    #[case("2024-12-21T20:00:00Z", 200)]
    fn level_follows_the_sun(#[case] now: &str, #[case] expected: u8) {
        let (dimmer, _rx) = controller(sfo());
        assert_eq!(dimmer.level_at(now.parse().unwrap()), Ok(expected));
    }

    #[test]
    fn dim_level_is_half_of_full() {
        let (dimmer, _rx) = controller(sfo());
        assert_eq!(dimmer.dim_level(), 100);
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let (dimmer, _rx) = controller(Location {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..sfo()
        });

        assert_eq!(
            dimmer.level_at(Utc::now()),
            Err(SunError::UnknownTimezone("Mars/Olympus_Mons".to_string()))
        );
    }

    #[test]
    fn failed_cycle_emits_nothing() {
        let (dimmer, rx) = controller(Location {
            latitude: 78.22,
            longitude: 15.65,
            timezone: "Arctic/Longyearbyen".to_string(),
        });

        assert!(dimmer.tick("2024-06-21T12:00:00Z".parse().unwrap()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tick_sends_brightness() {
        let (dimmer, rx) = controller(sfo());

        assert!(dimmer.tick("2024-06-21T20:00:00Z".parse().unwrap()));
        assert_eq!(rx.try_recv().unwrap(), DisplayCommand::Brightness(200));
    }

    #[test]
    fn tick_reports_closed_display() {
        let (dimmer, rx) = controller(sfo());
        drop(rx);
        assert!(!dimmer.tick("2024-06-21T20:00:00Z".parse().unwrap()));
    }

    #[tokio::test]
    async fn run_ticks_immediately_and_stops() {
        let (dimmer, rx) = controller(sfo());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(dimmer.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert!(matches!(rx.try_recv(), Ok(DisplayCommand::Brightness(_))));
    }
}

//! Sunrise and sunset times (NOAA "Almanac for Computers" method).
//!
//! Official sunrise/sunset uses a zenith of 90.833°, which accounts for
//! refraction and the size of the solar disc. Results are UTC instants
//! placed on the *local* calendar day of the given timezone.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};

const ZENITH_DEG: f64 = 90.833;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

fn sin_deg(x: f64) -> f64 {
    x.to_radians().sin()
}

fn cos_deg(x: f64) -> f64 {
    x.to_radians().cos()
}

fn tan_deg(x: f64) -> f64 {
    x.to_radians().tan()
}

/// Normalize into `[0, max)`.
fn wrap(x: f64, max: f64) -> f64 {
    x.rem_euclid(max)
}

#[derive(Clone, Copy)]
enum Event {
    Rise,
    Set,
}

/// Event time in UT hours `[0, 24)`, or `None` when the sun does not rise
/// or set at all on that day (polar day/night).
fn event_ut_hours(lat: f64, lon: f64, day_of_year: u32, event: Event) -> Option<f64> {
    let lng_hour = lon / 15.0;
    let approx = match event {
        Event::Rise => 6.0,
        Event::Set => 18.0,
    };
    let t = day_of_year as f64 + (approx - lng_hour) / 24.0;

    // Mean anomaly and true longitude.
    let m = 0.9856 * t - 3.289;
    let l = wrap(m + 1.916 * sin_deg(m) + 0.020 * sin_deg(2.0 * m) + 282.634, 360.0);

    // Right ascension, in the same quadrant as L, in hours.
    let ra = wrap((0.91764 * tan_deg(l)).atan().to_degrees(), 360.0);
    let ra = (ra + (l / 90.0).floor() * 90.0 - (ra / 90.0).floor() * 90.0) / 15.0;

    let sin_dec = 0.39782 * sin_deg(l);
    let cos_dec = (1.0 - sin_dec * sin_dec).sqrt();

    let cos_h = (cos_deg(ZENITH_DEG) - sin_dec * sin_deg(lat)) / (cos_dec * cos_deg(lat));
    if !(-1.0..=1.0).contains(&cos_h) {
        return None;
    }

    let h = match event {
        Event::Rise => 360.0 - cos_h.acos().to_degrees(),
        Event::Set => cos_h.acos().to_degrees(),
    } / 15.0;

    let local_mean = h + ra - 0.06571 * t - 6.622;
    Some(wrap(local_mean - lng_hour, 24.0))
}

/// Place `ut_hours` on `date` (UTC), then shift by a day if needed so the
/// instant falls on `date` in `tz`.
fn on_local_day<Tz: TimeZone>(date: NaiveDate, ut_hours: f64, tz: &Tz) -> Option<DateTime<Utc>> {
    let seconds = (ut_hours * 3600.0).round() as i64;
    let instant = date.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::seconds(seconds);

    let local_date = instant.with_timezone(tz).date_naive();
    if local_date < date {
        instant.checked_add_days(Days::new(1))
    } else if local_date > date {
        instant.checked_sub_days(Days::new(1))
    } else {
        Some(instant)
    }
}

/// Sunrise and sunset for `date` as seen in `tz`.
///
/// Returns `None` on days without a sunrise or without a sunset.
pub fn sun_times<Tz: TimeZone>(lat: f64, lon: f64, date: NaiveDate, tz: &Tz) -> Option<SunTimes> {
    use chrono::Datelike;

    let day = date.ordinal();
    let rise = event_ut_hours(lat, lon, day, Event::Rise)?;
    let set = event_ut_hours(lat, lon, day, Event::Set)?;

    Some(SunTimes {
        sunrise: on_local_day(date, rise, tz)?,
        sunset: on_local_day(date, set, tz)?,
    })
}

//! Solar time collaborator interface
//!
//! The sunrise/sunset/solar-noon time specs ask an external astronomical
//! component for the local `(hour, minute)` of the event on a given date.
//! The computation itself is outside the core; schedules degrade to
//! "unreachable" when no calculator is configured or the event does not
//! occur (polar day/night).

use chrono::NaiveDate;

/// Geographic location the solar calculator works from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

/// Provider of local solar event times.
pub trait SolarTimes {
    /// Local time of sunrise on `date`, if the sun rises at all.
    fn sunrise(&self, date: NaiveDate) -> Option<(u8, u8)>;

    /// Local time of sunset on `date`.
    fn sunset(&self, date: NaiveDate) -> Option<(u8, u8)>;

    /// Local time of solar noon on `date`.
    fn noon(&self, date: NaiveDate) -> Option<(u8, u8)>;
}

//! Civil time → local solar time and hour angle.
//!
//! Every function here is pure: results depend only on the arguments.

use chrono::{NaiveDateTime, TimeDelta, Timelike};

use crate::errors::{Result, SimError};
use crate::models::location::{CivilInstant, Location};

/// Local Standard Time Meridian (degrees): 15° per hour of UTC offset.
pub fn local_standard_time_meridian(instant: &CivilInstant) -> f64 {
    15.0 * instant.offset_hours()
}

/// Equation of time (minutes) for a day of year, fractional days allowed.
pub fn equation_of_time_for_day(day: f64) -> f64 {
    let b = (360.0 / 365.0 * (day - 81.0)).to_radians();
    9.87 * (2.0 * b).sin() - 7.53 * (2.0 * b).cos() - 1.5 * b
}

/// Equation of time (minutes) at the instant's local date.
pub fn equation_of_time(instant: &CivilInstant) -> f64 {
    equation_of_time_for_day(instant.day_of_year() as f64)
}

/// Time correction factor (minutes): 4 min per degree between the site and its
/// zone meridian, plus the equation of time.
pub fn time_correction_factor(location: &Location, instant: &CivilInstant) -> f64 {
    4.0 * (location.longitude() - local_standard_time_meridian(instant)) + equation_of_time(instant)
}

/// Civil clock reading shifted by the time correction factor.
pub fn local_solar_time(location: &Location, instant: &CivilInstant) -> Result<NaiveDateTime> {
    let tc_min = time_correction_factor(location, instant);
    let shift = TimeDelta::microseconds((tc_min * 60.0e6).round() as i64);
    instant.local().checked_add_signed(shift).ok_or_else(|| {
        SimError::InvalidTimeInput(format!(
            "solar time for {} overflows the calendar",
            instant.local()
        ))
    })
}

/// Hour angle (degrees): negative before solar noon, positive after.
pub fn hour_angle(location: &Location, instant: &CivilInstant) -> Result<f64> {
    let lst = local_solar_time(location, instant)?;
    Ok(15.0 * (fractional_hour(&lst) - 12.0))
}

fn fractional_hour(t: &NaiveDateTime) -> f64 {
    t.hour() as f64
        + t.minute() as f64 / 60.0
        + (t.second() as f64 + t.nanosecond() as f64 / 1e9) / 3600.0
}

/// ============================================================
///  Solar geometry for a fixed location
///
///   1. Declination   – from day of year
///   2. Hour angle    – from local solar time (see time_converter)
///   3. Elevation     – asin of the standard spherical relation
///   4. Azimuth       – acos form, mirrored to 360 − az after solar noon
///
///  Azimuth is measured clockwise from North (N = 0°, E = 90°).
/// ============================================================

use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::{Result, SimError};
use crate::models::location::{CivilInstant, Location};
use crate::services::time_converter;

// ─── Numeric guards ──────────────────────────────────────────
/// Rounding drift tolerated past ±1 before an inverse-trig argument is rejected.
const DOMAIN_TOLERANCE: f64 = 1e-6;
/// sin(elevation) this close to ±1 puts the sun at zenith or nadir, where
/// azimuth is undefined.
const ZENITH_EPS: f64 = 1e-12;

// ─── Public output ───────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SolarPosition {
    pub declination_deg: f64,
    /// Above horizon when positive
    pub elevation_deg: f64,
    /// [0, 360)
    pub azimuth_deg: f64,
    pub hour_angle_deg: f64,
}

impl SolarPosition {
    pub fn is_above_horizon(&self) -> bool {
        self.elevation_deg > 0.0
    }
}

/// Declination (degrees) for a day of year, fractional days allowed.
pub fn declination_for_day(day: f64) -> f64 {
    23.45 * (360.0 / 365.0 * (day - 81.0)).to_radians().sin()
}

/// Declination (degrees) at the instant's local date.
pub fn declination(instant: &CivilInstant) -> f64 {
    declination_for_day(instant.day_of_year() as f64)
}

/// Sun position for a location and civil instant.
pub fn sun_position(location: &Location, instant: &CivilInstant) -> Result<SolarPosition> {
    let hra = time_converter::hour_angle(location, instant)?;
    position_from_angles(declination(instant), location.latitude(), hra)
}

/// Elevation and azimuth from declination, latitude and hour angle (all degrees).
pub fn position_from_angles(
    declination_deg: f64,
    latitude_deg: f64,
    hour_angle_deg: f64,
) -> Result<SolarPosition> {
    let decl = declination_deg.to_radians();
    let lat = latitude_deg.to_radians();
    let hra = hour_angle_deg.to_radians();

    let sin_elev = clamp_unit(
        "elevation",
        decl.sin() * lat.sin() + decl.cos() * lat.cos() * hra.cos(),
    )?;
    let elev = sin_elev.asin();

    if 1.0 - sin_elev.abs() < ZENITH_EPS {
        return Err(SimError::Domain {
            quantity: "azimuth at zenith",
            value: sin_elev,
        });
    }
    let cos_az = clamp_unit(
        "azimuth",
        (decl.sin() * lat.cos() - decl.cos() * lat.sin() * hra.cos()) / elev.cos(),
    )?;
    let az_morning = cos_az.acos().to_degrees();

    // acos only covers the morning half; mirror once the sun passes the meridian
    let azimuth = if hour_angle_deg > 0.0 {
        360.0 - az_morning
    } else {
        az_morning
    };

    Ok(SolarPosition {
        declination_deg,
        elevation_deg: elev.to_degrees(),
        azimuth_deg: azimuth.rem_euclid(360.0),
        hour_angle_deg,
    })
}

fn clamp_unit(quantity: &'static str, value: f64) -> Result<f64> {
    if !value.is_finite() || value.abs() > 1.0 + DOMAIN_TOLERANCE {
        return Err(SimError::Domain { quantity, value });
    }
    Ok(value.clamp(-1.0, 1.0))
}

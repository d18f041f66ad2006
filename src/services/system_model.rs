use async_trait::async_trait;

use crate::errors::{Result, SimError};
use crate::models::location::Location;
use crate::models::samples::WeatherSample;
use crate::services::expectation_pipeline::SystemModel;
use crate::services::solar_geometry::{self, SolarPosition};

/// Temperature coefficient of c-Si power (1/°C)
const ALPHA_TEMP: f64 = -0.004;
/// Nominal Operating Cell Temperature (°C)
const NOCT: f64 = 45.0;
/// Floor on sin(elevation) so the horizontal→tilted projection stays bounded at dawn/dusk.
const MIN_SIN_ELEVATION: f64 = 0.087; // ≈ sin 5°

/// Fixed-tilt PV array anchored at a location.
#[derive(Debug, Clone)]
pub struct FixedTiltArray {
    pub location: Location,
    pub nominal_power_kw: f64,
    /// Panel inclination from horizontal (deg)
    pub tilt_deg: f64,
    /// Direction the panel faces, clockwise from North (deg)
    pub surface_azimuth_deg: f64,
}

impl FixedTiltArray {
    /// Horizontal irradiance projected onto the panel plane (beam geometry only).
    fn plane_of_array(&self, ghi_w_m2: f64, sun: &SolarPosition) -> f64 {
        let alpha = sun.elevation_deg.to_radians();
        let tilt = self.tilt_deg.to_radians();
        let az_diff = (sun.azimuth_deg - self.surface_azimuth_deg).to_radians();

        let cos_theta =
            (alpha.sin() * tilt.cos() + alpha.cos() * tilt.sin() * az_diff.cos()).max(0.0);
        ghi_w_m2 * cos_theta / alpha.sin().max(MIN_SIN_ELEVATION)
    }

    /// Expected DC output for the given irradiance at the given sun position.
    pub fn power_kw(&self, ghi_w_m2: f64, ambient_temp_c: f64, sun: &SolarPosition) -> f64 {
        if !sun.is_above_horizon() || ghi_w_m2 <= 0.0 {
            return 0.0;
        }
        let poa = self.plane_of_array(ghi_w_m2, sun);
        let cell_temp_c = estimate_cell_temperature(ambient_temp_c, poa);
        estimate_power_kw_from_radiation(poa, self.nominal_power_kw, cell_temp_c)
    }
}

fn estimate_power_kw_from_radiation(g_w_m2: f64, nominal_power_kw: f64, cell_temp_c: f64) -> f64 {
    // P = P_nom * (G / 1000) * [1 + alpha * (T_cell - 25)]
    let temp_factor = 1.0 + ALPHA_TEMP * (cell_temp_c - 25.0);
    (nominal_power_kw * (g_w_m2 / 1000.0) * temp_factor).max(0.0)
}

fn estimate_cell_temperature(ambient_temp_c: f64, g_w_m2: f64) -> f64 {
    // T_cell = T_ambient + (NOCT - 20) * (G / 800)
    ambient_temp_c + (NOCT - 20.0) * (g_w_m2 / 800.0)
}

#[async_trait]
impl SystemModel for FixedTiltArray {
    async fn expect(&self, weather: &WeatherSample) -> Result<f64> {
        let ghi = weather
            .irradiance_w_m2
            .ok_or_else(|| SimError::Model("weather sample has no irradiance".to_string()))?;
        let ambient = weather
            .ambient_temp_c
            .ok_or_else(|| SimError::Model("weather sample has no ambient temperature".to_string()))?;
        let sun = solar_geometry::sun_position(&self.location, &weather.timestamp)
            .map_err(|e| SimError::Model(format!("sun position unavailable: {}", e)))?;
        Ok(self.power_kw(ghi, ambient, &sun))
    }
}

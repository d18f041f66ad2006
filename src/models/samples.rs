use serde::{Deserialize, Serialize};

use crate::models::location::CivilInstant;

// ─── Collaborator samples ────────────────────────────────────────────────────

/// One weather reading. The pipeline only carries it to the system model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: CivilInstant,
    /// Global horizontal irradiance (W/m²)
    pub irradiance_w_m2: Option<f64>,
    /// Ambient 2 m temperature (°C)
    pub ambient_temp_c: Option<f64>,
    pub weather_code: Option<u16>,
    pub is_day: Option<bool>,
}

/// One reading of the real installation's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub timestamp: CivilInstant,
    /// AC active power (kW)
    pub power_kw: f64,
}

// ─── Open-Meteo wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CurrentWeatherResponse {
    pub utc_offset_seconds: i32,
    pub current: CurrentData,
}

#[derive(Debug, Deserialize)]
pub struct CurrentData {
    pub time: String,
    pub shortwave_radiation: Option<f64>,
    pub temperature_2m: Option<f64>,
    pub weather_code: Option<u16>,
    pub is_day: Option<u8>,
}

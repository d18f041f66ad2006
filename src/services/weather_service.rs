use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDateTime};
use reqwest::Client;
use tracing::debug;

use crate::errors::{Result, SimError};
use crate::models::location::{CivilInstant, Location};
use crate::models::samples::{CurrentWeatherResponse, WeatherSample};
use crate::services::expectation_pipeline::WeatherSource;

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Current conditions from Open-Meteo.
pub struct OpenMeteoWeather {
    client: Client,
    base_url: String,
    location: Location,
    timezone: String,
}

impl OpenMeteoWeather {
    pub fn new(location: Location, timezone: &str, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SimError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            location,
            timezone: timezone.to_string(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}?latitude={}&longitude={}&current=shortwave_radiation,temperature_2m,weather_code,is_day&timezone={}",
            self.base_url,
            self.location.latitude(),
            self.location.longitude(),
            self.timezone
        )
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoWeather {
    async fn update(&mut self) -> Result<WeatherSample> {
        let url = self.url();
        debug!("Fetching current weather from {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SimError::SourceUnavailable(format!("weather request failed: {}", e)))?
            .json::<CurrentWeatherResponse>()
            .await
            .map_err(|e| SimError::SourceUnavailable(format!("weather payload invalid: {}", e)))?;

        into_sample(resp)
    }
}

/// Open-Meteo reports `current.time` as a naive local reading ("2025-12-28T10:40")
/// next to the zone's `utc_offset_seconds`.
fn into_sample(resp: CurrentWeatherResponse) -> Result<WeatherSample> {
    let local = NaiveDateTime::parse_from_str(&resp.current.time, "%Y-%m-%dT%H:%M").map_err(|e| {
        SimError::SourceUnavailable(format!("weather time '{}' invalid: {}", resp.current.time, e))
    })?;
    let offset = FixedOffset::east_opt(resp.utc_offset_seconds).ok_or_else(|| {
        SimError::SourceUnavailable(format!("weather offset {}s invalid", resp.utc_offset_seconds))
    })?;
    let timestamp = CivilInstant::resolve(local, Some(offset), None)
        .map_err(|e| SimError::SourceUnavailable(e.to_string()))?;

    let irradiance = resp
        .current
        .shortwave_radiation
        .ok_or_else(|| SimError::SourceUnavailable("weather sample has no radiation".to_string()))?;

    Ok(WeatherSample {
        timestamp,
        irradiance_w_m2: Some(irradiance),
        ambient_temp_c: resp.current.temperature_2m,
        weather_code: resp.current.weather_code,
        is_day: resp.current.is_day.map(|d| d == 1),
    })
}

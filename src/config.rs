use std::net::{SocketAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{Result, SimError};
use crate::models::location::Location;
use crate::models::tracking::Lookback;

fn default_step_interval_s() -> u64 { 60 }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_history_limit() -> usize { 288 }
fn default_realtime() -> bool { true }
fn default_unit_id() -> u8 { 1 }
fn default_modbus_port() -> u16 { 502 }

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    pub plants: Vec<PlantConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub lookback: LookbackConfig,
    #[serde(default = "default_step_interval_s")]
    pub step_interval_s: u64,
    /// Upper bound on each weather/measurement/model call
    #[serde(default)]
    pub collaborator_timeout_s: Option<u64>,
    /// false = replay recorded samples back-to-back
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Recent records kept in shared state for the API
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// `"unbounded"`, `{"count": N}` or `{"minutes": M}`
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookbackConfig {
    Unbounded,
    Count(usize),
    Minutes(u32),
}

impl LookbackConfig {
    pub fn to_lookback(self) -> Result<Lookback> {
        match self {
            LookbackConfig::Unbounded => Ok(Lookback::Unbounded),
            LookbackConfig::Count(n) => NonZeroUsize::new(n)
                .map(Lookback::Count)
                .ok_or_else(|| SimError::Config("lookback count must be at least 1".to_string())),
            LookbackConfig::Minutes(0) => {
                Err(SimError::Config("lookback minutes must be at least 1".to_string()))
            }
            LookbackConfig::Minutes(m) => Ok(Lookback::Duration(TimeDelta::minutes(m as i64))),
        }
    }
}

impl PipelineConfig {
    /// Settings that make no sense regardless of the plants.
    pub fn validate(&self) -> Result<()> {
        self.lookback.to_lookback()?;
        if self.collaborator_timeout_s == Some(0) {
            return Err(SimError::Config(
                "collaborator_timeout_s must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Back-to-back stepping only terminates on sources that run dry.
    pub fn check_mode(&self, plant: &PlantConfig) -> Result<()> {
        if !self.realtime && !plant.is_replay() {
            return Err(SimError::Config(format!(
                "plant {}: realtime=false requires replay weather and measurement sources",
                plant.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    #[serde(default)]
    pub client_id: String,
    pub topic_prefix: String,
    pub publish_interval_s: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, ToSchema)]
pub struct PlantConfig {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// IANA zone name, e.g. "Europe/Rome"
    pub timezone: String,
    pub nominal_power_kw: f64,
    pub tilt_deg: f64,
    /// Clockwise from North; 180 = south-facing
    pub surface_azimuth_deg: f64,
    pub weather: WeatherConfig,
    pub measurement: MeasurementConfig,
}

impl PlantConfig {
    pub fn location(&self) -> Result<Location> {
        Location::new(self.latitude, self.longitude)
    }

    /// Both sources replay recorded files.
    pub fn is_replay(&self) -> bool {
        matches!(self.weather, WeatherConfig::Replay { .. })
            && matches!(self.measurement, MeasurementConfig::Replay { .. })
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            SimError::Config(format!("plant {}: unknown timezone '{}'", self.id, self.timezone))
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeatherConfig {
    OpenMeteo {
        #[serde(default)]
        base_url: Option<String>,
    },
    Replay {
        #[schema(value_type = String)]
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementConfig {
    Modbus {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
        #[serde(default = "default_unit_id")]
        unit_id: u8,
        /// High word of the float32 AC power register
        power_register: u16,
    },
    Replay {
        #[schema(value_type = String)]
        path: PathBuf,
    },
}

impl MeasurementConfig {
    /// Resolves the Modbus endpoint, `None` for replay.
    pub fn socket_addr(&self) -> Result<Option<SocketAddr>> {
        match self {
            MeasurementConfig::Modbus { host, port, .. } => (host.as_str(), *port)
                .to_socket_addrs()
                .map_err(|e| SimError::Config(format!("cannot resolve {}:{}: {}", host, port, e)))?
                .next()
                .map(Some)
                .ok_or_else(|| SimError::Config(format!("no address for {}:{}", host, port))),
            MeasurementConfig::Replay { .. } => Ok(None),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("cannot read {}: {}", path, e)))?;
        let config = Self::parse(&content)?;
        Ok(config)
    }

    /// Parses and checks plants eagerly so bad input fails at start-up.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| SimError::Config(format!("invalid configuration: {}", e)))?;
        config.pipeline.validate()?;
        for plant in &config.plants {
            config.pipeline.check_mode(plant)?;
            plant.location()?;
            plant.tz()?;
            if !(plant.nominal_power_kw.is_finite() && plant.nominal_power_kw > 0.0) {
                return Err(SimError::Config(format!(
                    "plant {}: nominal_power_kw must be positive",
                    plant.id
                )));
            }
        }
        Ok(config)
    }
}

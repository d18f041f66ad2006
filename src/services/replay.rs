//! Recorded samples served back in order, for batch runs and tests.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::errors::{Result, SimError};
use crate::models::samples::{MeasurementSample, WeatherSample};
use crate::services::expectation_pipeline::{MeasurementSource, WeatherSource};

pub struct ReplayQueue<T> {
    name: String,
    samples: VecDeque<T>,
}

impl<T: DeserializeOwned> ReplayQueue<T> {
    /// Reads a JSON array of samples.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimError::Config(format!("cannot read replay file {}: {}", path.display(), e))
        })?;
        let samples: Vec<T> = serde_json::from_str(&content).map_err(|e| {
            SimError::Config(format!("invalid replay file {}: {}", path.display(), e))
        })?;
        Ok(Self::from_samples(path.display().to_string(), samples))
    }
}

impl<T> ReplayQueue<T> {
    pub fn from_samples(name: impl Into<String>, samples: Vec<T>) -> Self {
        Self {
            name: name.into(),
            samples: samples.into(),
        }
    }

    fn next(&mut self) -> Result<T> {
        self.samples
            .pop_front()
            .ok_or_else(|| SimError::SourceUnavailable(format!("replay {} exhausted", self.name)))
    }
}

pub type ReplayWeather = ReplayQueue<WeatherSample>;
pub type ReplayMeasurement = ReplayQueue<MeasurementSample>;

#[async_trait]
impl WeatherSource for ReplayWeather {
    async fn update(&mut self) -> Result<WeatherSample> {
        self.next()
    }

    fn exhausted(&self) -> bool {
        self.samples.is_empty()
    }
}

#[async_trait]
impl MeasurementSource for ReplayMeasurement {
    async fn update(&mut self) -> Result<MeasurementSample> {
        self.next()
    }

    fn exhausted(&self) -> bool {
        self.samples.is_empty()
    }
}

//! Drives one plant's pipeline: builds its collaborators from configuration,
//! steps it on a clock tick (realtime) or back-to-back (replay), and saves the
//! retained records when the run ends.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{MeasurementConfig, PipelineConfig, PlantConfig, WeatherConfig};
use crate::errors::{Result, SimError};
use crate::services::expectation_pipeline::{
    ExpectationPipeline, MeasurementSource, Storage, WeatherSource,
};
use crate::services::measurement_service::ModbusMeasurement;
use crate::services::replay::{ReplayMeasurement, ReplayWeather};
use crate::services::system_model::FixedTiltArray;
use crate::services::weather_service::OpenMeteoWeather;
use crate::shared_state::AppState;

fn weather_source(plant: &PlantConfig) -> Result<Box<dyn WeatherSource>> {
    Ok(match &plant.weather {
        WeatherConfig::OpenMeteo { base_url } => Box::new(OpenMeteoWeather::new(
            plant.location()?,
            &plant.timezone,
            base_url.clone(),
        )?),
        WeatherConfig::Replay { path } => Box::new(ReplayWeather::from_file(path)?),
    })
}

fn measurement_source(plant: &PlantConfig) -> Result<Box<dyn MeasurementSource>> {
    Ok(match &plant.measurement {
        MeasurementConfig::Modbus { unit_id, power_register, .. } => {
            let addr = plant
                .measurement
                .socket_addr()?
                .ok_or_else(|| SimError::Config(format!("plant {}: no Modbus address", plant.id)))?;
            Box::new(ModbusMeasurement::new(addr, *unit_id, *power_register))
        }
        MeasurementConfig::Replay { path } => Box::new(ReplayMeasurement::from_file(path)?),
    })
}

/// Wire one plant's collaborators into a fresh pipeline.
pub fn build_pipeline(plant: &PlantConfig, settings: &PipelineConfig) -> Result<ExpectationPipeline> {
    settings.validate()?;
    settings.check_mode(plant)?;
    let model = FixedTiltArray {
        location: plant.location()?,
        nominal_power_kw: plant.nominal_power_kw,
        tilt_deg: plant.tilt_deg,
        surface_azimuth_deg: plant.surface_azimuth_deg,
    };
    let pipeline = ExpectationPipeline::new(
        weather_source(plant)?,
        measurement_source(plant)?,
        model,
        settings.lookback.to_lookback()?,
        settings.realtime,
    );
    Ok(match settings.collaborator_timeout_s {
        Some(s) => pipeline.with_collaborator_timeout(Duration::from_secs(s)),
        None => pipeline,
    })
}

pub fn output_path(settings: &PipelineConfig, plant_id: &str) -> PathBuf {
    settings.output_dir.join(format!("{}.json", plant_id))
}

/// One step, mirrored into shared state. Failures are logged and skipped.
async fn step_once(pipeline: &mut ExpectationPipeline, plant_id: &str, state: &AppState, history_limit: usize) {
    match pipeline.step().await {
        Ok(outcome) => {
            #[cfg(feature = "verbose_log")]
            info!(
                "[TRACKING] Plant: {} | Expected: {:.2} kW | Measured: {:.2} kW | Diff: {:+.2} kW | MAE: {:.3} kW",
                plant_id,
                outcome.record.expected,
                outcome.record.measured,
                outcome.record.difference,
                outcome.summary.mean_absolute_error
            );
            state.record_step(plant_id, &outcome, pipeline.state(), history_limit);
        }
        Err(e) => {
            warn!("Step failed for plant {}: {}", plant_id, e);
            state.record_failure(plant_id, &e, pipeline.state());
        }
    }
}

/// Run until shutdown or until a source runs dry, then close the pipeline and
/// persist its records.
pub async fn run(
    mut pipeline: ExpectationPipeline,
    plant_id: String,
    settings: PipelineConfig,
    state: AppState,
    storage: impl Storage,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    state.register(&plant_id, pipeline.id(), pipeline.is_realtime(), pipeline.lookback());
    info!(
        "Driving plant {} (pipeline {}, {})",
        plant_id,
        pipeline.id(),
        if pipeline.is_realtime() { "realtime" } else { "replay" }
    );

    if pipeline.is_realtime() {
        let mut ticker = tokio::time::interval(Duration::from_secs(settings.step_interval_s.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    step_once(&mut pipeline, &plant_id, &state, settings.history_limit).await;
                    if pipeline.sources_exhausted() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    } else {
        while !pipeline.sources_exhausted() {
            if *shutdown.borrow() {
                break;
            }
            step_once(&mut pipeline, &plant_id, &state, settings.history_limit).await;
            tokio::task::yield_now().await;
        }
        debug!("Replay for plant {} finished", plant_id);
    }

    pipeline.close();
    state.set_state(&plant_id, pipeline.state());
    if let Some(summary) = pipeline.summary() {
        info!(
            "Plant {} final tracking over {} records: MAE {:.3} kW, bias {:+.3} kW",
            plant_id, summary.samples, summary.mean_absolute_error, summary.mean_signed_error
        );
    }
    pipeline.save(&storage, &output_path(&settings, &plant_id)).await
}

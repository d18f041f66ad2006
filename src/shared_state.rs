use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use axum::extract::FromRef;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::SimError;
use crate::models::tracking::{Lookback, PipelineState, PlantTracking};
use crate::services::expectation_pipeline::StepOutcome;

#[derive(Clone, Debug, Default)]
pub struct AppState {
    /// Map of plant_id to the latest tracking snapshot
    pub plants: Arc<RwLock<HashMap<String, PlantTracking>>>,
    pub mqtt_connected: Arc<AtomicBool>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plant_id: &str, pipeline_id: Uuid, realtime: bool, lookback: Lookback) {
        if let Ok(mut map) = self.plants.write() {
            map.insert(
                plant_id.to_string(),
                PlantTracking::new(plant_id, pipeline_id, realtime, lookback),
            );
        }
    }

    pub fn record_step(&self, plant_id: &str, outcome: &StepOutcome, state: PipelineState, history_limit: usize) {
        if let Ok(mut map) = self.plants.write() {
            let Some(entry) = map.get_mut(plant_id) else {
                warn!("Step for unregistered plant {}", plant_id);
                return;
            };
            entry.state = state;
            entry.steps_ok += 1;
            entry.summary = Some(outcome.summary.clone());
            entry.last_record = Some(outcome.record.clone());
            entry.recent.push(outcome.record.clone());
            if entry.recent.len() > history_limit {
                let excess = entry.recent.len() - history_limit;
                entry.recent.drain(..excess);
            }
            entry.last_error = None;
        }
    }

    pub fn record_failure(&self, plant_id: &str, error: &SimError, state: PipelineState) {
        if let Ok(mut map) = self.plants.write() {
            if let Some(entry) = map.get_mut(plant_id) {
                entry.state = state;
                entry.steps_failed += 1;
                entry.last_error = Some(error.to_string());
            }
        }
    }

    pub fn set_state(&self, plant_id: &str, state: PipelineState) {
        if let Ok(mut map) = self.plants.write() {
            if let Some(entry) = map.get_mut(plant_id) {
                entry.state = state;
            }
        }
    }

    pub fn get_data(&self, plant_id: &str) -> Option<PlantTracking> {
        self.plants.read().ok()?.get(plant_id).cloned()
    }

    pub fn get_all_data(&self) -> HashMap<String, PlantTracking> {
        if let Ok(map) = self.plants.read() {
            map.clone()
        } else {
            HashMap::new()
        }
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }
}

/// Router state; handlers extract `State<AppState>` or `State<Config>`.
#[derive(Clone)]
pub struct SharedState {
    pub app: AppState,
    pub config: Config,
}

impl FromRef<SharedState> for AppState {
    fn from_ref(shared: &SharedState) -> Self {
        shared.app.clone()
    }
}

impl FromRef<SharedState> for Config {
    fn from_ref(shared: &SharedState) -> Self {
        shared.config.clone()
    }
}

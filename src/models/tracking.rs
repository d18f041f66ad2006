use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;

use chrono::{DateTime, FixedOffset, TimeDelta};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{Result, SimError};
use crate::services::solar_geometry::SolarPosition;

// ─── Pipeline lifecycle ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    Running,
    Closed,
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Output of one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingRecord {
    pub timestamp: DateTime<FixedOffset>,
    /// Modeled output (kW)
    pub expected: f64,
    /// Measured output (kW)
    pub measured: f64,
    /// measured − expected (kW)
    pub difference: f64,
}

impl TrackingRecord {
    pub fn new(timestamp: DateTime<FixedOffset>, expected: f64, measured: f64) -> Self {
        Self {
            timestamp,
            expected,
            measured,
            difference: measured - expected,
        }
    }
}

/// Aggregate tracking error over the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingSummary {
    pub samples: usize,
    /// Mean of |difference|
    pub mean_absolute_error: f64,
    /// Mean of signed difference; positive means the plant beats the model
    pub mean_signed_error: f64,
    pub root_mean_square_error: f64,
    pub max_absolute_error: f64,
    pub window_start: DateTime<FixedOffset>,
    pub window_end: DateTime<FixedOffset>,
}

// ─── Per-plant snapshot for the API ──────────────────────────────────────────

/// Latest view of one plant's pipeline, refreshed by its driver after every step.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlantTracking {
    pub plant_id: String,
    pub pipeline_id: uuid::Uuid,
    pub realtime: bool,
    /// Human-readable lookback, e.g. "last 12 records"
    pub lookback: String,
    pub state: PipelineState,
    pub summary: Option<TrackingSummary>,
    pub last_record: Option<TrackingRecord>,
    /// Most recent records, oldest first
    pub recent: Vec<TrackingRecord>,
    pub steps_ok: u64,
    pub steps_failed: u64,
    pub last_error: Option<String>,
}

impl PlantTracking {
    pub fn new(plant_id: &str, pipeline_id: uuid::Uuid, realtime: bool, lookback: Lookback) -> Self {
        Self {
            plant_id: plant_id.to_string(),
            pipeline_id,
            realtime,
            lookback: lookback.to_string(),
            state: PipelineState::Idle,
            summary: None,
            last_record: None,
            recent: Vec::new(),
            steps_ok: 0,
            steps_failed: 0,
            last_error: None,
        }
    }
}

/// GET /api/plants/{id}/sun
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SunResponse {
    pub plant_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub position: SolarPosition,
}

/// GET /api/health
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub plants_total: usize,
    pub plants_running: usize,
    /// Plants whose latest step failed
    pub plants_failing: usize,
    pub mqtt_connected: bool,
}

// ─── Lookback window ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// Keep all history.
    Unbounded,
    /// Keep the N most recent records.
    Count(NonZeroUsize),
    /// Keep records no older than this, measured from the newest record.
    Duration(TimeDelta),
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Unbounded => write!(f, "unbounded"),
            Lookback::Count(n) => write!(f, "last {} records", n),
            Lookback::Duration(span) => write!(f, "last {} min", span.num_minutes()),
        }
    }
}

/// Result of appending one record to the window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowUpdate {
    pub evicted: usize,
    pub summary: TrackingSummary,
}

/// Records in timestamp order, over which the tracking error is computed.
#[derive(Debug, Clone)]
pub struct TrackingErrorWindow {
    lookback: Lookback,
    records: VecDeque<TrackingRecord>,
}

impl TrackingErrorWindow {
    pub fn new(lookback: Lookback) -> Self {
        Self {
            lookback,
            records: VecDeque::new(),
        }
    }

    pub fn lookback(&self) -> Lookback {
        self.lookback
    }

    /// Append and evict oldest-first until the lookback holds.
    ///
    /// A record older than the newest retained one is rejected and the window
    /// is left untouched; equal timestamps are accepted.
    pub fn push(&mut self, record: TrackingRecord) -> Result<WindowUpdate> {
        let newest = record.timestamp;
        if let Some(back) = self.records.back() {
            if newest < back.timestamp {
                return Err(SimError::InvalidTimeInput(format!(
                    "record at {} is older than the newest tracked record at {}",
                    newest, back.timestamp
                )));
            }
        }
        self.records.push_back(record);

        let mut evicted = 0;
        match self.lookback {
            Lookback::Unbounded => {}
            Lookback::Count(limit) => {
                while self.records.len() > limit.get() {
                    self.records.pop_front();
                    evicted += 1;
                }
            }
            Lookback::Duration(span) => {
                let cutoff = newest - span;
                // the record just pushed is never evicted
                while self.records.len() > 1
                    && self.records.front().is_some_and(|r| r.timestamp < cutoff)
                {
                    self.records.pop_front();
                    evicted += 1;
                }
            }
        }

        let window_start = self.records.front().map_or(newest, |r| r.timestamp);
        Ok(WindowUpdate {
            evicted,
            summary: aggregate(&self.records, window_start, newest),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &TrackingRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `None` until the first record arrives.
    pub fn summary(&self) -> Option<TrackingSummary> {
        if self.is_empty() {
            return None;
        }
        let first = self.records.front()?;
        let last = self.records.back()?;
        Some(aggregate(&self.records, first.timestamp, last.timestamp))
    }
}

fn aggregate(
    records: &VecDeque<TrackingRecord>,
    window_start: DateTime<FixedOffset>,
    window_end: DateTime<FixedOffset>,
) -> TrackingSummary {
    let n = records.len().max(1) as f64;
    let (abs_sum, signed_sum, sq_sum, max_abs) =
        records.iter().fold((0.0, 0.0, 0.0, 0.0_f64), |(a, s, q, m), r| {
            let d = r.difference;
            (a + d.abs(), s + d, q + d * d, m.max(d.abs()))
        });

    TrackingSummary {
        samples: records.len(),
        mean_absolute_error: abs_sum / n,
        mean_signed_error: signed_sum / n,
        root_mean_square_error: (sq_sum / n).sqrt(),
        max_absolute_error: max_abs,
        window_start,
        window_end,
    }
}

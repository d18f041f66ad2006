//! Streaming comparison of modeled against measured plant output.
//!
//! Each `step()` pulls one weather and one measurement sample, asks the system
//! model for an expectation, records `measured − expected` and returns the
//! tracking error over the lookback window. The pipeline never schedules
//! itself; a driver decides when to step, retry or stop.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{Result, SimError};
use crate::models::samples::{MeasurementSample, WeatherSample};
use crate::models::tracking::{
    Lookback, PipelineState, TrackingErrorWindow, TrackingRecord, TrackingSummary, WindowUpdate,
};

// ─── Collaborator capabilities ───────────────────────────────────────────────

#[async_trait]
pub trait WeatherSource: Send {
    /// Newest weather sample, or `SourceUnavailable`.
    async fn update(&mut self) -> Result<WeatherSample>;

    /// True once a finite source has nothing left to give.
    fn exhausted(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait MeasurementSource: Send {
    /// Newest measurement of the real plant, or `SourceUnavailable`.
    async fn update(&mut self) -> Result<MeasurementSample>;

    fn exhausted(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait SystemModel: Send + Sync {
    /// Expected output (kW) for the given weather, or `Model`.
    async fn expect(&self, weather: &WeatherSample) -> Result<f64>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, records: &[TrackingRecord], destination: &Path) -> Result<()>;
}

#[async_trait]
impl<T: WeatherSource + ?Sized> WeatherSource for Box<T> {
    async fn update(&mut self) -> Result<WeatherSample> {
        (**self).update().await
    }

    fn exhausted(&self) -> bool {
        (**self).exhausted()
    }
}

#[async_trait]
impl<T: MeasurementSource + ?Sized> MeasurementSource for Box<T> {
    async fn update(&mut self) -> Result<MeasurementSample> {
        (**self).update().await
    }

    fn exhausted(&self) -> bool {
        (**self).exhausted()
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Result of one successful step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub record: TrackingRecord,
    pub summary: TrackingSummary,
}

pub struct ExpectationPipeline {
    id: Uuid,
    realtime: bool,
    state: PipelineState,
    weather: Box<dyn WeatherSource>,
    measurement: Box<dyn MeasurementSource>,
    model: Box<dyn SystemModel>,
    window: TrackingErrorWindow,
    collaborator_timeout: Option<Duration>,
}

impl ExpectationPipeline {
    /// `realtime` only labels the run; stepping is identical in replay.
    pub fn new(
        weather: impl WeatherSource + 'static,
        measurement: impl MeasurementSource + 'static,
        model: impl SystemModel + 'static,
        lookback: Lookback,
        realtime: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            realtime,
            state: PipelineState::Idle,
            weather: Box::new(weather),
            measurement: Box::new(measurement),
            model: Box::new(model),
            window: TrackingErrorWindow::new(lookback),
            collaborator_timeout: None,
        }
    }

    /// Bound every collaborator call; an elapsed call fails the step.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn lookback(&self) -> Lookback {
        self.window.lookback()
    }

    /// Whether either source has run dry.
    pub fn sources_exhausted(&self) -> bool {
        self.weather.exhausted() || self.measurement.exhausted()
    }

    pub fn records(&self) -> Vec<TrackingRecord> {
        self.window.records().cloned().collect()
    }

    pub fn summary(&self) -> Option<TrackingSummary> {
        self.window.summary()
    }

    /// One simulation step. A failed step leaves the window untouched; a
    /// measurement older than the newest tracked one fails with `InvalidTimeInput`.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if self.state == PipelineState::Closed {
            return Err(SimError::PipelineClosed(self.id));
        }
        if self.state == PipelineState::Idle {
            info!(pipeline = %self.id, realtime = self.realtime, "pipeline running");
            self.state = PipelineState::Running;
        }

        let timeout = self.collaborator_timeout;
        let (weather, measured) = try_join(
            bounded(timeout, self.weather.update(), || {
                SimError::SourceUnavailable("weather source timed out".to_string())
            }),
            bounded(timeout, self.measurement.update(), || {
                SimError::SourceUnavailable("measurement source timed out".to_string())
            }),
        )
        .await?;

        let expected = bounded(timeout, self.model.expect(&weather), || {
            SimError::Model("system model timed out".to_string())
        })
        .await?;
        if !expected.is_finite() {
            return Err(SimError::Model(format!("non-finite expectation {}", expected)));
        }

        let record = TrackingRecord::new(measured.timestamp.as_fixed(), expected, measured.power_kw);
        let WindowUpdate { evicted, summary } = self.window.push(record.clone())?;

        debug!(
            pipeline = %self.id,
            expected = record.expected,
            measured = record.measured,
            difference = record.difference,
            evicted,
            mae = summary.mean_absolute_error,
            "step complete"
        );

        Ok(StepOutcome { record, summary })
    }

    /// Stop accepting steps. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state != PipelineState::Closed {
            info!(pipeline = %self.id, records = self.window.len(), "pipeline closed");
            self.state = PipelineState::Closed;
        }
    }

    /// Hand the retained records to a storage collaborator.
    ///
    /// Takes `&mut self`: the sources are `Send` but not `Sync`, and the
    /// returned future must be `Send`.
    pub async fn save(&mut self, storage: &dyn Storage, destination: &Path) -> Result<()> {
        let records = self.records();
        storage.save(&records, destination).await?;
        info!(
            pipeline = %self.id,
            records = records.len(),
            destination = %destination.display(),
            "tracking records saved"
        );
        Ok(())
    }
}

async fn bounded<T, F>(
    timeout: Option<Duration>,
    call: F,
    on_elapsed: impl FnOnce() -> SimError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| on_elapsed())?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::location::CivilInstant;
    use approx::assert_relative_eq;
    use chrono::TimeDelta;
    use std::collections::VecDeque;
    use std::num::NonZeroUsize;
    use std::sync::{Arc, Mutex};

    fn at(step: i64) -> CivilInstant {
        let base = CivilInstant::parse("2023-06-21T12:00:00-04:00").unwrap();
        CivilInstant::from(base.as_fixed() + TimeDelta::minutes(step))
    }

    struct StubWeather {
        step: i64,
        fail: bool,
    }

    #[async_trait]
    impl WeatherSource for StubWeather {
        async fn update(&mut self) -> Result<WeatherSample> {
            if self.fail {
                return Err(SimError::SourceUnavailable("stub offline".to_string()));
            }
            self.step += 1;
            Ok(WeatherSample {
                timestamp: at(self.step),
                irradiance_w_m2: Some(800.0),
                ambient_temp_c: Some(25.0),
                weather_code: None,
                is_day: Some(true),
            })
        }
    }

    struct QueuedMeasurement {
        readings: VecDeque<f64>,
        step: i64,
    }

    impl QueuedMeasurement {
        fn new(readings: &[f64]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                step: 0,
            }
        }
    }

    #[async_trait]
    impl MeasurementSource for QueuedMeasurement {
        async fn update(&mut self) -> Result<MeasurementSample> {
            self.step += 1;
            let power_kw = self
                .readings
                .pop_front()
                .ok_or_else(|| SimError::SourceUnavailable("queue empty".to_string()))?;
            Ok(MeasurementSample {
                timestamp: at(self.step),
                power_kw,
            })
        }

        fn exhausted(&self) -> bool {
            self.readings.is_empty()
        }
    }

    struct ConstantModel(f64);

    #[async_trait]
    impl SystemModel for ConstantModel {
        async fn expect(&self, _weather: &WeatherSample) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct FailingModel;

    #[async_trait]
    impl SystemModel for FailingModel {
        async fn expect(&self, _weather: &WeatherSample) -> Result<f64> {
            Err(SimError::Model("no topology".to_string()))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl SystemModel for SlowModel {
        async fn expect(&self, _weather: &WeatherSample) -> Result<f64> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(0.0)
        }
    }

    #[derive(Default)]
    struct MemoryStorage {
        saved: Arc<Mutex<Vec<(usize, String)>>>,
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        async fn save(&self, records: &[TrackingRecord], destination: &Path) -> Result<()> {
            self.saved
                .lock()
                .unwrap()
                .push((records.len(), destination.display().to_string()));
            Ok(())
        }
    }

    fn pipeline(readings: &[f64], lookback: Lookback) -> ExpectationPipeline {
        ExpectationPipeline::new(
            StubWeather { step: 0, fail: false },
            QueuedMeasurement::new(readings),
            ConstantModel(10.0),
            lookback,
            false,
        )
    }

    #[tokio::test]
    async fn test_windowed_tracking_error() {
        let lookback = Lookback::Count(NonZeroUsize::new(3).unwrap());
        let mut p = pipeline(&[11.0, 12.0, 13.0, 14.0, 15.0], lookback);
        let mut last = None;
        for _ in 0..5 {
            last = Some(p.step().await.unwrap());
        }
        let outcome = last.unwrap();
        assert_eq!(outcome.record.difference, 5.0);
        assert_eq!(outcome.summary.samples, 3);
        assert_relative_eq!(outcome.summary.mean_absolute_error, 4.0, epsilon = 1e-12);
        let kept: Vec<f64> = p.records().iter().map(|r| r.difference).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_unbounded_matches_full_history() {
        let readings = [9.0, 12.5, 7.0, 10.0, 13.0, 8.5];
        let mut p = pipeline(&readings, Lookback::Unbounded);
        for _ in 0..readings.len() {
            p.step().await.unwrap();
        }
        let diffs: Vec<f64> = readings.iter().map(|m| m - 10.0).collect();
        let s = p.summary().unwrap();
        assert_eq!(s.samples, readings.len());
        assert_relative_eq!(
            s.mean_absolute_error,
            diffs.iter().map(|d| d.abs()).sum::<f64>() / diffs.len() as f64,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            s.mean_signed_error,
            diffs.iter().sum::<f64>() / diffs.len() as f64,
            epsilon = 1e-12
        );
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let mut p = pipeline(&[10.0, 10.0], Lookback::Unbounded);
        assert_eq!(p.state(), PipelineState::Idle);
        p.step().await.unwrap();
        assert_eq!(p.state(), PipelineState::Running);
        p.step().await.unwrap();
        assert_eq!(p.state(), PipelineState::Running);
        p.close();
        assert_eq!(p.state(), PipelineState::Closed);
    }

    #[tokio::test]
    async fn test_step_after_close_fails_without_append() {
        let mut p = pipeline(&[11.0, 12.0], Lookback::Unbounded);
        p.step().await.unwrap();
        p.close();
        let err = p.step().await.unwrap_err();
        assert!(matches!(err, SimError::PipelineClosed(id) if id == p.id()));
        assert_eq!(p.records().len(), 1);
    }

    #[tokio::test]
    async fn test_close_from_idle() {
        let mut p = pipeline(&[11.0], Lookback::Unbounded);
        p.close();
        assert!(matches!(p.step().await, Err(SimError::PipelineClosed(_))));
        assert!(p.summary().is_none());
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let mut p = ExpectationPipeline::new(
            StubWeather { step: 0, fail: true },
            QueuedMeasurement::new(&[11.0]),
            ConstantModel(10.0),
            Lookback::Unbounded,
            true,
        );
        assert!(matches!(p.step().await, Err(SimError::SourceUnavailable(_))));
        assert!(p.records().is_empty());
        assert_eq!(p.state(), PipelineState::Running);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let mut p = ExpectationPipeline::new(
            StubWeather { step: 0, fail: false },
            QueuedMeasurement::new(&[11.0]),
            FailingModel,
            Lookback::Unbounded,
            false,
        );
        assert!(matches!(p.step().await, Err(SimError::Model(_))));
        assert!(p.summary().is_none());
    }

    #[tokio::test]
    async fn test_model_timeout_surfaces_as_model_error() {
        let mut p = ExpectationPipeline::new(
            StubWeather { step: 0, fail: false },
            QueuedMeasurement::new(&[11.0]),
            SlowModel,
            Lookback::Unbounded,
            true,
        )
        .with_collaborator_timeout(Duration::from_millis(20));
        assert!(matches!(p.step().await, Err(SimError::Model(_))));
        assert!(p.records().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_and_save() {
        let mut p = pipeline(&[11.0, 9.0], Lookback::Unbounded);
        assert!(!p.sources_exhausted());
        p.step().await.unwrap();
        p.step().await.unwrap();
        assert!(p.sources_exhausted());
        assert!(matches!(p.step().await, Err(SimError::SourceUnavailable(_))));

        let storage = MemoryStorage::default();
        p.save(&storage, Path::new("out/plant.json")).await.unwrap();
        let saved = storage.saved.lock().unwrap();
        assert_eq!(saved.as_slice(), &[(2, "out/plant.json".to_string())]);
    }

    #[tokio::test]
    async fn test_independent_pipelines() {
        let mut a = pipeline(&[20.0], Lookback::Unbounded);
        let mut b = pipeline(&[0.0], Lookback::Unbounded);
        a.step().await.unwrap();
        b.step().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.summary().unwrap().mean_signed_error, 10.0);
        assert_eq!(b.summary().unwrap().mean_signed_error, -10.0);
    }

    struct TimedMeasurement {
        steps: VecDeque<i64>,
    }

    #[async_trait]
    impl MeasurementSource for TimedMeasurement {
        async fn update(&mut self) -> Result<MeasurementSample> {
            let step = self
                .steps
                .pop_front()
                .ok_or_else(|| SimError::SourceUnavailable("no more readings".to_string()))?;
            Ok(MeasurementSample {
                timestamp: at(step),
                power_kw: 11.0,
            })
        }
    }

    #[tokio::test]
    async fn test_rewound_measurement_is_rejected() {
        let mut p = ExpectationPipeline::new(
            StubWeather { step: 0, fail: false },
            TimedMeasurement { steps: VecDeque::from([20, 5, 21]) },
            ConstantModel(10.0),
            Lookback::Duration(TimeDelta::minutes(10)),
            false,
        );
        assert_eq!(p.lookback(), Lookback::Duration(TimeDelta::minutes(10)));
        p.step().await.unwrap();
        assert!(matches!(p.step().await, Err(SimError::InvalidTimeInput(_))));
        let outcome = p.step().await.unwrap();
        assert_eq!(outcome.summary.samples, 2);
        assert_eq!(p.records().len(), 2);
        assert!(outcome.summary.window_start < outcome.summary.window_end);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_save_future_is_send() {
        let mut p = pipeline(&[11.0], Lookback::Unbounded);
        p.step().await.unwrap();
        let storage = MemoryStorage::default();
        let destination = Path::new("out/plant.json");
        let fut = p.save(&storage, destination);
        assert_send(&fut);
        fut.await.unwrap();
        assert_eq!(storage.saved.lock().unwrap().len(), 1);
    }
}

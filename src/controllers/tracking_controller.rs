use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::config::{Config, PlantConfig};
use crate::models::location::CivilInstant;
use crate::models::tracking::{HealthStatus, PipelineState, PlantTracking, SunResponse, TrackingRecord};
use crate::services::solar_geometry::sun_position;
use crate::shared_state::AppState;

fn not_found(what: &str) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": format!("{} not found", what) })))
        .into_response()
}

fn bad_request(message: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

/// GET /api/plants
/// List all configured plants
///
/// Returns every plant with its location, array geometry and the sources feeding its pipeline.
#[utoipa::path(
    get,
    path = "/api/plants",
    responses(
        (status = 200, description = "List of configured plants", body = Vec<PlantConfig>)
    )
)]
pub async fn list_plants(State(config): State<Config>) -> impl IntoResponse {
    Json(config.plants).into_response()
}

/// GET /api/plants/{id}/tracking
/// Current tracking error for one plant
///
/// Returns the pipeline state, the summary over the lookback window and the latest record.
/// Refreshed by the plant's driver after every step.
#[utoipa::path(
    get,
    path = "/api/plants/{id}/tracking",
    params(
        ("id" = String, Path, description = "Unique Plant ID")
    ),
    responses(
        (status = 200, description = "Tracking snapshot", body = PlantTracking),
        (status = 404, description = "Plant not found")
    )
)]
pub async fn get_plant_tracking(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.get_data(&id) {
        Some(data) => (StatusCode::OK, Json(data)).into_response(),
        None => not_found("Plant"),
    }
}

/// GET /api/plants/{id}/records
/// Recent tracking records, oldest first
#[utoipa::path(
    get,
    path = "/api/plants/{id}/records",
    params(
        ("id" = String, Path, description = "Unique Plant ID")
    ),
    responses(
        (status = 200, description = "Recent records", body = Vec<TrackingRecord>),
        (status = 404, description = "Plant not found")
    )
)]
pub async fn get_plant_records(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.get_data(&id) {
        Some(data) => Json(data.recent).into_response(),
        None => not_found("Plant"),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SunQuery {
    /// RFC 3339 instant, or a naive clock time in the plant's zone; defaults to now
    pub at: Option<String>,
}

/// GET /api/plants/{id}/sun
/// Sun position over a plant
///
/// Computes declination, elevation, azimuth and hour angle at the plant's location.
#[utoipa::path(
    get,
    path = "/api/plants/{id}/sun",
    params(
        ("id" = String, Path, description = "Unique Plant ID"),
        SunQuery
    ),
    responses(
        (status = 200, description = "Sun position", body = SunResponse),
        (status = 400, description = "Bad timestamp, or sun position undefined"),
        (status = 404, description = "Plant not found")
    )
)]
pub async fn get_plant_sun(
    Path(id): Path<String>,
    Query(query): Query<SunQuery>,
    State(config): State<Config>,
) -> impl IntoResponse {
    let Some(plant) = config.plants.iter().find(|p| p.id == id) else {
        return not_found("Plant");
    };

    let instant = plant.tz().and_then(|tz| match &query.at {
        Some(raw) => CivilInstant::parse_in_zone(raw, tz),
        None => Ok(CivilInstant::at_utc_in_zone(chrono::Utc::now(), tz)),
    });
    let result = instant.and_then(|instant| {
        let position = sun_position(&plant.location()?, &instant)?;
        Ok(SunResponse {
            plant_id: plant.id.clone(),
            timestamp: instant.as_fixed(),
            position,
        })
    });

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}

/// GET /api/tracking/global
/// Mean absolute error for all plants
///
/// Returns a map of plant ID to MAE (kW). Plants without a completed step are omitted.
#[utoipa::path(
    get,
    path = "/api/tracking/global",
    responses(
        (status = 200, description = "Map of plant ID to MAE", body = HashMap<String, f64>)
    )
)]
pub async fn get_global_tracking(State(state): State<AppState>) -> impl IntoResponse {
    let errors: HashMap<String, f64> = state
        .get_all_data()
        .into_iter()
        .filter_map(|(k, v)| v.summary.map(|s| (k, s.mean_absolute_error)))
        .collect();
    Json(errors).into_response()
}

/// GET /api/health
/// Service health
///
/// Reports how many pipelines are running, how many failed their latest step and whether
/// the MQTT publisher holds a broker connection. `DEGRADED` when any plant is failing.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Health status", body = HealthStatus)
    )
)]
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let all = state.get_all_data();
    let plants_running = all.values().filter(|d| d.state == PipelineState::Running).count();
    let plants_failing = all.values().filter(|d| d.last_error.is_some()).count();
    let status = if plants_failing == 0 { "OK" } else { "DEGRADED" };
    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        plants_total: all.len(),
        plants_running,
        plants_failing,
        mqtt_connected: state.is_mqtt_connected(),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SimError;
    use crate::models::tracking::{Lookback, TrackingSummary};
    use std::sync::atomic::Ordering;
    use crate::services::expectation_pipeline::StepOutcome;
    use chrono::DateTime;

    fn config() -> Config {
        Config::parse(
            r#"{
            "server": {"port": 8080},
            "pipeline": {"lookback": "unbounded"},
            "plants": [{
                "id": "ny-1", "name": "New York",
                "latitude": 40.7128, "longitude": -74.006, "timezone": "America/New_York",
                "nominal_power_kw": 20.0, "tilt_deg": 25.0, "surface_azimuth_deg": 180.0,
                "weather": {"kind": "open_meteo"},
                "measurement": {"kind": "replay", "path": "m.json"}
            }]
        }"#,
        )
        .unwrap()
    }

    fn stepped_state() -> AppState {
        let state = AppState::new();
        state.register("ny-1", uuid::Uuid::new_v4(), true, Lookback::Unbounded);
        let ts = DateTime::parse_from_rfc3339("2024-06-21T12:00:00-04:00").unwrap();
        let record = TrackingRecord::new(ts, 10.0, 9.0);
        let summary = TrackingSummary {
            samples: 1,
            mean_absolute_error: 1.0,
            mean_signed_error: -1.0,
            root_mean_square_error: 1.0,
            max_absolute_error: 1.0,
            window_start: ts,
            window_end: ts,
        };
        state.record_step("ny-1", &StepOutcome { record, summary }, PipelineState::Running, 10);
        state
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_tracking_known_and_unknown_plant() {
        let state = stepped_state();
        let ok = get_plant_tracking(Path("ny-1".into()), State(state.clone()))
            .await
            .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
        let v = body_json(ok).await;
        assert_eq!(v["summary"]["mean_signed_error"], -1.0);

        let missing = get_plant_tracking(Path("nope".into()), State(state)).await.into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_global_tracking_skips_unstepped_plants() {
        let state = stepped_state();
        state.register("idle", uuid::Uuid::new_v4(), true, Lookback::Unbounded);
        let v = body_json(get_global_tracking(State(state)).await.into_response()).await;
        assert_eq!(v, serde_json::json!({ "ny-1": 1.0 }));
    }

    #[tokio::test]
    async fn test_sun_at_given_instant() {
        let response = get_plant_sun(
            Path("ny-1".into()),
            Query(SunQuery { at: Some("2024-06-21T12:00:00-05:00".into()) }),
            State(config()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let v = body_json(response).await;
        let elevation = v["position"]["elevation_deg"].as_f64().unwrap();
        assert!((72.0..75.0).contains(&elevation), "elevation {}", elevation);
    }

    #[tokio::test]
    async fn test_sun_rejects_bad_timestamp() {
        let response = get_plant_sun(
            Path("ny-1".into()),
            Query(SunQuery { at: Some("yesterday".into()) }),
            State(config()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sun_naive_time_read_in_plant_zone() {
        let naive = get_plant_sun(
            Path("ny-1".into()),
            Query(SunQuery { at: Some("2024-06-21T12:00".into()) }),
            State(config()),
        )
        .await
        .into_response();
        assert_eq!(naive.status(), StatusCode::OK);
        let v = body_json(naive).await;
        assert_eq!(v["timestamp"], "2024-06-21T12:00:00-04:00");
    }

    #[tokio::test]
    async fn test_sun_rejects_time_skipped_by_dst() {
        let response = get_plant_sun(
            Path("ny-1".into()),
            Query(SunQuery { at: Some("2024-03-10T02:30".into()) }),
            State(config()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_failures_and_mqtt() {
        let state = stepped_state();
        let v = body_json(get_health(State(state.clone())).await.into_response()).await;
        assert_eq!(v["status"], "OK");
        assert_eq!(v["plants_total"], 1);
        assert_eq!(v["plants_running"], 1);
        assert_eq!(v["mqtt_connected"], false);

        state.register("idle", uuid::Uuid::new_v4(), true, Lookback::Unbounded);
        state.record_failure("idle", &SimError::SourceUnavailable("down".into()), PipelineState::Idle);
        state.mqtt_connected.store(true, Ordering::Relaxed);
        let v = body_json(get_health(State(state)).await.into_response()).await;
        assert_eq!(v["status"], "DEGRADED");
        assert_eq!(v["plants_total"], 2);
        assert_eq!(v["plants_running"], 1);
        assert_eq!(v["plants_failing"], 1);
        assert_eq!(v["mqtt_connected"], true);
    }
}

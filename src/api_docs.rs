use utoipa::OpenApi;
use crate::controllers::tracking_controller;
use crate::models::tracking;
use crate::services::solar_geometry;
use crate::config;

#[derive(OpenApi)]
#[openapi(
    paths(
        tracking_controller::list_plants,
        tracking_controller::get_plant_tracking,
        tracking_controller::get_plant_records,
        tracking_controller::get_plant_sun,
        tracking_controller::get_global_tracking,
        tracking_controller::get_health
    ),
    components(
        schemas(
            config::PlantConfig,
            config::WeatherConfig,
            config::MeasurementConfig,
            tracking::PipelineState,
            tracking::TrackingRecord,
            tracking::TrackingSummary,
            tracking::PlantTracking,
            tracking::SunResponse,
            tracking::HealthStatus,
            solar_geometry::SolarPosition
        )
    ),
    tags(
        (name = "pv-tracking-sim", description = "PV expectation tracking API")
    )
)]
pub struct ApiDoc;

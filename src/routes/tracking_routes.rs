use axum::{routing::get, Router};
use crate::controllers::tracking_controller::{
    list_plants, get_plant_tracking, get_plant_records, get_plant_sun, get_global_tracking, get_health,
};
use crate::shared_state::SharedState;

/// Build the `/api/*` sub-router.
/// Handlers extract `State<AppState>` and/or `State<Config>` via `FromRef<SharedState>`.
pub fn api_routes(shared: SharedState) -> Router {
    Router::new()
        .route("/plants",               get(list_plants))
        .route("/plants/{id}/tracking", get(get_plant_tracking))
        .route("/plants/{id}/records",  get(get_plant_records))
        .route("/plants/{id}/sun",      get(get_plant_sun))
        .route("/tracking/global",      get(get_global_tracking))
        .route("/health",               get(get_health))
        .with_state(shared)
}

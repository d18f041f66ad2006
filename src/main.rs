mod routes;
mod controllers;
mod services;
mod models;
mod api_docs;
mod shared_state;
mod config;
mod errors;
mod telemetry;

use std::net::SocketAddr;

use anyhow::Context;
use axum::{Router, routing::get, response::Html};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_scalar::Scalar;

use crate::api_docs::ApiDoc;
use crate::config::Config;
use crate::routes::tracking_routes::api_routes;
use crate::services::pipeline_driver;
use crate::services::storage_service::JsonFileStorage;
use crate::shared_state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    // 1. Load configuration
    let config_path =
        std::env::var("PV_TRACKING_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;
    info!("Configuration loaded: {} plants", config.plants.len());

    // 2. Shared state + shutdown broadcast
    let state = AppState::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 3. One pipeline driver per plant
    let mut drivers = Vec::with_capacity(config.plants.len());
    for plant in &config.plants {
        let pipeline = pipeline_driver::build_pipeline(plant, &config.pipeline)
            .with_context(|| format!("cannot build pipeline for plant {}", plant.id))?;
        let plant_id = plant.id.clone();
        let settings = config.pipeline.clone();
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        drivers.push(tokio::spawn(async move {
            if let Err(e) =
                pipeline_driver::run(pipeline, plant_id.clone(), settings, state, JsonFileStorage, shutdown).await
            {
                error!("Driver for plant {} failed: {}", plant_id, e);
            }
        }));
    }

    // 4. MQTT publisher (optional)
    let mqtt_task = config.mqtt.clone().map(|mqtt_cfg| {
        tokio::spawn(services::mqtt_service::run_publisher(
            mqtt_cfg,
            state.clone(),
            config.plants.clone(),
            shutdown_rx.clone(),
        ))
    });

    // 5. HTTP API
    let shared = SharedState {
        app: state.clone(),
        config: config.clone(),
    };
    let app = Router::new()
        .nest("/api", api_routes(shared))
        .route("/scalar", get(|| async {
            Html(Scalar::new(ApiDoc::openapi()).to_html())
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("API Server listening on http://{}", addr);
    info!("Scalar UI: http://{}/scalar", addr);

    tokio::select! {
        served = axum_server::bind(addr).serve(app.into_make_service()) => {
            served.context("HTTP server failed")?;
        }
        _ = telemetry::shutdown_signal() => {}
    }

    // 6. Stop drivers; each closes its pipeline and saves its records
    let _ = shutdown_tx.send(true);
    for driver in drivers {
        if let Err(e) = driver.await {
            error!("Driver task panicked: {}", e);
        }
    }
    if let Some(task) = mqtt_task {
        let _ = task.await;
    }
    info!("Shutdown complete");
    Ok(())
}

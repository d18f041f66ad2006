/// MQTT tracking publisher
///
/// Publishes each plant's tracking snapshot as JSON to a configured broker.
/// Topic structure: `{prefix}/{plant_id}/tracking`
/// Fleet-wide summary: `{prefix}/system/summary`

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, QoS};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{MqttConfig, PlantConfig};
use crate::models::tracking::PlantTracking;
use crate::shared_state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub fn plant_payload(plant: &PlantConfig, data: &PlantTracking) -> Value {
    serde_json::json!({
        "plant_id":    plant.id,
        "plant_name":  plant.name,
        "pipeline_id": data.pipeline_id,
        "timestamp":   chrono::Utc::now().to_rfc3339(),
        "state":       data.state,
        "realtime":    data.realtime,
        "last":        data.last_record,
        "tracking":    data.summary,
        "steps": {
            "ok":     data.steps_ok,
            "failed": data.steps_failed,
        },
        "last_error":  data.last_error,
    })
}

/// Fleet view: plants with a summary, and the mean of their MAE / bias.
pub fn fleet_payload(all: &HashMap<String, PlantTracking>, plants_total: usize) -> Value {
    let tracked: Vec<_> = all.values().filter_map(|d| d.summary.as_ref()).collect();
    let (mean_mae, mean_bias) = if tracked.is_empty() {
        (None, None)
    } else {
        let n = tracked.len() as f64;
        (
            Some(tracked.iter().map(|s| s.mean_absolute_error).sum::<f64>() / n),
            Some(tracked.iter().map(|s| s.mean_signed_error).sum::<f64>() / n),
        )
    };
    serde_json::json!({
        "timestamp":          chrono::Utc::now().to_rfc3339(),
        "plants_total":       plants_total,
        "plants_tracked":     tracked.len(),
        "fleet_mae_kw":       mean_mae,
        "fleet_bias_kw":      mean_bias,
        "steps_failed_total": all.values().map(|d| d.steps_failed).sum::<u64>(),
    })
}

pub async fn run_publisher(
    cfg: MqttConfig,
    state: AppState,
    plants: Vec<PlantConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    if !cfg.enabled || cfg.broker_host.is_empty() {
        info!("MQTT disabled or no broker configured, publisher not started");
        return;
    }

    let client_id = if cfg.client_id.is_empty() {
        format!("pv-tracking-{}", uuid::Uuid::new_v4())
    } else {
        cfg.client_id.clone()
    };

    let interval_s = cfg.publish_interval_s.unwrap_or(10).max(1);
    let prefix = cfg.topic_prefix.trim_end_matches('/').to_string();
    let status_topic = format!("{}/system/status", prefix);

    info!(
        "Connecting to MQTT broker {}:{} (client_id={}, interval={}s)",
        cfg.broker_host, cfg.broker_port, client_id, interval_s
    );

    let mut opts = MqttOptions::new(&client_id, &cfg.broker_host, cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_clean_session(true);
    opts.set_last_will(LastWill::new(
        &status_topic,
        serde_json::json!({ "status": "OFFLINE" }).to_string(),
        QoS::AtLeastOnce,
        true,
    ));

    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(opts, 64);

    let birth_payload = serde_json::json!({
        "status": "ONLINE",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if let Err(e) = client
        .publish(&status_topic, QoS::AtLeastOnce, true, birth_payload.to_string().as_bytes())
        .await
    {
        warn!("Failed to queue MQTT birth message: {}", e);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            event = eventloop.poll() => {
                match event {
                    Ok(ev) => {
                        state.mqtt_connected.store(true, Ordering::Relaxed);
                        debug!("MQTT event: {:?}", ev);
                    }
                    Err(e) => {
                        warn!("MQTT event loop error: {}, reconnecting", e);
                        state.mqtt_connected.store(false, Ordering::Relaxed);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
                continue;
            }
        }

        for plant in &plants {
            let Some(data) = state.get_data(&plant.id) else {
                continue;
            };
            let topic = format!("{}/{}/tracking", prefix, plant.id);
            let payload = plant_payload(plant, &data);
            if let Err(e) = client
                .publish(&topic, QoS::AtMostOnce, false, payload.to_string().as_bytes())
                .await
            {
                warn!("MQTT publish error for {}: {}", topic, e);
                state.mqtt_connected.store(false, Ordering::Relaxed);
            }
        }

        let summary = fleet_payload(&state.get_all_data(), plants.len());
        let summary_topic = format!("{}/system/summary", prefix);
        if let Err(e) = client
            .publish(&summary_topic, QoS::AtMostOnce, false, summary.to_string().as_bytes())
            .await
        {
            warn!("MQTT publish error for {}: {}", summary_topic, e);
        }
    }

    if !go_offline(&client, &mut eventloop, &status_topic, SHUTDOWN_GRACE).await {
        warn!("MQTT disconnect not flushed within {:?}", SHUTDOWN_GRACE);
    }
    state.mqtt_connected.store(false, Ordering::Relaxed);
    info!("MQTT publisher stopped");
}

/// Queue the OFFLINE status and a disconnect, then drive the event loop until
/// the disconnect is written or the connection ends. False if `grace` elapsed.
async fn go_offline(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    status_topic: &str,
    grace: Duration,
) -> bool {
    let offline = serde_json::json!({ "status": "OFFLINE" }).to_string();
    if let Err(e) = client
        .publish(status_topic, QoS::AtLeastOnce, true, offline.as_bytes())
        .await
    {
        warn!("Failed to queue MQTT offline status: {}", e);
    }
    if let Err(e) = client.disconnect().await {
        warn!("Failed to queue MQTT disconnect: {}", e);
    }

    tokio::time::timeout(grace, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(ev) => debug!("MQTT event during shutdown: {:?}", ev),
                Err(e) => {
                    debug!("MQTT connection closed during shutdown: {}", e);
                    break;
                }
            }
        }
    })
    .await
    .is_ok()
}

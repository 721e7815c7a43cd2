//! Background polling loop for connector-fed devices.
//!
//! Every tick the loop snapshots the polled-device roster from storage and
//! fetches each device concurrently. One slow or failing source never delays
//! the others; fetch results enter the same ingestion path as pushed data.

use std::sync::Arc;

use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::connectors::Connector;
use crate::ingest::{process_reading, AppState};
use crate::models::Device;

// ---

/// Run the polling loop until the process exits.
pub async fn run(state: AppState) {
    // ---
    let client = reqwest::Client::new();
    let mut ticker = interval(state.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Polling loop started (every {}s)",
        state.config.poll_interval_secs
    );

    loop {
        ticker.tick().await;

        let devices = match state.storage.list_polled_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Failed to load polled device roster: {}", e);
                continue;
            }
        };
        if devices.is_empty() {
            debug!("No polled devices registered, skipping tick");
            continue;
        }

        let mut tasks = Vec::with_capacity(devices.len());
        for device in devices {
            let state = state.clone();
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                poll_one(&state, &client, device).await;
            }));
        }
        for task in tasks {
            // A panicking poll task is contained here; the loop keeps ticking.
            if let Err(e) = task.await {
                error!("Poll task aborted: {}", e);
            }
        }
    }
}

async fn poll_one(state: &AppState, client: &reqwest::Client, device: Device) {
    // ---
    let Some(connector) = Connector::for_device(&device) else {
        warn!(
            "Device {} has unsupported connector kind '{}'",
            device.id, device.connector_kind
        );
        return;
    };

    let fetched = timeout(state.config.connector_timeout(), connector.fetch(client)).await;
    let mut payload = match fetched {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            warn!("Fetch failed for {}: {}", device.id, e);
            return;
        }
        Err(_) => {
            warn!(
                "Fetch timed out for {} after {}s",
                device.id, state.config.connector_timeout_secs
            );
            return;
        }
    };

    // Route the fetched reading to the device it was polled for.
    payload.device_id = Some(device.id.clone());
    if let Err(e) = process_reading(state, payload).await {
        error!("Failed to ingest polled reading for {}: {}", device.id, e);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::alerts::AlertEngine;
    use crate::config::Config;
    use crate::hub::BroadcastHub;
    use crate::pipeline::Pipeline;
    use crate::storage::mem::MemStorage;
    use crate::storage::Storage;
    use std::time::Duration;

    fn test_state(storage: Arc<MemStorage>) -> AppState {
        // ---
        let config = Config {
            db_url: "postgres://unused".to_string(),
            db_pool_max: 1,
            poll_interval_secs: 60,
            alert_cooldown_secs: 300,
            geofence_radius_km: 50.0,
            connector_timeout_secs: 1,
            alert_webhook_url: None,
        };
        let alerts = Arc::new(AlertEngine::new(
            storage.clone(),
            Vec::new(),
            Duration::from_secs(300),
            config.geofence_radius_km,
        ));
        AppState {
            config,
            storage,
            pipeline: Arc::new(Pipeline::new()),
            hub: Arc::new(BroadcastHub::new()),
            alerts,
        }
    }

    #[tokio::test]
    async fn unsupported_connector_kind_is_skipped_without_ingest() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let state = test_state(storage.clone());

        let mut device = Device::new_push("weird-1");
        device.connector_kind = "carrier-pigeon".to_string();
        storage.upsert_device(&device).await.unwrap();

        poll_one(&state, &reqwest::Client::new(), device).await;
        assert_eq!(storage.reading_count(), 0);
    }

    #[tokio::test]
    async fn open_meteo_device_without_coordinates_is_skipped() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let state = test_state(storage.clone());

        let mut device = Device::new_push("weather-1");
        device.connector_kind = "open-meteo".to_string();
        device.lat = None;
        device.lon = None;

        poll_one(&state, &reqwest::Client::new(), device).await;
        assert_eq!(storage.reading_count(), 0);
    }
}

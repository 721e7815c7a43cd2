//! Ingestion orchestration shared by the HTTP intake and the polling loop.
//!
//! One reading flows: device upsert -> pipeline annotation -> persistence ->
//! alert evaluation (spawned, decoupled) -> live broadcast. The caller gets
//! an acknowledgement as soon as the reading is durably stored; notification
//! and broadcast outcomes never fail the ingestion path.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::alerts::AlertEngine;
use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::models::{Device, Reading, SensorPayload};
use crate::pipeline::{Annotated, Pipeline};
use crate::storage::Storage;

// ---

/// Shared application state handed to every route and background task.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub pipeline: Arc<Pipeline>,
    pub hub: Arc<BroadcastHub>,
    pub alerts: Arc<AlertEngine>,
}

/// Acknowledgement returned to the ingestion caller.
#[derive(Debug, Serialize)]
pub struct IngestAck {
    pub status: &'static str,
    pub device_id: String,
    pub trust_score: f64,
    pub risk_level: String,
    pub insight: String,
}

// ---

/// Run one raw payload through the full pipeline.
///
/// Returns an error only when the reading could not be durably stored;
/// downstream notification or broadcast failures are contained and logged.
pub async fn process_reading(state: &AppState, payload: SensorPayload) -> Result<IngestAck> {
    // ---
    let device_id = payload.device_id().to_string();
    let device = upsert_device(state, &device_id, &payload).await?;

    let annotated = state.pipeline.process(&device_id, &payload).await;
    let reading = build_reading(&device_id, &payload, &annotated);

    // The reading must land before anything is acknowledged or fanned out.
    state.storage.insert_reading(&reading).await?;
    debug!("Stored reading for {} (trust {})", device_id, reading.trust_score);

    // Alert dispatch is slow I/O; hand it to its own task so the intake
    // response and the live broadcast are never delayed by it.
    {
        let alerts = state.alerts.clone();
        let device = device.clone();
        let reading = reading.clone();
        tokio::spawn(async move {
            alerts.evaluate(&device, &reading).await;
        });
    }

    let payload_json = broadcast_payload(&device_id, &payload, &annotated, &reading);
    state.hub.broadcast(&device_id, payload_json.to_string()).await;

    Ok(IngestAck {
        status: "ok",
        device_id,
        trust_score: reading.trust_score,
        risk_level: reading.risk_level,
        insight: reading.insight,
    })
}

async fn upsert_device(
    state: &AppState,
    device_id: &str,
    payload: &SensorPayload,
) -> Result<Device> {
    // ---
    let mut device = match state.storage.get_device(device_id).await? {
        Some(device) => device,
        None => {
            info!("Registering new device {}", device_id);
            Device::new_push(device_id)
        }
    };

    device.status = "online".to_string();
    device.last_seen = Some(Utc::now());
    if payload.lat.is_some() {
        device.lat = payload.lat;
    }
    if payload.lon.is_some() {
        device.lon = payload.lon;
    }

    state.storage.upsert_device(&device).await?;
    Ok(device)
}

fn build_reading(device_id: &str, payload: &SensorPayload, annotated: &Annotated) -> Reading {
    // ---
    Reading {
        device_id: device_id.to_string(),
        timestamp: Utc::now(),
        owner_email: payload.user_email.clone(),
        temperature: payload.temperature,
        humidity: payload.humidity,
        pm2_5: payload.pm25,
        pressure: payload.pressure,
        gas: payload.gas,
        wind_speed: payload.wind_speed,
        rain: payload.rain,
        motion: payload.motion,
        ph: payload.ph,
        kalman_temp: annotated.kalman_temp,
        kalman_hum: annotated.kalman_hum,
        kalman_pm25: annotated.kalman_pm25,
        gas_smoothed: annotated.gas.smoothed,
        trust_score: annotated.trust_score,
        is_anomaly: annotated.is_anomaly,
        anomaly_score: annotated.anomaly_score,
        risk_level: annotated.report.risk_level.as_str().to_string(),
        insight: annotated.report.insight.clone(),
        temp_trend: annotated.report.temp_trend.as_str().to_string(),
        gas_trend: annotated.report.gas_trend.as_str().to_string(),
        health_temperature: annotated.report.health.temperature.as_str().to_string(),
        health_gas: annotated.report.health.gas.as_str().to_string(),
        health_humidity: annotated.report.health.humidity.as_str().to_string(),
    }
}

/// Combined raw/filtered/derived payload pushed to live viewers.
fn broadcast_payload(
    device_id: &str,
    payload: &SensorPayload,
    annotated: &Annotated,
    reading: &Reading,
) -> serde_json::Value {
    // ---
    serde_json::json!({
        "deviceId": device_id,
        "timestamp": reading.timestamp.to_rfc3339(),
        "raw": {
            "temperature": payload.temperature,
            "humidity": payload.humidity,
            "pm25": payload.pm25,
            "mq_raw": payload.mq_raw,
            "gas": payload.gas,
            "pressure": payload.pressure,
        },
        "filtered": {
            "temperature": annotated.kalman_temp,
            "humidity": annotated.kalman_hum,
            "pm25": annotated.kalman_pm25,
            "mq_smoothed": annotated.gas.smoothed,
        },
        "confidence": {
            "temperature": annotated.temp_confidence,
            "humidity": annotated.hum_confidence,
            "pm25": annotated.pm25_confidence,
        },
        "mq_quality": {
            "is_outlier": annotated.gas.is_outlier,
            "z_score": annotated.gas.z_score,
        },
        "smart": {
            "trust_score": annotated.trust_score,
            "is_anomaly": annotated.is_anomaly,
            "anomaly_score": annotated.anomaly_score,
            "risk_level": reading.risk_level,
            "insight": reading.insight,
            "prediction": {
                "temperature": annotated.temp_forecast,
                "temp_trend": reading.temp_trend,
                "gas_trend": reading.gas_trend,
            },
            "health": {
                "temperature": reading.health_temperature,
                "gas": reading.health_gas,
                "humidity": reading.health_humidity,
            },
        },
        "alerts": annotated.threshold_alerts,
        "precautions": annotated.precautions,
    })
}

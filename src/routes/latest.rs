// src/routes/latest.rs
//! Read endpoints over stored readings.
//!
//! `GET /api/filtered/latest` returns the most recent annotated reading for
//! a device together with derived air-quality context. `GET /api/data`
//! returns recent history, newest first. Both default to the primary push
//! device when no `device_id` is given.
//!
//! Exports to the gateway (`mod.rs`): a subrouter with both read routes.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error};

use crate::ingest::AppState;
use crate::models::DEFAULT_PUSH_DEVICE;
use crate::pipeline::aqi;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/filtered/latest", get(latest_handler))
        .route("/api/data", get(history_handler))
}

#[derive(Deserialize)]
struct LatestQuery {
    device_id: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    device_id: Option<String>,
    limit: Option<u32>,
}

// ---

async fn latest_handler(
    Query(params): Query<LatestQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let device_id = params
        .device_id
        .unwrap_or_else(|| DEFAULT_PUSH_DEVICE.to_string());
    debug!("GET /api/filtered/latest for {}", device_id);

    match state.storage.latest_reading(&device_id).await {
        Ok(Some(reading)) => {
            let air = aqi::from_pm25(reading.kalman_pm25);
            let recommendations = aqi::health_recommendations(air.aqi);
            let body = serde_json::json!({
                "status": "ok",
                "reading": reading,
                "aqi": air,
                "recommendations": recommendations,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(None) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "no_data"})),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to load latest reading for {}: {}", device_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error"})),
            )
                .into_response()
        }
    }
}

async fn history_handler(
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let device_id = params
        .device_id
        .unwrap_or_else(|| DEFAULT_PUSH_DEVICE.to_string());
    let limit = params.limit.unwrap_or(100).min(500) as i64;
    debug!("GET /api/data for {} (limit {})", device_id, limit);

    match state.storage.recent_readings(&device_id, limit).await {
        Ok(readings) => (StatusCode::OK, Json(readings)).into_response(),
        Err(e) => {
            error!("Failed to load history for {}: {}", device_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error"})),
            )
                .into_response()
        }
    }
}

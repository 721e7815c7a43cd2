// src/routes/ingest.rs
//! Device data intake endpoint.
//!
//! `POST /iot/data` accepts one raw JSON reading from a field device and
//! runs it through the full pipeline. Payload validation is structural:
//! readings missing `temperature` or `humidity` are rejected at
//! deserialization with a 422 before the handler runs.
//!
//! Exports to the gateway (`mod.rs`): a subrouter containing the intake route.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use tracing::{error, info};

use crate::ingest::{process_reading, AppState};
use crate::models::SensorPayload;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/iot/data", post(handler))
}

async fn handler(
    State(state): State<AppState>,
    Json(payload): Json<SensorPayload>,
) -> impl IntoResponse {
    // ---
    info!("POST /iot/data from {}", payload.device_id());

    match process_reading(&state, payload).await {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(e) => {
            error!("Ingestion failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error", "detail": "failed to store reading"})),
            )
                .into_response()
        }
    }
}

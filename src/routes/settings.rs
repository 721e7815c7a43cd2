// src/routes/settings.rs
//! Per-subscriber alert threshold endpoints.
//!
//! `GET /api/alert-settings?email=` returns the stored subscription for a
//! subscriber, materializing the default row on first read so the client
//! always has something to edit. `PUT /api/alert-settings` replaces the
//! stored row with the submitted one.
//!
//! Exports to the gateway (`mod.rs`): a subrouter with both routes.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::ingest::AppState;
use crate::models::AlertSubscription;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/alert-settings", get(get_handler).put(put_handler))
}

#[derive(Deserialize)]
struct SettingsQuery {
    email: String,
}

// ---

async fn get_handler(
    Query(params): Query<SettingsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    match state.storage.subscription_for(&params.email).await {
        Ok(Some(subscription)) => (StatusCode::OK, Json(subscription)).into_response(),
        Ok(None) => {
            // First read creates the row so a later PUT is always an update.
            let defaults = AlertSubscription::defaults_for(&params.email);
            match state.storage.upsert_subscription(&defaults).await {
                Ok(()) => {
                    info!("Created default alert settings for {}", params.email);
                    (StatusCode::OK, Json(defaults)).into_response()
                }
                Err(e) => {
                    error!("Failed to store default settings: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({"status": "error"})),
                    )
                        .into_response()
                }
            }
        }
        Err(e) => {
            error!("Failed to load settings for {}: {}", params.email, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error"})),
            )
                .into_response()
        }
    }
}

async fn put_handler(
    State(state): State<AppState>,
    Json(subscription): Json<AlertSubscription>,
) -> impl IntoResponse {
    // ---
    if subscription.user_email.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"status": "error", "detail": "user_email is required"})),
        )
            .into_response();
    }

    match state.storage.upsert_subscription(&subscription).await {
        Ok(()) => {
            info!("Updated alert settings for {}", subscription.user_email);
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "ok"})),
            )
                .into_response()
        }
        Err(e) => {
            error!(
                "Failed to update settings for {}: {}",
                subscription.user_email, e
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error"})),
            )
                .into_response()
        }
    }
}

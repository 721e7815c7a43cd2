use axum::Router;

use crate::ingest::AppState;

mod health;
mod ingest;
mod latest;
mod settings;
mod stream;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(ingest::router())
        .merge(latest::router())
        .merge(settings::router())
        .merge(stream::router())
        .merge(health::router())
        .with_state(state)
}

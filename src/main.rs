//! Application entry point for the `ecosync-core` backend service.
//!
//! This binary orchestrates the full startup sequence for the environmental
//! monitoring core, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Wiring the pipeline, alert engine, and live broadcast hub
//! - Spawning the connector polling loop
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `POLL_INTERVAL_SECS` (optional) – connector polling cadence (default: 60)
//! - `ALERT_COOLDOWN_SECS` (optional) – per-device alert mute window (default: 300)
//! - `GEOFENCE_RADIUS_KM` (optional) – nearby-subscriber radius (default: 50)
//! - `CONNECTOR_TIMEOUT_SECS` (optional) – per-fetch deadline (default: 10)
//! - `ALERT_WEBHOOK_URL` (optional) – relay endpoint for rich alert delivery
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! and route registration to `routes`.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod alerts;
mod config;
mod connectors;
mod hub;
mod ingest;
mod models;
mod pipeline;
mod poller;
mod routes;
mod schema;
mod storage;

pub use config::Config;

use alerts::notify::{EmailRelayChannel, NotificationChannel, PushLogChannel};
use alerts::AlertEngine;
use hub::BroadcastHub;
use ingest::AppState;
use pipeline::Pipeline;
use storage::{PgStorage, Storage};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));
    let alerts = Arc::new(AlertEngine::new(
        storage.clone(),
        notification_channels(&cfg),
        cfg.alert_cooldown(),
        cfg.geofence_radius_km,
    ));

    let state = AppState {
        config: cfg,
        storage,
        pipeline: Arc::new(Pipeline::new()),
        hub: Arc::new(BroadcastHub::new()),
        alerts,
    };

    tokio::spawn(poller::run(state.clone()));

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Assemble the outbound alert channels from configuration.
///
/// The push/log channel is always present; the email relay channel is only
/// added when `ALERT_WEBHOOK_URL` is set.
fn notification_channels(cfg: &Config) -> Vec<Arc<dyn NotificationChannel>> {
    // ---
    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(PushLogChannel)];
    if let Some(url) = &cfg.alert_webhook_url {
        tracing::info!("Email relay channel enabled");
        channels.push(Arc::new(EmailRelayChannel::new(
            reqwest::Client::new(),
            url.clone(),
            cfg.connector_timeout(),
        )));
    }
    channels
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

//! Configuration loader for the `ecosync-core` backend service.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). By consolidating configuration logic
//! here, we avoid scattering `env::var` calls throughout the codebase.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional float environment variable with a default value.
macro_rules! parse_env_f64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Period of the external-connector polling loop, in seconds.
    pub poll_interval_secs: u32,

    /// Minimum time between repeat notifications per (device, subscriber).
    pub alert_cooldown_secs: u32,

    /// Great-circle radius for including nearby subscribers, in km.
    pub geofence_radius_km: f64,

    /// Timeout applied to each connector fetch and each notification send.
    pub connector_timeout_secs: u32,

    /// Optional relay endpoint for the webhook notification channel.
    pub alert_webhook_url: Option<String>,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `POLL_INTERVAL_SECS` – polling loop period (default: 60)
/// - `ALERT_COOLDOWN_SECS` – per-pair notification cooldown (default: 300)
/// - `GEOFENCE_RADIUS_KM` – nearby-subscriber radius (default: 50)
/// - `CONNECTOR_TIMEOUT_SECS` – per-fetch/dispatch timeout (default: 10)
/// - `ALERT_WEBHOOK_URL` – notification relay endpoint (default: unset)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let poll_interval_secs = parse_env_u32!("POLL_INTERVAL_SECS", 60);
    let alert_cooldown_secs = parse_env_u32!("ALERT_COOLDOWN_SECS", 300);
    let geofence_radius_km = parse_env_f64!("GEOFENCE_RADIUS_KM", 50.0);
    let connector_timeout_secs = parse_env_u32!("CONNECTOR_TIMEOUT_SECS", 10);
    let alert_webhook_url = env::var("ALERT_WEBHOOK_URL").ok();

    Ok(Config {
        db_url,
        db_pool_max,
        poll_interval_secs,
        alert_cooldown_secs,
        geofence_radius_km,
        connector_timeout_secs,
        alert_webhook_url,
    })
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs as u64)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs as u64)
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_secs(self.connector_timeout_secs as u64)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL           : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  POLL_INTERVAL_SECS     : {}", self.poll_interval_secs);
        tracing::info!("  ALERT_COOLDOWN_SECS    : {}", self.alert_cooldown_secs);
        tracing::info!("  GEOFENCE_RADIUS_KM     : {}", self.geofence_radius_km);
        tracing::info!("  CONNECTOR_TIMEOUT_SECS : {}", self.connector_timeout_secs);
        tracing::info!(
            "  ALERT_WEBHOOK_URL      : {}",
            self.alert_webhook_url.as_deref().unwrap_or("(unset)")
        );
    }
}

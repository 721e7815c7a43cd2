//! Data models for the EcoSync monitoring core.
//!
//! Covers the four persisted entities (Device, Reading, AlertSubscription,
//! AlertRecord), the ingestion payload accepted at the intake boundary, and
//! the derived enums (risk level, trend, sensor health) shared by the
//! pipeline, alert engine, and broadcast payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Device id assigned to push readings that carry no explicit identifier.
pub const DEFAULT_PUSH_DEVICE: &str = "ESP32_MAIN";

/// A registered sensor source.
///
/// Created automatically on the first reading from an unseen identifier and
/// mutated on every subsequent reading (status, location, last-seen). The
/// core never hard-deletes devices.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Device {
    // ---
    pub id: String,
    pub name: String,
    /// Connector kind: `push`, `open-meteo`, or `thingspeak`.
    pub connector_kind: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Build a fresh device record for a first-time source identifier.
    pub fn new_push(id: &str) -> Self {
        // ---
        Device {
            id: id.to_string(),
            name: format!("Sensor {id}"),
            connector_kind: "push".to_string(),
            lat: None,
            lon: None,
            status: "online".to_string(),
            last_seen: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }
}

// ---

/// Raw sensor payload accepted at the ingestion boundary.
///
/// `temperature` and `humidity` are required; a request missing either is
/// rejected by the JSON extractor before any filter state is touched.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorPayload {
    // ---
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default)]
    pub pm25: f64,
    #[serde(default = "default_pressure")]
    pub pressure: f64,
    #[serde(default)]
    pub mq_raw: f64,
    #[serde(default)]
    pub gas: f64,
    #[serde(default)]
    pub wind_speed: f64,
    #[serde(default)]
    pub vibration: f64,
    #[serde(default)]
    pub uv_index: f64,
    pub rain: Option<f64>,
    pub motion: Option<bool>,
    pub ph: Option<f64>,
    pub user_email: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub device_id: Option<String>,
}

fn default_pressure() -> f64 {
    1013.0
}

impl SensorPayload {
    pub fn device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or(DEFAULT_PUSH_DEVICE)
    }
}

// ---

/// SAFE / MODERATE / CRITICAL classification from the rule-based risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Short-horizon trend direction for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "Rising",
            Trend::Falling => "Falling",
            Trend::Stable => "Stable",
        }
    }
}

/// Per-metric sensor health diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Stuck/Frozen")]
    Stuck,
    #[serde(rename = "Unstable/Noisy")]
    Noisy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Stuck => "Stuck/Frozen",
            HealthStatus::Noisy => "Unstable/Noisy",
        }
    }
}

/// Health diagnosis for the three monitored channels.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensorHealth {
    pub temperature: HealthStatus,
    pub gas: HealthStatus,
    pub humidity: HealthStatus,
}

// ---

/// One annotated, persisted sensor sample. Immutable once written.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub owner_email: Option<String>,

    // Raw inputs
    pub temperature: f64,
    pub humidity: f64,
    pub pm2_5: f64,
    pub pressure: f64,
    pub gas: f64,
    pub wind_speed: f64,
    pub rain: Option<f64>,
    pub motion: Option<bool>,
    pub ph: Option<f64>,

    // Filtered values
    pub kalman_temp: f64,
    pub kalman_hum: f64,
    pub kalman_pm25: f64,
    pub gas_smoothed: f64,

    // Derived annotations
    pub trust_score: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub risk_level: String,
    pub insight: String,
    pub temp_trend: String,
    pub gas_trend: String,
    pub health_temperature: String,
    pub health_gas: String,
    pub health_humidity: String,
}

// ---

/// Per-subscriber alert thresholds. At most one active row per email;
/// lookups fall back to [`AlertSubscription::defaults_for`] when none exists.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertSubscription {
    // ---
    pub user_email: String,
    pub temp_threshold: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
    pub pm25_threshold: f64,
    pub wind_threshold: f64,
    pub gas_threshold: f64,
    #[serde(default)]
    pub rain_alerts: bool,
    #[serde(default)]
    pub motion_alerts: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl AlertSubscription {
    /// Documented defaults used on create-on-first-read and when no
    /// subscription row exists for a subscriber.
    pub fn defaults_for(email: &str) -> Self {
        // ---
        AlertSubscription {
            user_email: email.to_string(),
            temp_threshold: 45.0,
            humidity_min: 20.0,
            humidity_max: 80.0,
            pm25_threshold: 150.0,
            wind_threshold: 30.0,
            gas_threshold: 600.0,
            rain_alerts: false,
            motion_alerts: false,
            is_active: true,
            lat: None,
            lon: None,
        }
    }
}

// ---

/// Write-once audit trail of a triggered notification.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRecord {
    // ---
    /// Correlation id shared with the outbound notification payload.
    pub alert_id: uuid::Uuid,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Comma-joined resolved recipient set.
    pub recipients: String,
    pub email_sent: bool,
    pub push_sent: bool,
}

//! Subscriber alert evaluation and dispatch.
//!
//! For every annotated reading the engine evaluates all active alert
//! subscriptions, applies a per-(device, subscriber) cooldown, resolves the
//! recipient set (direct subscriber, originating address, and geofenced
//! nearby subscribers), and dispatches one formatted notification per
//! channel. Channel failures are isolated: they never block other channels,
//! the audit record, or the stored reading.
//!
//! Cooldown is a lazy state machine per (device, subscriber) pair: Idle ->
//! Cooling-Down on a successful dispatch, back to Idle once the window has
//! elapsed at the next evaluation. Each device owns its pair states behind
//! its own lock, mirroring the per-device registries elsewhere, so alert
//! evaluation for one device never contends with another's. The map is
//! process-local; losing it on restart costs at most one extra notification
//! burst.

pub mod notify;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info};

use crate::models::{AlertRecord, AlertSubscription, Device, Reading};
use crate::storage::Storage;
use notify::{AlertMessage, NotificationChannel};

// Hard safety ceilings: user thresholds may tighten but never relax past
// these. The effective threshold is min(user setting, ceiling).
const HARD_TEMP_MAX_C: f64 = 60.0;
const HARD_GAS_MAX: f64 = 1200.0;
const HARD_PM25_MAX: f64 = 250.0;

/// ESP32 rain analog: values below this mean water on the sensor.
const RAIN_WET_BELOW: f64 = 2000.0;

const EARTH_RADIUS_KM: f64 = 6371.0;

// ---

/// Per-subscriber dispatch timestamps for one device.
type DeviceCooldowns = Arc<Mutex<HashMap<String, Instant>>>;

/// Alert evaluation engine. One instance per process, shared across
/// ingestion tasks.
pub struct AlertEngine {
    storage: Arc<dyn Storage>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    cooldowns: RwLock<HashMap<String, DeviceCooldowns>>,
    cooldown_window: Duration,
    geofence_radius_km: f64,
}

impl AlertEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        cooldown_window: Duration,
        geofence_radius_km: f64,
    ) -> Self {
        // ---
        AlertEngine {
            storage,
            channels,
            cooldowns: RwLock::new(HashMap::new()),
            cooldown_window,
            geofence_radius_km,
        }
    }

    /// Evaluate one annotated reading against every active subscription.
    ///
    /// Runs decoupled from the ingestion response path; all failures here
    /// are logged and contained.
    pub async fn evaluate(&self, device: &Device, reading: &Reading) {
        // ---
        let mut subscriptions = match self.storage.active_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                error!("Failed to load alert subscriptions: {}", e);
                return;
            }
        };

        // A subscriber tied to the reading with no stored row still gets the
        // documented default thresholds.
        if let Some(origin) = &reading.owner_email {
            if !subscriptions.iter().any(|s| &s.user_email == origin) {
                subscriptions.push(AlertSubscription::defaults_for(origin));
            }
        }

        for sub in &subscriptions {
            let breaches = breach_set(sub, reading);
            let risky = reading.risk_level == "MODERATE" || reading.risk_level == "CRITICAL";
            if breaches.is_empty() && !risky {
                continue;
            }

            if self.is_cooling_down(&device.id, &sub.user_email) {
                debug!(
                    "Cooldown active for {}/{}, skipping dispatch",
                    device.id, sub.user_email
                );
                continue;
            }

            let recipients = self.resolve_recipients(sub, reading, device, &subscriptions);
            self.dispatch(device, reading, &breaches, recipients, &sub.user_email)
                .await;
        }
    }

    /// Forget cooldown state for a removed device.
    pub fn forget_device(&self, device_id: &str) {
        // ---
        self.cooldowns.write().unwrap().remove(device_id);
    }

    fn is_cooling_down(&self, device_id: &str, subscriber: &str) -> bool {
        // ---
        let Some(pairs) = self.cooldowns.read().unwrap().get(device_id).cloned() else {
            return false;
        };
        let mut pairs = pairs.lock().unwrap();
        match pairs.get(subscriber) {
            Some(since) if since.elapsed() < self.cooldown_window => true,
            Some(_) => {
                // Window elapsed: the pair returns to Idle lazily.
                pairs.remove(subscriber);
                false
            }
            None => false,
        }
    }

    fn mark_cooling_down(&self, device_id: &str, subscriber: &str) {
        // ---
        let pairs = {
            let read = self.cooldowns.read().unwrap();
            read.get(device_id).cloned()
        };
        let pairs = match pairs {
            Some(pairs) => pairs,
            None => self
                .cooldowns
                .write()
                .unwrap()
                .entry(device_id.to_string())
                .or_default()
                .clone(),
        };
        pairs.lock().unwrap().insert(subscriber.to_string(), Instant::now());
    }

    fn resolve_recipients(
        &self,
        sub: &AlertSubscription,
        reading: &Reading,
        device: &Device,
        all_subs: &[AlertSubscription],
    ) -> Vec<String> {
        // ---
        let mut recipients = vec![sub.user_email.clone()];

        if let Some(origin) = &reading.owner_email {
            if !recipients.contains(origin) {
                recipients.push(origin.clone());
            }
        }

        // Geofence: nearby subscribers with a known location, when the
        // device location is also known.
        if let (Some(dev_lat), Some(dev_lon)) = (device.lat, device.lon) {
            for other in all_subs {
                let (Some(lat), Some(lon)) = (other.lat, other.lon) else {
                    continue;
                };
                if recipients.contains(&other.user_email) {
                    continue;
                }
                let distance = haversine_km(dev_lat, dev_lon, lat, lon);
                if distance <= self.geofence_radius_km {
                    debug!(
                        "Including nearby subscriber {} ({:.1} km from {})",
                        other.user_email, distance, device.name
                    );
                    recipients.push(other.user_email.clone());
                }
            }
        }

        recipients
    }

    async fn dispatch(
        &self,
        device: &Device,
        reading: &Reading,
        breaches: &[String],
        recipients: Vec<String>,
        subscriber: &str,
    ) {
        // ---
        let lines = if breaches.is_empty() {
            vec![format!("Risk level {} reported", reading.risk_level)]
        } else {
            breaches.to_vec()
        };
        let message = lines.join(" | ");
        let alert_id = uuid::Uuid::new_v4();

        let alert = AlertMessage {
            alert_id,
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            timestamp: reading.timestamp,
            subject: format!("EcoSync Alert: {}", device.name),
            lines,
            insight: reading.insight.clone(),
            risk_level: reading.risk_level.clone(),
            recipients: recipients.clone(),
        };

        // Every channel gets its attempt; one failure never blocks another.
        let mut email_sent = false;
        let mut push_sent = false;
        let mut any_success = false;
        for channel in &self.channels {
            let ok = channel.deliver(&alert).await;
            any_success |= ok;
            match channel.name() {
                "email" => email_sent = ok,
                "push" => push_sent = ok,
                _ => {}
            }
            if !ok {
                error!("Channel {} failed for device {}", channel.name(), device.id);
            }
        }

        // The audit record is written regardless of channel outcomes.
        let record = AlertRecord {
            alert_id,
            device_id: device.id.clone(),
            timestamp: Utc::now(),
            message: message.clone(),
            recipients: recipients.join(","),
            email_sent,
            push_sent,
        };
        if let Err(e) = self.storage.insert_alert_record(&record).await {
            error!("Failed to write alert record: {}", e);
        }

        if any_success {
            info!("ALERT dispatched for {}: {}", device.name, message);
            self.mark_cooling_down(&device.id, subscriber);
        }
    }
}

// ---

/// Compute the subscription's breach set against the raw reading values.
fn breach_set(sub: &AlertSubscription, reading: &Reading) -> Vec<String> {
    // ---
    let mut breaches = Vec::new();

    let temp_max = sub.temp_threshold.min(HARD_TEMP_MAX_C);
    if reading.temperature > temp_max {
        breaches.push(format!(
            "CRITICAL TEMP: {}°C (Fire Risk)",
            reading.temperature
        ));
    }

    if reading.humidity > sub.humidity_max {
        breaches.push(format!("HIGH HUMIDITY: {}% (Mold Risk)", reading.humidity));
    } else if reading.humidity < sub.humidity_min {
        breaches.push(format!(
            "LOW HUMIDITY: {}% (Dryness Alert)",
            reading.humidity
        ));
    }

    let pm25_max = sub.pm25_threshold.min(HARD_PM25_MAX);
    if reading.pm2_5 > pm25_max {
        breaches.push(format!(
            "HAZARDOUS AIR: PM2.5 is {} µg/m³",
            reading.pm2_5
        ));
    }

    let gas_max = sub.gas_threshold.min(HARD_GAS_MAX);
    if reading.gas > gas_max {
        breaches.push(format!("HIGH GAS: {} (Leak Risk)", reading.gas));
    }

    if reading.wind_speed > sub.wind_threshold {
        breaches.push(format!(
            "HIGH WIND: {} km/h (Secure Equipment)",
            reading.wind_speed
        ));
    }

    if sub.rain_alerts {
        if let Some(rain) = reading.rain {
            if rain < RAIN_WET_BELOW {
                breaches.push("RAIN DETECTED: Protect exposed equipment".to_string());
            }
        }
    }

    if sub.motion_alerts && reading.motion == Some(true) {
        breaches.push("MOTION DETECTED: Unexpected activity".to_string());
    }

    breaches
}

/// Great-circle distance between two coordinate pairs, in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // ---
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::storage::mem::MemStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test channel that records deliveries and succeeds or fails on demand.
    struct RecordingChannel {
        channel_name: &'static str,
        succeed: bool,
        deliveries: AtomicUsize,
        last_recipients: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new(channel_name: &'static str, succeed: bool) -> Arc<Self> {
            Arc::new(RecordingChannel {
                channel_name,
                succeed,
                deliveries: AtomicUsize::new(0),
                last_recipients: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.deliveries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            self.channel_name
        }

        async fn deliver(&self, alert: &AlertMessage) -> bool {
            self.deliveries.fetch_add(1, Ordering::SeqCst);
            *self.last_recipients.lock().unwrap() = alert.recipients.clone();
            self.succeed
        }
    }

    fn device_at(lat: f64, lon: f64) -> Device {
        // ---
        let mut device = Device::new_push("dev-1");
        device.lat = Some(lat);
        device.lon = Some(lon);
        device
    }

    fn reading(temp: f64, humidity: f64, risk: &str) -> Reading {
        // ---
        Reading {
            device_id: "dev-1".to_string(),
            timestamp: Utc::now(),
            owner_email: Some("owner@example.com".to_string()),
            temperature: temp,
            humidity,
            pm2_5: 10.0,
            pressure: 1013.0,
            gas: 200.0,
            wind_speed: 5.0,
            rain: None,
            motion: None,
            ph: None,
            kalman_temp: temp,
            kalman_hum: humidity,
            kalman_pm25: 10.0,
            gas_smoothed: 200.0,
            trust_score: 100.0,
            is_anomaly: false,
            anomaly_score: 0.0,
            risk_level: risk.to_string(),
            insight: "test insight".to_string(),
            temp_trend: "Stable".to_string(),
            gas_trend: "Stable".to_string(),
            health_temperature: "OK".to_string(),
            health_gas: "OK".to_string(),
            health_humidity: "OK".to_string(),
        }
    }

    fn engine_with(
        storage: Arc<MemStorage>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        cooldown: Duration,
    ) -> AlertEngine {
        AlertEngine::new(storage, channels, cooldown, 50.0)
    }

    #[tokio::test]
    async fn safe_reading_with_no_breaches_dispatches_nothing() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );

        engine
            .evaluate(&device_at(0.0, 0.0), &reading(25.0, 50.0, "SAFE"))
            .await;

        assert_eq!(channel.count(), 0);
        assert_eq!(storage.alert_record_count(), 0);
    }

    #[tokio::test]
    async fn breach_dispatches_and_writes_audit_record() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );

        // 55°C breaches the default 45°C threshold.
        engine
            .evaluate(&device_at(0.0, 0.0), &reading(55.0, 50.0, "CRITICAL"))
            .await;

        assert_eq!(channel.count(), 1);
        assert_eq!(storage.alert_record_count(), 1);
        let record = storage.last_alert_record().unwrap();
        assert!(record.message.contains("CRITICAL TEMP"));
        assert!(record.push_sent);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_dispatch_until_window_elapses() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_millis(50),
        );
        let device = device_at(0.0, 0.0);

        engine.evaluate(&device, &reading(55.0, 50.0, "CRITICAL")).await;
        engine.evaluate(&device, &reading(56.0, 50.0, "CRITICAL")).await;
        assert_eq!(channel.count(), 1, "second reading inside cooldown");

        tokio::time::sleep(Duration::from_millis(80)).await;
        engine.evaluate(&device, &reading(57.0, 50.0, "CRITICAL")).await;
        assert_eq!(channel.count(), 2, "window elapsed, pair back to Idle");
    }

    #[tokio::test]
    async fn failed_channel_does_not_block_others_or_audit_record() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let email = RecordingChannel::new("email", false);
        let push = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![email.clone(), push.clone()],
            Duration::from_secs(300),
        );

        engine
            .evaluate(&device_at(0.0, 0.0), &reading(55.0, 50.0, "CRITICAL"))
            .await;

        assert_eq!(email.count(), 1);
        assert_eq!(push.count(), 1);
        let record = storage.last_alert_record().unwrap();
        assert!(!record.email_sent);
        assert!(record.push_sent);
    }

    #[tokio::test]
    async fn all_channels_failing_leaves_pair_idle() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", false);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );
        let device = device_at(0.0, 0.0);

        engine.evaluate(&device, &reading(55.0, 50.0, "CRITICAL")).await;
        engine.evaluate(&device, &reading(56.0, 50.0, "CRITICAL")).await;

        // No successful dispatch, no Cooling-Down transition: both attempts run.
        assert_eq!(channel.count(), 2);
        // Audit records are still written for each attempt.
        assert_eq!(storage.alert_record_count(), 2);
    }

    #[tokio::test]
    async fn geofence_includes_near_and_excludes_far_subscribers() {
        // ---
        let storage = Arc::new(MemStorage::new());

        // Device in central Bangalore.
        let device = device_at(12.9716, 77.5946);

        // Koramangala, ~6 km away: inside the 50 km radius.
        let mut near = AlertSubscription::defaults_for("near@test.com");
        near.lat = Some(12.9279);
        near.lon = Some(77.6271);
        storage.upsert_subscription(&near).await.unwrap();

        // Delhi, ~1700 km away: outside.
        let mut far = AlertSubscription::defaults_for("far@test.com");
        far.lat = Some(28.7041);
        far.lon = Some(77.1025);
        storage.upsert_subscription(&far).await.unwrap();

        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );

        engine.evaluate(&device, &reading(55.0, 50.0, "CRITICAL")).await;

        let recipients = channel.last_recipients.lock().unwrap().clone();
        assert!(recipients.contains(&"near@test.com".to_string()));
        assert!(!recipients.contains(&"far@test.com".to_string()));
        assert!(recipients.contains(&"owner@example.com".to_string()));
    }

    #[tokio::test]
    async fn origin_subscriber_without_row_falls_back_to_defaults() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );

        // No subscriptions stored; 55°C still breaches the default 45°C.
        engine
            .evaluate(&device_at(0.0, 0.0), &reading(55.0, 50.0, "CRITICAL"))
            .await;

        assert_eq!(channel.count(), 1);
        let recipients = channel.last_recipients.lock().unwrap().clone();
        assert_eq!(recipients, vec!["owner@example.com".to_string()]);
    }

    #[tokio::test]
    async fn user_threshold_cannot_relax_past_hard_ceiling() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let mut sub = AlertSubscription::defaults_for("lax@test.com");
        sub.temp_threshold = 90.0; // above the 60°C hard ceiling
        storage.upsert_subscription(&sub).await.unwrap();

        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );

        let mut r = reading(65.0, 50.0, "SAFE");
        r.owner_email = None;
        engine.evaluate(&device_at(0.0, 0.0), &r).await;

        // 65°C is under the relaxed user setting but over the ceiling.
        assert_eq!(channel.count(), 1);
    }

    #[tokio::test]
    async fn rain_and_motion_triggers_fire_only_when_enabled() {
        // ---
        let mut wet = reading(25.0, 50.0, "SAFE");
        wet.owner_email = None;
        wet.rain = Some(500.0); // analog below the wet cutoff
        wet.motion = Some(true);

        // Flags enabled: both trigger lines dispatch.
        let storage = Arc::new(MemStorage::new());
        let mut sub = AlertSubscription::defaults_for("field@test.com");
        sub.rain_alerts = true;
        sub.motion_alerts = true;
        storage.upsert_subscription(&sub).await.unwrap();

        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );
        engine.evaluate(&device_at(0.0, 0.0), &wet).await;

        assert_eq!(channel.count(), 1);
        let record = storage.last_alert_record().unwrap();
        assert!(record.message.contains("RAIN DETECTED"));
        assert!(record.message.contains("MOTION DETECTED"));

        // Default flags (both off): the same reading dispatches nothing.
        let quiet_storage = Arc::new(MemStorage::new());
        let defaults = AlertSubscription::defaults_for("field@test.com");
        quiet_storage.upsert_subscription(&defaults).await.unwrap();

        let quiet_channel = RecordingChannel::new("push", true);
        let quiet_engine = engine_with(
            quiet_storage.clone(),
            vec![quiet_channel.clone()],
            Duration::from_secs(300),
        );
        quiet_engine.evaluate(&device_at(0.0, 0.0), &wet).await;

        assert_eq!(quiet_channel.count(), 0);
        assert_eq!(quiet_storage.alert_record_count(), 0);
    }

    #[tokio::test]
    async fn elevated_risk_dispatches_without_any_threshold_breach() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );

        // Nominal values against the default thresholds, but the pipeline
        // classified the reading MODERATE.
        engine
            .evaluate(&device_at(0.0, 0.0), &reading(25.0, 50.0, "MODERATE"))
            .await;

        assert_eq!(channel.count(), 1);
        let record = storage.last_alert_record().unwrap();
        assert_eq!(record.message, "Risk level MODERATE reported");
    }

    #[tokio::test]
    async fn forget_device_clears_cooldown_state() {
        // ---
        let storage = Arc::new(MemStorage::new());
        let channel = RecordingChannel::new("push", true);
        let engine = engine_with(
            storage.clone(),
            vec![channel.clone()],
            Duration::from_secs(300),
        );
        let device = device_at(0.0, 0.0);

        engine.evaluate(&device, &reading(55.0, 50.0, "CRITICAL")).await;
        engine.evaluate(&device, &reading(56.0, 50.0, "CRITICAL")).await;
        assert_eq!(channel.count(), 1, "second dispatch muted by cooldown");

        // Removing the device discards its pair states; a re-registered
        // device starts from Idle.
        engine.forget_device(&device.id);
        engine.evaluate(&device, &reading(57.0, 50.0, "CRITICAL")).await;
        assert_eq!(channel.count(), 2);
    }

    #[test]
    fn haversine_matches_known_distances() {
        // ---
        // Bangalore -> Koramangala, roughly 6 km.
        let d = haversine_km(12.9716, 77.5946, 12.9279, 77.6271);
        assert!((4.0..9.0).contains(&d), "distance was {d}");

        // Bangalore -> Delhi, roughly 1700 km.
        let d = haversine_km(12.9716, 77.5946, 28.7041, 77.1025);
        assert!((1600.0..1850.0).contains(&d), "distance was {d}");

        // Identical points.
        assert!(haversine_km(10.0, 10.0, 10.0, 10.0) < 1e-9);
    }
}

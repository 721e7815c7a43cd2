//! Per-device signal-processing registry.
//!
//! Each device owns one [`DeviceState`] holding its estimators, gas cleaner,
//! outlier detector, trust scorer, and risk assessor. State is created on the
//! first reading from a device and evicted when the device is removed. A
//! per-device async mutex serializes processing so readings from one device
//! are always folded into filter state in arrival order, while different
//! devices process fully in parallel.
//!
//! No two devices ever share filter state: derived fields of a reading are a
//! function of that reading plus this device's bounded history only.

pub mod aqi;
pub mod estimator;
pub mod gas;
pub mod outlier;
pub mod risk;
pub mod trust;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::models::SensorPayload;
use estimator::AdaptiveEstimator;
use gas::{GasCleaner, GasQuality};
use outlier::OutlierDetector;
use risk::{RiskAssessor, RiskReport};
use trust::TrustScorer;

/// Forecast horizon (steps) for the display-only temperature projection.
const FORECAST_STEPS: usize = 10;

// ---

/// Everything the pipeline derives from one raw reading.
#[derive(Debug)]
pub struct Annotated {
    pub kalman_temp: f64,
    pub temp_confidence: f64,
    pub kalman_hum: f64,
    pub hum_confidence: f64,
    pub kalman_pm25: f64,
    pub pm25_confidence: f64,
    pub gas: GasQuality,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub trust_score: f64,
    pub report: RiskReport,
    /// Deterministic physical-bound breaches.
    pub threshold_alerts: Vec<String>,
    pub precautions: Vec<String>,
    /// Short-horizon temperature projection, display only.
    pub temp_forecast: Vec<f64>,
}

/// Filter and model state for a single device.
pub struct DeviceState {
    temp: AdaptiveEstimator,
    humidity: AdaptiveEstimator,
    pm25: AdaptiveEstimator,
    gas: GasCleaner,
    outlier: OutlierDetector,
    trust: TrustScorer,
    risk: RiskAssessor,
}

impl DeviceState {
    fn new(first: &SensorPayload) -> Self {
        // ---
        DeviceState {
            temp: AdaptiveEstimator::new(first.temperature),
            humidity: AdaptiveEstimator::new(first.humidity),
            pm25: AdaptiveEstimator::new(first.pm25),
            gas: GasCleaner::new(),
            outlier: OutlierDetector::new(),
            trust: TrustScorer::new(),
            risk: RiskAssessor::new(),
        }
    }

    fn process(&mut self, payload: &SensorPayload) -> Annotated {
        // ---
        let (kalman_temp, temp_confidence) = self.temp.update(payload.temperature);
        let (kalman_hum, hum_confidence) = self.humidity.update(payload.humidity);
        let (kalman_pm25, pm25_confidence) = self.pm25.update(payload.pm25);
        let gas = self.gas.clean(payload.mq_raw);

        let (threshold_alerts, precautions) = self.outlier.check_thresholds(payload);
        let (is_anomaly, anomaly_score) = self
            .outlier
            .update_and_predict(OutlierDetector::features(payload));

        let trust_score = self.trust.score(payload);

        // Only the statistical model feeds the risk anomaly boost; the
        // deterministic breaches already surface through the alert engine.
        let statistical: Vec<String> = if is_anomaly {
            vec!["Multivariate sensor pattern".to_string()]
        } else {
            Vec::new()
        };
        let report = self.risk.assess(payload, &statistical);

        let temp_forecast = self.temp.predict_future(FORECAST_STEPS);

        Annotated {
            kalman_temp,
            temp_confidence,
            kalman_hum,
            hum_confidence,
            kalman_pm25,
            pm25_confidence,
            gas,
            is_anomaly,
            anomaly_score,
            trust_score,
            report,
            threshold_alerts,
            precautions,
            temp_forecast,
        }
    }
}

// ---

/// Registry of per-device pipeline state, owned by the process.
pub struct Pipeline {
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceState>>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        // ---
        Pipeline {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Run one reading through the full cleaning/annotation chain.
    ///
    /// Holds the device's own lock for the duration of the (pure, fast)
    /// computation; unrelated devices are untouched.
    pub async fn process(&self, device_id: &str, payload: &SensorPayload) -> Annotated {
        // ---
        let state = self.state_for(device_id, payload).await;
        let mut state = state.lock().await;
        state.process(payload)
    }

    /// Drop all filter state for a removed device.
    pub async fn evict(&self, device_id: &str) {
        // ---
        self.devices.write().await.remove(device_id);
    }

    async fn state_for(
        &self,
        device_id: &str,
        payload: &SensorPayload,
    ) -> Arc<Mutex<DeviceState>> {
        // ---
        if let Some(state) = self.devices.read().await.get(device_id) {
            return state.clone();
        }
        let mut devices = self.devices.write().await;
        devices
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceState::new(payload))))
            .clone()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::RiskLevel;

    fn payload(temp: f64, gas: f64) -> SensorPayload {
        // ---
        serde_json::from_value(serde_json::json!({
            "temperature": temp,
            "humidity": 50.0,
            "mq_raw": gas,
            "gas": gas,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn devices_keep_independent_filter_state() {
        // ---
        let pipeline = Pipeline::new();

        // Device A sees a hot signal, device B a cold one.
        for _ in 0..10 {
            pipeline.process("dev-a", &payload(60.0, 100.0)).await;
            pipeline.process("dev-b", &payload(5.0, 100.0)).await;
        }

        let a = pipeline.process("dev-a", &payload(60.0, 100.0)).await;
        let b = pipeline.process("dev-b", &payload(5.0, 100.0)).await;

        assert!(a.kalman_temp > 50.0, "a tracked {}", a.kalman_temp);
        assert!(b.kalman_temp < 15.0, "b tracked {}", b.kalman_temp);
        assert_eq!(a.report.risk_level, RiskLevel::Critical);
        assert_eq!(b.report.risk_level, RiskLevel::Safe);
    }

    #[tokio::test]
    async fn annotations_cover_all_derived_fields() {
        // ---
        let pipeline = Pipeline::new();
        let out = pipeline.process("dev-c", &payload(25.0, 200.0)).await;

        assert!(out.trust_score > 0.0);
        assert!(!out.is_anomaly); // cold start
        assert_eq!(out.anomaly_score, 0.0);
        assert_eq!(out.temp_forecast.len(), FORECAST_STEPS);
        assert!(out.threshold_alerts.is_empty());
        assert_eq!(out.gas.smoothed, 200.0);
    }

    #[tokio::test]
    async fn eviction_resets_device_state() {
        // ---
        let pipeline = Pipeline::new();
        for _ in 0..10 {
            pipeline.process("dev-d", &payload(80.0, 100.0)).await;
        }
        pipeline.evict("dev-d").await;

        // Fresh state seeds from the new first measurement.
        let out = pipeline.process("dev-d", &payload(20.0, 100.0)).await;
        assert!((out.kalman_temp - 20.0).abs() < 2.0);
    }
}

//! Rule-based risk assessment: SAFE/MODERATE/CRITICAL classification,
//! short-horizon trend projection, per-metric sensor-health diagnosis, and
//! the combined free-text insight.
//!
//! All three sub-rules are deterministic and share one bounded history
//! buffer per device (capped at 20 samples).

use std::collections::VecDeque;

use serde::Serialize;

use crate::models::{HealthStatus, RiskLevel, SensorHealth, SensorPayload, Trend};

const HISTORY_CAP: usize = 20;
const TREND_WINDOW: usize = 5;
const HEALTH_WINDOW: usize = 10;
const NOISE_STDDEV: f64 = 20.0;

const TEMP_SLOPE: f64 = 0.5;
const GAS_SLOPE: f64 = 10.0;

// ---

#[derive(Debug, Clone, Copy)]
struct HistoryPoint {
    temperature: f64,
    gas: f64,
    humidity: f64,
}

/// Combined report for one reading.
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub risk_level: RiskLevel,
    pub temp_trend: Trend,
    pub gas_trend: Trend,
    pub health: SensorHealth,
    pub insight: String,
}

/// Per-device rule-based assessor.
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    history: VecDeque<HistoryPoint>,
}

impl RiskAssessor {
    pub fn new() -> Self {
        // ---
        RiskAssessor {
            history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    /// Assess one reading against the buffered history.
    ///
    /// `anomalies` carries the statistical breach descriptions (empty when
    /// the outlier model found nothing or is still cold).
    pub fn assess(&mut self, reading: &SensorPayload, anomalies: &[String]) -> RiskReport {
        // ---
        self.history.push_back(HistoryPoint {
            temperature: reading.temperature,
            gas: reading.gas,
            humidity: reading.humidity,
        });
        if self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        let risk_level = risk_level(reading, anomalies);
        let (temp_trend, gas_trend) = self.trends();
        let health = self.health();
        let insight = insight_text(reading, anomalies, risk_level);

        RiskReport {
            risk_level,
            temp_trend,
            gas_trend,
            health,
            insight,
        }
    }

    /// First-vs-last slope over the last 5 samples. Fewer than 5 samples is
    /// "Stable" for both metrics by definition.
    fn trends(&self) -> (Trend, Trend) {
        // ---
        if self.history.len() < TREND_WINDOW {
            return (Trend::Stable, Trend::Stable);
        }
        let recent: Vec<&HistoryPoint> = self.history.iter().rev().take(TREND_WINDOW).collect();
        // `recent` is newest-first.
        let temp_slope = recent[0].temperature - recent[TREND_WINDOW - 1].temperature;
        let gas_slope = recent[0].gas - recent[TREND_WINDOW - 1].gas;

        let temp_trend = slope_trend(temp_slope, TEMP_SLOPE);
        let gas_trend = slope_trend(gas_slope, GAS_SLOPE);
        (temp_trend, gas_trend)
    }

    /// Stuck/noisy diagnosis over the last 10 samples per metric.
    fn health(&self) -> SensorHealth {
        // ---
        SensorHealth {
            temperature: self.metric_health(|p| p.temperature),
            gas: self.metric_health(|p| p.gas),
            humidity: self.metric_health(|p| p.humidity),
        }
    }

    fn metric_health(&self, select: impl Fn(&HistoryPoint) -> f64) -> HealthStatus {
        // ---
        if self.history.len() < HEALTH_WINDOW {
            return HealthStatus::Ok;
        }
        let values: Vec<f64> = self
            .history
            .iter()
            .rev()
            .take(HEALTH_WINDOW)
            .map(|p| select(p))
            .collect();

        let first = values[0];
        if values.iter().all(|v| *v == first) {
            return HealthStatus::Stuck;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        if variance.sqrt() > NOISE_STDDEV {
            HealthStatus::Noisy
        } else {
            HealthStatus::Ok
        }
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

fn slope_trend(slope: f64, threshold: f64) -> Trend {
    // ---
    if slope > threshold {
        Trend::Rising
    } else if slope < -threshold {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Rule-based risk score:
/// +3 critical temperature or gas band, +1 moderate band, +2 dryness,
/// +2 statistical anomalies. Score >= 3 is CRITICAL, >= 1 MODERATE.
fn risk_level(reading: &SensorPayload, anomalies: &[String]) -> RiskLevel {
    // ---
    let mut score = 0;

    if reading.temperature > 50.0 {
        score += 3;
    } else if reading.temperature > 40.0 {
        score += 1;
    }

    if reading.gas > 1000.0 {
        score += 3;
    } else if reading.gas > 500.0 {
        score += 1;
    }

    // Dryness raises static-electricity risk.
    if reading.humidity < 30.0 {
        score += 2;
    }

    if !anomalies.is_empty() {
        score += 2;
    }

    if score >= 3 {
        RiskLevel::Critical
    } else if score >= 1 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Safe
    }
}

/// Concatenate applicable rule sentences in fixed priority order.
fn insight_text(reading: &SensorPayload, anomalies: &[String], risk: RiskLevel) -> String {
    // ---
    let mut insights: Vec<String> = Vec::new();

    if risk == RiskLevel::Critical {
        insights.push("CRITICAL SAFETY RISK: Immediate Action Required.".to_string());
    }

    if reading.temperature > 45.0 {
        insights.push(
            "High Temperature: Fire risk elevated. Ensure cooling systems are active.".to_string(),
        );
    } else if reading.temperature < 10.0 {
        insights.push("Low Temperature: Check heating systems.".to_string());
    }

    if reading.gas > 1500.0 {
        insights.push("Hazardous Gas Levels: Evacuate area immediately.".to_string());
    } else if reading.gas > 800.0 {
        insights.push("Elevated Gas Levels: Inspect for leaks.".to_string());
    }

    if let Some(ph) = reading.ph {
        if ph < 6.0 {
            insights.push("Acidic pH Detected: Check chemical storage.".to_string());
        } else if ph > 8.5 {
            insights.push("Alkaline pH Detected: Check neutralization.".to_string());
        }
    }

    if !anomalies.is_empty() {
        insights.push(format!(
            "Anomaly Detected: {} behavior is unusual.",
            anomalies.join(", ")
        ));
    }

    if insights.is_empty() {
        "System operating within normal parameters.".to_string()
    } else {
        insights.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn payload(temp: f64, gas: f64, humidity: f64) -> SensorPayload {
        // ---
        serde_json::from_value(serde_json::json!({
            "temperature": temp,
            "humidity": humidity,
            "gas": gas,
        }))
        .unwrap()
    }

    #[test]
    fn critical_temperature_band_scores_critical() {
        // ---
        let mut assessor = RiskAssessor::new();
        let report = assessor.assess(&payload(55.0, 0.0, 50.0), &[]);
        assert_eq!(report.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn moderate_temperature_band_scores_moderate() {
        // ---
        let mut assessor = RiskAssessor::new();
        let report = assessor.assess(&payload(42.0, 0.0, 50.0), &[]);
        assert_eq!(report.risk_level, RiskLevel::Moderate);
    }

    #[test]
    fn nominal_reading_scores_safe() {
        // ---
        let mut assessor = RiskAssessor::new();
        let report = assessor.assess(&payload(25.0, 0.0, 50.0), &[]);
        assert_eq!(report.risk_level, RiskLevel::Safe);
        assert_eq!(report.insight, "System operating within normal parameters.");
    }

    #[test]
    fn dryness_plus_anomaly_reaches_critical() {
        // ---
        let mut assessor = RiskAssessor::new();
        // Humidity < 30 (+2) and anomalies present (+2) -> score 4.
        let report = assessor.assess(&payload(25.0, 0.0, 20.0), &["temperature".to_string()]);
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert!(report.insight.contains("Anomaly Detected"));
    }

    #[test]
    fn trends_are_stable_below_five_samples() {
        // ---
        let mut assessor = RiskAssessor::new();
        for i in 0..4 {
            let report = assessor.assess(&payload(20.0 + i as f64 * 5.0, 0.0, 50.0), &[]);
            assert_eq!(report.temp_trend, Trend::Stable);
            assert_eq!(report.gas_trend, Trend::Stable);
        }
    }

    #[test]
    fn rising_temperature_is_reported_after_five_samples() {
        // ---
        let mut assessor = RiskAssessor::new();
        let mut report = assessor.assess(&payload(20.0, 100.0, 50.0), &[]);
        for i in 1..5 {
            report = assessor.assess(&payload(20.0 + i as f64 * 2.0, 100.0, 50.0), &[]);
        }
        assert_eq!(report.temp_trend, Trend::Rising);
        assert_eq!(report.gas_trend, Trend::Stable);
    }

    #[test]
    fn falling_gas_is_reported() {
        // ---
        let mut assessor = RiskAssessor::new();
        let mut report = assessor.assess(&payload(25.0, 500.0, 50.0), &[]);
        for i in 1..5 {
            report = assessor.assess(&payload(25.0, 500.0 - i as f64 * 50.0, 50.0), &[]);
        }
        assert_eq!(report.gas_trend, Trend::Falling);
    }

    #[test]
    fn stuck_sensor_is_diagnosed_after_ten_identical_samples() {
        // ---
        let mut assessor = RiskAssessor::new();
        let mut report = assessor.assess(&payload(25.0, 200.0, 50.0), &[]);
        for _ in 1..10 {
            report = assessor.assess(&payload(25.0, 200.0, 50.0), &[]);
        }
        assert_eq!(report.health.temperature, HealthStatus::Stuck);
        assert_eq!(report.health.gas, HealthStatus::Stuck);
        assert_eq!(report.health.humidity, HealthStatus::Stuck);
    }

    #[test]
    fn noisy_sensor_is_diagnosed_from_high_stddev() {
        // ---
        let mut assessor = RiskAssessor::new();
        let mut report = assessor.assess(&payload(25.0, 200.0, 50.0), &[]);
        for i in 1..10 {
            // Alternate gas between 100 and 500: stddev 200, well over 20.
            let gas = if i % 2 == 0 { 100.0 } else { 500.0 };
            report = assessor.assess(&payload(25.0, gas, 50.0), &[]);
        }
        assert_eq!(report.health.gas, HealthStatus::Noisy);
    }

    #[test]
    fn health_is_ok_below_ten_samples() {
        // ---
        let mut assessor = RiskAssessor::new();
        let report = assessor.assess(&payload(25.0, 200.0, 50.0), &[]);
        assert_eq!(report.health.temperature, HealthStatus::Ok);
    }

    #[test]
    fn critical_banner_leads_the_insight() {
        // ---
        let mut assessor = RiskAssessor::new();
        let report = assessor.assess(&payload(55.0, 2000.0, 20.0), &[]);
        assert!(report.insight.starts_with("CRITICAL SAFETY RISK"));
        assert!(report.insight.contains("High Temperature"));
        assert!(report.insight.contains("Hazardous Gas Levels"));
    }
}

//! Online multi-dimensional outlier detection.
//!
//! Feature vectors are rescaled to known physical ranges, accumulated in a
//! rolling window, and scored with an isolation forest once enough history
//! exists. Until the window reaches the minimum size every input is reported
//! as "not anomalous, score 0" (cold start). The forest is fit exactly once
//! when the minimum is reached and is never refit for the life of the
//! process; a restart re-learns within the warm-up window.
//!
//! Deterministic physical-bound checks live alongside the statistical model
//! in [`OutlierDetector::check_thresholds`].

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::SensorPayload;

/// Number of feature dimensions scored by the model.
pub const FEATURE_DIMS: usize = 11;

/// Window capacity; oldest vectors are evicted beyond this.
const WINDOW_CAP: usize = 1000;

/// Minimum samples before the model is fit.
const MIN_SAMPLES: usize = 50;

const N_TREES: usize = 100;
const SAMPLE_SIZE: usize = 256;

/// Isolation score above which a vector is labelled anomalous.
const ANOMALY_SCORE: f64 = 0.6;

// Linear rescale bounds per dimension:
// [temp, pressure, vibration, wind, uv, soil_temp, soil_moist, pm25, pm10, no2, solar]
const MIN_VALS: [f64; FEATURE_DIMS] = [
    -10.0, 900.0, 0.0, 0.0, 0.0, -10.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];
const MAX_VALS: [f64; FEATURE_DIMS] = [
    100.0, 1100.0, 20.0, 150.0, 15.0, 60.0, 1.0, 500.0, 500.0, 200.0, 1500.0,
];

// ---

/// Fixed physical bounds for the deterministic threshold checks.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub temp_max: f64,
    pub temp_min: f64,
    pub vibration_max: f64,
    pub pressure_min: f64,
    pub wind_max: f64,
    pub uv_max: f64,
    pub pm25_max: f64,
    pub ph_min: f64,
    pub ph_max: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        // ---
        ThresholdConfig {
            temp_max: 80.0,
            temp_min: -10.0,
            vibration_max: 5.0,
            pressure_min: 900.0,
            wind_max: 50.0,
            uv_max: 10.0,
            pm25_max: 150.0,
            ph_min: 1.0,
            ph_max: 14.0,
        }
    }
}

// ---

/// Rolling-window isolation-forest detector for one device.
pub struct OutlierDetector {
    window: VecDeque<[f64; FEATURE_DIMS]>,
    forest: Option<IsolationForest>,
    config: ThresholdConfig,
}

impl OutlierDetector {
    pub fn new() -> Self {
        // ---
        OutlierDetector {
            window: VecDeque::with_capacity(WINDOW_CAP),
            forest: None,
            config: ThresholdConfig::default(),
        }
    }

    /// Extract the scored feature vector from an ingestion payload.
    pub fn features(payload: &SensorPayload) -> [f64; FEATURE_DIMS] {
        // ---
        [
            payload.temperature,
            payload.pressure,
            payload.vibration,
            payload.wind_speed,
            payload.uv_index,
            0.0, // soil temperature: not reported by current hardware
            0.0, // soil moisture
            payload.pm25,
            0.0, // pm10
            0.0, // no2
            0.0, // solar radiation
        ]
    }

    /// Append one feature vector and classify it.
    ///
    /// Returns `(is_anomaly, score)`; `(false, 0.0)` during cold start.
    pub fn update_and_predict(&mut self, features: [f64; FEATURE_DIMS]) -> (bool, f64) {
        // ---
        let scaled = scale(features);
        self.window.push_back(scaled);
        if self.window.len() > WINDOW_CAP {
            self.window.pop_front();
        }

        if self.forest.is_none() && self.window.len() >= MIN_SAMPLES {
            let data: Vec<[f64; FEATURE_DIMS]> = self.window.iter().copied().collect();
            self.forest = Some(IsolationForest::fit(&data));
        }

        match &self.forest {
            Some(forest) => {
                let score = forest.score(&scaled);
                (score > ANOMALY_SCORE, score)
            }
            None => (false, 0.0),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.forest.is_some()
    }

    /// Evaluate fixed physical bounds against the raw payload.
    ///
    /// Deterministic rule logic, independent of the statistical model.
    /// Returns the breach descriptions and matching safety precautions.
    pub fn check_thresholds(&self, data: &SensorPayload) -> (Vec<String>, Vec<String>) {
        // ---
        let cfg = &self.config;
        let mut alerts = Vec::new();
        let mut precautions = Vec::new();

        if data.temperature > cfg.temp_max {
            alerts.push(format!("Temperature High (> {}°C)", cfg.temp_max));
            precautions.push("Hydrate immediately and avoid direct sunlight.".to_string());
            precautions.push("Check device cooling systems.".to_string());
        } else if data.temperature < cfg.temp_min {
            alerts.push(format!("Temperature Low (< {}°C)", cfg.temp_min));
            precautions.push("Ensure thermal insulation is active.".to_string());
        }

        if data.vibration > cfg.vibration_max {
            alerts.push(format!("Vibration Critical (> {})", cfg.vibration_max));
            precautions.push("Inspect mounting integrity immediately.".to_string());
            precautions.push("Possible bearing failure - schedule maintenance.".to_string());
        }

        if data.pressure < cfg.pressure_min {
            alerts.push(format!("Pressure Drop (< {}hPa)", cfg.pressure_min));
            precautions.push("Check for vacuum leaks or seal breaches.".to_string());
        }

        if data.wind_speed > cfg.wind_max {
            alerts.push(format!("High Wind (> {}km/h)", cfg.wind_max));
            precautions.push("Secure loose outdoor equipment.".to_string());
            precautions.push("Halt crane/aerial operations.".to_string());
        }

        if data.uv_index > cfg.uv_max {
            alerts.push(format!("Extreme UV (> {})", cfg.uv_max));
            precautions.push("Wear UV-protective gear and eye protection.".to_string());
            precautions.push("Limit exposure to < 10 minutes.".to_string());
        }

        if data.pm25 > cfg.pm25_max {
            alerts.push(format!("Hazardous Air Quality (PM2.5 > {})", cfg.pm25_max));
            precautions.push("Wear N95/N99 respirator masks.".to_string());
            precautions.push("Activate air filtration systems immediately.".to_string());
        }

        if let Some(ph) = data.ph {
            if ph < cfg.ph_min {
                alerts.push(format!("pH Critical Low (< {})", cfg.ph_min));
                precautions.push("Neutralize acid immediately.".to_string());
            } else if ph > cfg.ph_max {
                alerts.push(format!("pH Critical High (> {})", cfg.ph_max));
                precautions.push("Neutralize base immediately.".to_string());
            }
        }

        (alerts, precautions)
    }
}

impl Default for OutlierDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn scale(features: [f64; FEATURE_DIMS]) -> [f64; FEATURE_DIMS] {
    // ---
    let mut scaled = [0.0; FEATURE_DIMS];
    for i in 0..FEATURE_DIMS {
        scaled[i] = (features[i] - MIN_VALS[i]) / (MAX_VALS[i] - MIN_VALS[i]);
    }
    scaled
}

// ---

/// Isolation forest over fixed-size feature vectors.
///
/// Anomaly score is `2^(-E[h(x)] / c(n))`: short average path lengths mean a
/// point is easy to isolate and therefore anomalous.
struct IsolationForest {
    trees: Vec<IsolationNode>,
    expected_path: f64,
}

enum IsolationNode {
    Split {
        dim: usize,
        value: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationForest {
    fn fit(data: &[[f64; FEATURE_DIMS]]) -> Self {
        // ---
        let mut rng = StdRng::from_entropy();
        let sample_size = data.len().min(SAMPLE_SIZE);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..N_TREES)
            .map(|_| {
                let mut sample: Vec<[f64; FEATURE_DIMS]> = Vec::with_capacity(sample_size);
                for _ in 0..sample_size {
                    sample.push(data[rng.gen_range(0..data.len())]);
                }
                build_node(&sample, 0, max_depth, &mut rng)
            })
            .collect();

        IsolationForest {
            trees,
            expected_path: avg_path_length(sample_size),
        }
    }

    fn score(&self, point: &[f64; FEATURE_DIMS]) -> f64 {
        // ---
        let total: f64 = self.trees.iter().map(|t| path_length(t, point, 0)).sum();
        let avg_depth = total / self.trees.len() as f64;
        2.0_f64.powf(-avg_depth / self.expected_path)
    }
}

fn build_node(
    data: &[[f64; FEATURE_DIMS]],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> IsolationNode {
    // ---
    if data.len() <= 1 || depth >= max_depth {
        return IsolationNode::Leaf { size: data.len() };
    }

    // Choose among dimensions that still have spread at this node.
    let mut candidates = Vec::new();
    for dim in 0..FEATURE_DIMS {
        let min = data.iter().map(|p| p[dim]).fold(f64::MAX, f64::min);
        let max = data.iter().map(|p| p[dim]).fold(f64::MIN, f64::max);
        if (max - min).abs() > 1e-12 {
            candidates.push((dim, min, max));
        }
    }
    if candidates.is_empty() {
        return IsolationNode::Leaf { size: data.len() };
    }

    let (dim, min, max) = candidates[rng.gen_range(0..candidates.len())];
    let value = rng.gen_range(min..max);

    let left_data: Vec<[f64; FEATURE_DIMS]> =
        data.iter().filter(|p| p[dim] < value).copied().collect();
    let right_data: Vec<[f64; FEATURE_DIMS]> =
        data.iter().filter(|p| p[dim] >= value).copied().collect();

    IsolationNode::Split {
        dim,
        value,
        left: Box::new(build_node(&left_data, depth + 1, max_depth, rng)),
        right: Box::new(build_node(&right_data, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &IsolationNode, point: &[f64; FEATURE_DIMS], depth: usize) -> f64 {
    // ---
    match node {
        IsolationNode::Leaf { size } => depth as f64 + avg_path_length(*size),
        IsolationNode::Split {
            dim,
            value,
            left,
            right,
        } => {
            if point[*dim] < *value {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

/// Average path length of unsuccessful BST search in a tree of `n` nodes;
/// the standard isolation-forest normalization term.
fn avg_path_length(n: usize) -> f64 {
    // ---
    const EULER: f64 = 0.577_215_664_901_532_9;
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER) - 2.0 * (n - 1.0) / n
        }
    }
}

//! Heuristic trust scoring for individual readings.
//!
//! Starts each reading at 100 and deducts for physics-range violations and
//! sudden temperature swings against recent history. Bounded per-device
//! history, capped at 20 samples.

use std::collections::VecDeque;

use crate::models::SensorPayload;

const HISTORY_CAP: usize = 20;
const STABILITY_WINDOW: usize = 5;
const STABILITY_SWING: f64 = 10.0;

// ---

/// Per-device 0-100 plausibility/stability scorer.
#[derive(Debug, Clone)]
pub struct TrustScorer {
    temp_history: VecDeque<f64>,
}

impl TrustScorer {
    pub fn new() -> Self {
        // ---
        TrustScorer {
            temp_history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    /// Score one reading and fold it into the history.
    pub fn score(&mut self, reading: &SensorPayload) -> f64 {
        // ---
        let mut score: f64 = 100.0;

        // Physics range checks.
        if !(-50.0..=100.0).contains(&reading.temperature) {
            score -= 30.0;
        }
        if !(0.0..=100.0).contains(&reading.humidity) {
            score -= 20.0;
        }
        if reading.pm25 < 0.0 {
            score -= 20.0;
        }

        // Stability: sudden swing against the mean of the last 5 samples.
        if self.temp_history.len() >= STABILITY_WINDOW {
            let recent: Vec<f64> = self
                .temp_history
                .iter()
                .rev()
                .take(STABILITY_WINDOW)
                .copied()
                .collect();
            let mean = recent.iter().sum::<f64>() / recent.len() as f64;
            if (reading.temperature - mean).abs() > STABILITY_SWING {
                score -= 15.0;
            }
        }

        self.temp_history.push_back(reading.temperature);
        if self.temp_history.len() > HISTORY_CAP {
            self.temp_history.pop_front();
        }

        score.clamp(0.0, 100.0)
    }
}

impl Default for TrustScorer {
    fn default() -> Self {
        Self::new()
    }
}

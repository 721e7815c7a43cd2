//! Moving-average cleaner for the raw MQ gas channel.
//!
//! Keeps a fixed 5-sample window per device. The window is seeded with the
//! first value repeated so the very first reading can never flag as an
//! outlier (its z-score is zero by construction).

use serde::Serialize;

const WINDOW: usize = 5;
const Z_OUTLIER: f64 = 2.0;

// ---

/// Result of cleaning one raw gas sample.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GasQuality {
    pub smoothed: f64,
    pub is_outlier: bool,
    pub z_score: f64,
}

/// Fixed-window smoother + z-score outlier flag for one device's gas channel.
#[derive(Debug, Clone)]
pub struct GasCleaner {
    buffer: Option<[f64; WINDOW]>,
}

impl GasCleaner {
    pub fn new() -> Self {
        GasCleaner { buffer: None }
    }

    pub fn clean(&mut self, raw: f64) -> GasQuality {
        // ---
        let buf = self.buffer.get_or_insert([raw; WINDOW]);
        buf.rotate_left(1);
        buf[WINDOW - 1] = raw;

        let mean = buf.iter().sum::<f64>() / WINDOW as f64;
        let variance = buf.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / WINDOW as f64;
        let std_dev = variance.sqrt();

        let z_score = if std_dev > 0.0 {
            (raw - mean) / std_dev
        } else {
            0.0
        };

        GasQuality {
            smoothed: mean,
            is_outlier: z_score.abs() > Z_OUTLIER,
            z_score,
        }
    }
}

impl Default for GasCleaner {
    fn default() -> Self {
        Self::new()
    }
}

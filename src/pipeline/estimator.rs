//! Adaptive position/velocity state estimator for a single scalar metric.
//!
//! One instance exists per (device, metric). The filter tracks a two-element
//! state `[value, rate-of-change]` under a constant-velocity model and widens
//! its process noise whenever the residual between prediction and measurement
//! exceeds a fixed threshold, so a real transient (a genuine temperature
//! spike) is followed quickly while steady-state jitter stays smoothed.

/// Residual above which the filter switches to the fast-tracking noise level.
const RESIDUAL_THRESHOLD: f64 = 2.0;

/// Process noise while smoothing (model trusted).
const Q_SMOOTH: f64 = 0.01;

/// Process noise while tracking a transient (measurement trusted).
const Q_TRACK: f64 = 1.0;

/// Measurement noise; deliberately high so steady-state output is smooth.
const R_MEASURE: f64 = 5.0;

// ---

/// 2-state Kalman filter with residual-adaptive process noise.
#[derive(Debug, Clone)]
pub struct AdaptiveEstimator {
    /// State: [value, velocity].
    x: [f64; 2],
    /// Covariance, row-major 2x2.
    p: [[f64; 2]; 2],
    /// Current process-noise level for the value term.
    q: f64,
}

impl AdaptiveEstimator {
    pub fn new(initial_value: f64) -> Self {
        // ---
        AdaptiveEstimator {
            x: [initial_value, 0.0],
            p: [[10.0, 0.0], [0.0, 10.0]],
            q: Q_SMOOTH,
        }
    }

    /// Incorporate one measurement. Returns `(estimate, uncertainty)` where
    /// the uncertainty is the posterior standard deviation of the value term.
    pub fn update(&mut self, measurement: f64) -> (f64, f64) {
        // ---
        self.predict();

        // Adaptive step: a large residual means the signal is moving faster
        // than the model expects, so raise Q for the following cycles.
        let residual = (measurement - self.x[0]).abs();
        self.q = if residual > RESIDUAL_THRESHOLD {
            Q_TRACK
        } else {
            Q_SMOOTH
        };

        // Correction with H = [1, 0].
        let s = self.p[0][0] + R_MEASURE;
        let k = [self.p[0][0] / s, self.p[1][0] / s];
        let innovation = measurement - self.x[0];
        self.x[0] += k[0] * innovation;
        self.x[1] += k[1] * innovation;

        // P = (I - K H) P
        let p00 = (1.0 - k[0]) * self.p[0][0];
        let p01 = (1.0 - k[0]) * self.p[0][1];
        let p10 = self.p[1][0] - k[1] * self.p[0][0];
        let p11 = self.p[1][1] - k[1] * self.p[0][1];
        self.p = [[p00, p01], [p10, p11]];

        (self.x[0], self.p[0][0].max(0.0).sqrt())
    }

    /// Run the prediction step `steps` times without incorporating new
    /// measurements and without mutating stored state. Display-only; never
    /// used for alerting.
    pub fn predict_future(&self, steps: usize) -> Vec<f64> {
        // ---
        let mut x = self.x;
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            x = [x[0] + x[1], x[1]];
            out.push(x[0]);
        }
        out
    }

    /// Current process-noise level (exposed for diagnostics).
    pub fn process_noise(&self) -> f64 {
        self.q
    }

    fn predict(&mut self) {
        // ---
        // x = F x with F = [[1, 1], [0, 1]]
        self.x = [self.x[0] + self.x[1], self.x[1]];

        // P = F P F^T + Q  (Q applied to the value term only)
        let p00 = self.p[0][0] + self.p[1][0] + self.p[0][1] + self.p[1][1] + self.q;
        let p01 = self.p[0][1] + self.p[1][1];
        let p10 = self.p[1][0] + self.p[1][1];
        let p11 = self.p[1][1];
        self.p = [[p00, p01], [p10, p11]];
    }
}

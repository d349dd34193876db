//! Estimation accuracy: RMSE of position and velocity against ground truth.

use serde::{Deserialize, Serialize};

/// Accumulated error statistics of one filter run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EstimationMetrics {
    /// Number of samples evaluated
    pub n_samples: u64,
    /// Sum of squared position errors (for RMSE)
    pub sum_sq_pos_err: f64,
    /// Sum of squared velocity errors (for RMSE)
    pub sum_sq_vel_err: f64,
    /// Largest position error seen (m)
    pub max_pos_err: f64,
}

impl EstimationMetrics {
    /// Add one sample; positions and velocities are `[x, y]`.
    pub fn record(
        &mut self,
        true_pos: [f64; 2],
        est_pos: [f64; 2],
        true_vel: [f64; 2],
        est_vel: [f64; 2],
    ) {
        let pos_sq = (true_pos[0] - est_pos[0]).powi(2) + (true_pos[1] - est_pos[1]).powi(2);
        let vel_sq = (true_vel[0] - est_vel[0]).powi(2) + (true_vel[1] - est_vel[1]).powi(2);
        self.n_samples += 1;
        self.sum_sq_pos_err += pos_sq;
        self.sum_sq_vel_err += vel_sq;
        self.max_pos_err = self.max_pos_err.max(pos_sq.sqrt());
    }

    /// Root-mean-square position error (meters, 2D).
    pub fn rmse_position(&self) -> f64 {
        if self.n_samples == 0 {
            return 0.0;
        }
        (self.sum_sq_pos_err / self.n_samples as f64).sqrt()
    }

    /// Root-mean-square velocity error (m/s, 2D).
    pub fn rmse_velocity(&self) -> f64 {
        if self.n_samples == 0 {
            return 0.0;
        }
        (self.sum_sq_vel_err / self.n_samples as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rmse_of_constant_offset() {
        let mut m = EstimationMetrics::default();
        assert_eq!(m.rmse_position(), 0.0);
        for _ in 0..4 {
            m.record([0.0, 0.0], [3.0, 4.0], [1.0, 1.0], [1.0, 2.0]);
        }
        assert_abs_diff_eq!(m.rmse_position(), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.rmse_velocity(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.max_pos_err, 5.0, epsilon = 1e-12);
        assert_eq!(m.n_samples, 4);
    }
}

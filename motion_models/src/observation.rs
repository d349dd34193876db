//! Range / bearing observation of a constant-velocity target.
//!
//! z = [range, bearing] relative to a fixed sensor, bearing measured
//! counter-clockwise from the +x axis. The state is the 2-axis CV layout
//! `[x, vx, y, vy]`.

use crate::kinematic::cv_transition;
use estimator_core::{AdditiveModel, DMat, DVec};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Ranges below this are clamped when forming the Jacobian.
const MIN_RANGE: f64 = 1e-3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RangeBearing2D {
    /// Sensor position in world frame (x, y)
    pub sensor_pos: [f64; 2],
    pub dt: f64,
}

impl RangeBearing2D {
    pub fn new(sensor_pos: [f64; 2], dt: f64) -> Self {
        Self { sensor_pos, dt }
    }

    /// Convert `[range, bearing]` to world `[x, y]`.
    pub fn polar_to_cartesian(&self, range: f64, bearing: f64) -> (f64, f64) {
        (
            self.sensor_pos[0] + range * bearing.cos(),
            self.sensor_pos[1] + range * bearing.sin(),
        )
    }

    /// `[range, bearing]` of a world position.
    pub fn cartesian_to_polar(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.sensor_pos[0];
        let dy = y - self.sensor_pos[1];
        (dx.hypot(dy), dy.atan2(dx))
    }

    /// Shift the bearing of `z` by whole turns so it lies within π of the
    /// bearing predicted from `x`. Apply before `correct` near the ±π seam.
    pub fn unwrap_measurement(&self, z: &DVec, x: &DVec) -> DVec {
        let predicted = self.h(x)[1];
        let mut out = z.clone();
        out[1] = predicted + wrap_angle(z[1] - predicted);
        out
    }
}

/// Wrap an angle into `[-π, π)`.
pub fn wrap_angle(a: f64) -> f64 {
    (a + PI).rem_euclid(2.0 * PI) - PI
}

impl AdditiveModel for RangeBearing2D {
    fn f(&self, x: &DVec, _u: Option<&DVec>) -> DVec {
        cv_transition(2, self.dt) * x
    }

    fn h(&self, x: &DVec) -> DVec {
        let (r, b) = self.cartesian_to_polar(x[0], x[2]);
        DVec::from_vec(vec![r, b])
    }

    fn f_jacobian(&self, _x: &DVec, _u: Option<&DVec>) -> DMat {
        cv_transition(2, self.dt)
    }

    fn h_jacobian(&self, x: &DVec) -> DMat {
        let dx = x[0] - self.sensor_pos[0];
        let dy = x[2] - self.sensor_pos[1];
        let r = dx.hypot(dy).max(MIN_RANGE);
        let r2 = r * r;

        // ∂r/∂x = dx/r, ∂r/∂y = dy/r, ∂b/∂x = -dy/r², ∂b/∂y = dx/r²
        DMat::from_row_slice(2, 4, &[
             dx / r,  0., dy / r,  0.,
            -dy / r2, 0., dx / r2, 0.,
        ])
    }
}

//! Kinematic motion models: polynomial (CV / CA) and coordinated turn.
//!
//! # State layout
//! Polynomial models stack one block per axis, each block ordered by
//! derivative: `[x, vx, (ax), y, vy, (ay), ...]`. `axes` is the number of
//! spatial axes (1, 2 or 3).
//!
//! The nonlinear coordinated-turn state is `[x, vx, y, vy, ω (, z, vz)]` with
//! the turn rate `ω` in **degrees per second**.

use estimator_core::{AdditiveModel, DMat, DVec, FilterError, Result};

/// Below this turn rate (rad/s) the straight-line limit of the CT equations is used.
const MIN_TURN_RATE: f64 = 1e-6;

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// `blkdiag(w₀·B, w₁·B, ...)`
fn block_diag_scaled(weights: &[f64], block: &DMat) -> DMat {
    let (br, bc) = block.shape();
    let mut out = DMat::zeros(br * weights.len(), bc * weights.len());
    for (i, w) in weights.iter().enumerate() {
        out.view_mut((i * br, i * bc), (br, bc)).copy_from(&(block * *w));
    }
    out
}

fn block_diag(blocks: &[&DMat]) -> DMat {
    let rows = blocks.iter().map(|b| b.nrows()).sum();
    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMat::zeros(rows, cols);
    let (mut r, mut c) = (0, 0);
    for b in blocks {
        out.view_mut((r, c), b.shape()).copy_from(*b);
        r += b.nrows();
        c += b.ncols();
    }
    out
}

// ---------------------------------------------------------------------------
// Polynomial (CV / CA) models
// ---------------------------------------------------------------------------

/// Transition matrix of a polynomial model of the given `order`
/// (1 = constant velocity, 2 = constant acceleration).
pub fn poly_transition(order: usize, axes: usize, dt: f64) -> DMat {
    let n = order + 1;
    let mut base = DMat::zeros(n, n);
    for r in 0..n {
        for c in r..n {
            let k = c - r;
            base[(r, c)] = dt.powi(k as i32) / factorial(k);
        }
    }
    block_diag_scaled(&vec![1.0; axes], &base)
}

/// Process noise of the continuous white-noise model, intensity `std²` on the
/// highest derivative, discretized over `dt`.
pub fn poly_noise_dc(order: usize, axes: usize, dt: f64, std: f64) -> DMat {
    let n = order + 1;
    let mut base = DMat::zeros(n, n);
    for r in 0..n {
        for c in 0..n {
            let (pr, pc) = (order - r, order - c);
            let p = pr + pc + 1;
            base[(r, c)] = dt.powi(p as i32) / (factorial(pr) * factorial(pc) * p as f64);
        }
    }
    block_diag_scaled(&vec![std * std; axes], &base)
}

/// Process noise of the discrete white-noise model: a piecewise-constant
/// disturbance on derivative `order + ht` per step, `Q = L·Lᵀ·std²`.
///
/// `ht = 1` disturbs the next-higher derivative (the usual CV choice),
/// `ht = 0` disturbs the highest modelled derivative (the usual CA choice).
pub fn poly_noise_dd(order: usize, axes: usize, dt: f64, std: f64, ht: usize) -> DMat {
    let l = DVec::from_iterator(
        order + 1,
        (0..=order).map(|i| {
            let p = ht + order - i;
            dt.powi(p as i32) / factorial(p)
        }),
    );
    block_diag_scaled(&vec![std * std; axes], &(&l * l.transpose()))
}

/// Observation matrix that picks the position of every axis.
pub fn position_observation(order: usize, axes: usize) -> DMat {
    let n = (order + 1) * axes;
    let mut h = DMat::zeros(axes, n);
    for a in 0..axes {
        h[(a, a * (order + 1))] = 1.0;
    }
    h
}

/// Diagonal measurement covariance from per-axis standard deviations.
pub fn position_noise(stds: &[f64]) -> DMat {
    DMat::from_diagonal(&DVec::from_iterator(stds.len(), stds.iter().map(|s| s * s)))
}

pub fn cv_transition(axes: usize, dt: f64) -> DMat {
    poly_transition(1, axes, dt)
}

pub fn cv_noise(axes: usize, dt: f64, std: f64) -> DMat {
    poly_noise_dd(1, axes, dt, std, 1)
}

pub fn cv_observation(axes: usize) -> DMat {
    position_observation(1, axes)
}

pub fn ca_transition(axes: usize, dt: f64) -> DMat {
    poly_transition(2, axes, dt)
}

pub fn ca_noise(axes: usize, dt: f64, std: f64) -> DMat {
    poly_noise_dd(2, axes, dt, std, 0)
}

pub fn ca_observation(axes: usize) -> DMat {
    position_observation(2, axes)
}

// ---------------------------------------------------------------------------
// Coordinated turn
// ---------------------------------------------------------------------------

/// `(sin ωT / ω, (cos ωT − 1) / ω)` with the straight-line limit at ω → 0.
fn turn_terms(omega: f64, dt: f64) -> (f64, f64) {
    if omega.abs() < MIN_TURN_RATE {
        (dt, 0.0)
    } else {
        let wt = omega * dt;
        (wt.sin() / omega, (wt.cos() - 1.0) / omega)
    }
}

fn ct_block(omega: f64, dt: f64) -> DMat {
    let (sin_div, cos_div) = turn_terms(omega, dt);
    let (s, c) = ((omega * dt).sin(), (omega * dt).cos());
    DMat::from_row_slice(
        4,
        4,
        &[
            1.0, sin_div, 0.0, cos_div,
            0.0, c, 0.0, -s,
            0.0, -cos_div, 1.0, sin_div,
            0.0, s, 0.0, c,
        ],
    )
}

/// Linear coordinated-turn transition for a known turn rate (degrees/s).
///
/// State `[x, vx, y, vy (, z, vz)]`; the optional z axis moves at constant velocity.
pub fn ct2d_transition(axes: usize, turn_rate_deg: f64, dt: f64) -> DMat {
    let f = ct_block(turn_rate_deg.to_radians(), dt);
    if axes == 3 {
        block_diag(&[&f, &cv_transition(1, dt)])
    } else {
        f
    }
}

/// Process noise of [`CoordinatedTurn2D`]: white acceleration on each
/// position axis (`accel_std`) and a white turn-rate increment (`turn_std`, deg/s).
pub fn ct2d_noise(axes: usize, dt: f64, accel_std: f64, turn_std: f64) -> DMat {
    let g = DMat::from_column_slice(2, 1, &[dt * dt / 2.0, dt]);
    let w = DMat::from_element(1, 1, dt);
    let (l, stds) = if axes == 3 {
        (block_diag(&[&g, &g, &w, &g]), vec![accel_std, accel_std, turn_std, accel_std])
    } else {
        (block_diag(&[&g, &g, &w]), vec![accel_std, accel_std, turn_std])
    };
    &l * position_noise(&stds) * l.transpose()
}

/// Nonlinear coordinated turn with the turn rate as a state.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatedTurn2D {
    /// 2 for `[x, vx, y, vy, ω]`, 3 adds `[z, vz]`
    axes: usize,
    dt: f64,
}

impl CoordinatedTurn2D {
    /// Fails unless `axes` is 2 or 3.
    pub fn new(axes: usize, dt: f64) -> Result<Self> {
        if axes != 2 && axes != 3 {
            return Err(FilterError::DimensionMismatch {
                context: "coordinated turn axes",
                expected: 2,
                actual: axes,
            });
        }
        Ok(Self { axes, dt })
    }

    pub fn axes(&self) -> usize {
        self.axes
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn xdim(&self) -> usize {
        if self.axes == 3 {
            7
        } else {
            5
        }
    }

    /// Position observation matrix skipping the turn-rate column.
    pub fn observation(&self) -> DMat {
        let mut h = DMat::zeros(self.axes, self.xdim());
        h[(0, 0)] = 1.0;
        h[(1, 2)] = 1.0;
        if self.axes == 3 {
            h[(2, 5)] = 1.0;
        }
        h
    }

    fn full_transition(&self, turn_rate_deg: f64) -> DMat {
        let one = DMat::identity(1, 1);
        let f = ct_block(turn_rate_deg.to_radians(), self.dt);
        if self.axes == 3 {
            block_diag(&[&f, &one, &cv_transition(1, self.dt)])
        } else {
            block_diag(&[&f, &one])
        }
    }
}

impl AdditiveModel for CoordinatedTurn2D {
    fn state_dim(&self) -> Option<usize> {
        Some(self.xdim())
    }

    fn f(&self, x: &DVec, _u: Option<&DVec>) -> DVec {
        self.full_transition(x[4]) * x
    }

    fn h(&self, x: &DVec) -> DVec {
        self.observation() * x
    }

    fn f_jacobian(&self, x: &DVec, _u: Option<&DVec>) -> DMat {
        let mut jac = self.full_transition(x[4]);
        let (vx, vy) = (x[1], x[3]);
        let omega = x[4].to_radians();
        let dt = self.dt;
        let col = if omega.abs() < MIN_TURN_RATE {
            [-vy * dt * dt / 2.0, -vy * dt, vx * dt * dt / 2.0, vx * dt]
        } else {
            let wt = omega * dt;
            let (s, c) = (wt.sin(), wt.cos());
            let w2 = omega * omega;
            [
                ((wt * c - s) * vx + (1.0 - c - wt * s) * vy) / w2,
                (-vx * s - vy * c) * dt,
                (wt * (vx * s + vy * c) - (vx * (1.0 - c) + vy * s)) / w2,
                (vx * c - vy * s) * dt,
            ]
        };
        // ω is carried in degrees
        let scale = 1f64.to_radians();
        for (i, v) in col.iter().enumerate() {
            jac[(i, 4)] = v * scale;
        }
        jac
    }

    fn h_jacobian(&self, _x: &DVec) -> DMat {
        self.observation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use estimator_core::{numdiff, AdditiveEkf, EkfConfig};

    #[test]
    fn cv_matrices() {
        let f = cv_transition(2, 0.5);
        assert_eq!(f.shape(), (4, 4));
        assert_eq!(f[(0, 1)], 0.5);
        assert_eq!(f[(2, 3)], 0.5);
        assert_eq!(f[(0, 2)], 0.0);

        let q = cv_noise(1, 2.0, 1.0);
        // L = [T²/2, T]
        assert_abs_diff_eq!(q, DMat::from_row_slice(2, 2, &[4.0, 4.0, 4.0, 4.0]), epsilon = 1e-12);

        let h = cv_observation(3);
        assert_eq!(h.shape(), (3, 6));
        assert_eq!(h[(1, 2)], 1.0);
        assert_eq!(h[(2, 4)], 1.0);
    }

    #[test]
    fn ca_transition_has_half_t_squared() {
        let f = ca_transition(1, 2.0);
        let expected = DMat::from_row_slice(3, 3, &[1.0, 2.0, 2.0, 0.0, 1.0, 2.0, 0.0, 0.0, 1.0]);
        assert_abs_diff_eq!(f, expected, epsilon = 1e-12);
    }

    #[test]
    fn continuous_noise_matches_textbook_cv() {
        let t: f64 = 0.1;
        let q = poly_noise_dc(1, 1, t, 2.0);
        let expected = DMat::from_row_slice(
            2,
            2,
            &[t.powi(3) / 3.0, t * t / 2.0, t * t / 2.0, t],
        ) * 4.0;
        assert_abs_diff_eq!(q, expected, epsilon = 1e-12);
    }

    #[test]
    fn ct_transition_with_zero_rate_is_cv() {
        assert_abs_diff_eq!(ct2d_transition(2, 0.0, 1.5), cv_transition(2, 1.5), epsilon = 1e-12);
        assert_eq!(ct2d_transition(3, 10.0, 1.0).shape(), (6, 6));
    }

    #[test]
    fn quarter_turn_rotates_velocity() {
        let model = CoordinatedTurn2D::new(2, 1.0).unwrap();
        let x = DVec::from_vec(vec![0.0, 10.0, 0.0, 0.0, 90.0]);
        let next = model.f(&x, None);
        assert_abs_diff_eq!(next[1], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(next[3], 10.0, epsilon = 1e-9);
        // arc of radius v/ω
        let radius = 10.0 / 90f64.to_radians();
        assert_abs_diff_eq!(next[0], radius, epsilon = 1e-9);
        assert_abs_diff_eq!(next[2], radius, epsilon = 1e-9);
        assert_eq!(next[4], 90.0);
    }

    #[test]
    fn analytic_jacobian_matches_numeric() {
        let model = CoordinatedTurn2D::new(3, 0.5).unwrap();
        let x = DVec::from_vec(vec![100.0, 20.0, -50.0, 5.0, 12.0, 10.0, 1.0]);
        let analytic = model.f_jacobian(&x, None);
        let numeric = numdiff::jacobian(|s| model.f(s, None), &x);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-5);
    }

    #[test]
    fn jacobian_straight_line_limit() {
        let model = CoordinatedTurn2D::new(2, 2.0).unwrap();
        let x = DVec::from_vec(vec![0.0, 3.0, 0.0, 4.0, 0.0]);
        let jac = model.f_jacobian(&x, None);
        let k = 1f64.to_radians();
        assert_abs_diff_eq!(jac[(0, 4)], -4.0 * 2.0 * k, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[(1, 4)], -8.0 * k, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[(2, 4)], 3.0 * 2.0 * k, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[(3, 4)], 6.0 * k, epsilon = 1e-12);
    }

    #[test]
    fn ct_noise_shapes() {
        assert_eq!(ct2d_noise(2, 1.0, 1.0, 0.5).shape(), (5, 5));
        let q = ct2d_noise(3, 1.0, 1.0, 0.5);
        assert_eq!(q.shape(), (7, 7));
        assert_abs_diff_eq!(q[(4, 4)], 0.25, epsilon = 1e-12);
        assert_eq!(CoordinatedTurn2D::new(3, 1.0).unwrap().observation()[(2, 5)], 1.0);
    }

    #[test]
    fn ct_model_needs_two_or_three_axes() {
        for axes in [0, 1, 4] {
            assert!(matches!(
                CoordinatedTurn2D::new(axes, 1.0),
                Err(FilterError::DimensionMismatch { context: "coordinated turn axes", .. })
            ));
        }
        let model = CoordinatedTurn2D::new(3, 1.0).unwrap();
        assert_eq!((model.axes(), model.dt(), model.state_dim()), (3, 1.0, Some(7)));
    }

    #[test]
    fn ekf_rejects_wrong_state_size_for_ct_model() {
        let model = CoordinatedTurn2D::new(2, 1.0).unwrap();
        let err = AdditiveEkf::additive(
            model,
            ct2d_noise(2, 1.0, 1.0, 1.0),
            position_noise(&[5.0, 5.0]),
            4,
            EkfConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            FilterError::DimensionMismatch {
                context: "model state",
                expected: 5,
                actual: 4,
            }
        );
    }
}

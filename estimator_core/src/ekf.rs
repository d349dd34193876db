//! Extended Kalman Filter (EKF) implementation.
//!
//! Unlike the standard KF, the EKF linearizes the non-linear transition and
//! observation models by computing Jacobians at the current estimate:
//! the transition at the posterior, the observation at the prior.
//!
//! Two noise forms are supported:
//! - **additive**:      x' = f(x, u) + L·w,   z = h(x) + M·v
//! - **non-additive**:  x' = f(x, u, w),      z = h(x, v)
//!   where L = ∂f/∂w and M = ∂h/∂v are evaluated at w = 0, v = 0.
//!
//! With `order = 2` the predicted state and measurement get the second-order
//! bias ½·tr(Hessᵢ·P). With `iterations > 0` the correction re-linearizes the
//! observation at each new iterate (iterated EKF).

use crate::error::{FilterError, Result};
use crate::filter::{Diagnostics, Filter, FilterState};
use crate::kf::{check_candidates, gain_update, innovation_cov, jpda_update, noise_cov};
use crate::linalg::{
    check_len, check_shape, gaussian_likelihood, penalized_distance, quadratic_bias,
};
use crate::numdiff;
use crate::types::{CorrectOptions, DMat, DVec, PredictOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Model-provider traits
// ---------------------------------------------------------------------------

/// Non-linear system with additive noise.
///
/// Only `f` and `h` are required; derivatives fall back to central
/// differences.
pub trait AdditiveModel {
    /// Fixed state dimension of the model, checked when the filter is built.
    fn state_dim(&self) -> Option<usize> {
        None
    }

    fn f(&self, x: &DVec, u: Option<&DVec>) -> DVec;

    fn h(&self, x: &DVec) -> DVec;

    fn f_jacobian(&self, x: &DVec, u: Option<&DVec>) -> DMat {
        numdiff::jacobian(|xv| self.f(xv, u), x)
    }

    fn h_jacobian(&self, x: &DVec) -> DMat {
        numdiff::jacobian(|xv| self.h(xv), x)
    }

    fn f_hessian(&self, x: &DVec, u: Option<&DVec>) -> Vec<DMat> {
        numdiff::hessian(|xv| self.f(xv, u), x)
    }

    fn h_hessian(&self, x: &DVec) -> Vec<DMat> {
        numdiff::hessian(|xv| self.h(xv), x)
    }
}

/// Non-linear system where the noise enters through `f` and `h`.
pub trait NonAdditiveModel {
    /// Fixed state dimension of the model, checked when the filter is built.
    fn state_dim(&self) -> Option<usize> {
        None
    }

    fn f(&self, x: &DVec, u: Option<&DVec>, w: &DVec) -> DVec;

    fn h(&self, x: &DVec, v: &DVec) -> DVec;

    /// `(∂f/∂x, ∂f/∂w)`
    fn f_jacobians(&self, x: &DVec, u: Option<&DVec>, w: &DVec) -> (DMat, DMat) {
        (
            numdiff::jacobian(|xv| self.f(xv, u, w), x),
            numdiff::jacobian(|wv| self.f(x, u, wv), w),
        )
    }

    /// `(∂h/∂x, ∂h/∂v)`
    fn h_jacobians(&self, x: &DVec, v: &DVec) -> (DMat, DMat) {
        (
            numdiff::jacobian(|xv| self.h(xv, v), x),
            numdiff::jacobian(|vv| self.h(x, vv), v),
        )
    }

    fn f_hessian(&self, x: &DVec, u: Option<&DVec>, w: &DVec) -> Vec<DMat> {
        numdiff::hessian(|xv| self.f(xv, u, w), x)
    }

    fn h_hessian(&self, x: &DVec, v: &DVec) -> Vec<DMat> {
        numdiff::hessian(|xv| self.h(xv, v), x)
    }
}

// ---------------------------------------------------------------------------
// Noise forms
// ---------------------------------------------------------------------------

/// Evaluation of a model at zero noise together with its linearization.
pub struct Linearized {
    /// f(x, u) or h(x)
    pub value: DVec,
    /// ∂/∂x
    pub jac: DMat,
    /// Noise coupling (L or M)
    pub coupling: DMat,
}

/// A model bundled with its noise statistics, as consumed by the EKF.
pub trait EkfSystem {
    /// Short description used in `Display`.
    const NOISE_FORM: &'static str;

    fn q(&self) -> &DMat;

    fn r(&self) -> &DMat;

    fn validate(&self, xdim: usize) -> Result<()>;

    fn propagate(&self, x: &DVec, u: Option<&DVec>) -> Linearized;

    fn propagate_hessian(&self, x: &DVec, u: Option<&DVec>) -> Vec<DMat>;

    fn observe(&self, x: &DVec) -> Linearized;

    fn observe_hessian(&self, x: &DVec) -> Vec<DMat>;
}

fn check_state_dim(model_dim: Option<usize>, xdim: usize) -> Result<()> {
    match model_dim {
        Some(expected) if expected != xdim => Err(FilterError::DimensionMismatch {
            context: "model state",
            expected,
            actual: xdim,
        }),
        _ => Ok(()),
    }
}

/// Additive-noise system: constant couplings `L`, `M`.
#[derive(Clone, Debug)]
pub struct AdditiveNoise<M> {
    pub model: M,
    pub l: DMat,
    pub m: DMat,
    pub q: DMat,
    pub r: DMat,
}

impl<M: AdditiveModel> AdditiveNoise<M> {
    /// Square identity couplings sized from `Q` and `R`. Use
    /// [`with_noise_coupling`](Self::with_noise_coupling) when the noise
    /// dimensions differ from the state or measurement dimensions.
    pub fn new(model: M, q: DMat, r: DMat) -> Self {
        let l = DMat::identity(q.nrows(), q.nrows());
        let m = DMat::identity(r.nrows(), r.nrows());
        Self { model, l, m, q, r }
    }

    pub fn with_noise_coupling(mut self, l: DMat, m: DMat) -> Self {
        self.l = l;
        self.m = m;
        self
    }
}

impl<M: AdditiveModel> EkfSystem for AdditiveNoise<M> {
    const NOISE_FORM: &'static str = "additive";

    fn q(&self) -> &DMat {
        &self.q
    }

    fn r(&self) -> &DMat {
        &self.r
    }

    fn validate(&self, xdim: usize) -> Result<()> {
        check_state_dim(self.model.state_dim(), xdim)?;
        let wdim = self.q.nrows();
        let vdim = self.r.nrows();
        check_shape(&self.q, wdim, wdim, "Q")?;
        check_shape(&self.l, xdim, wdim, "L")?;
        check_shape(&self.r, vdim, vdim, "R")?;
        check_shape(&self.m, self.m.nrows(), vdim, "M")
    }

    fn propagate(&self, x: &DVec, u: Option<&DVec>) -> Linearized {
        Linearized {
            value: self.model.f(x, u),
            jac: self.model.f_jacobian(x, u),
            coupling: self.l.clone(),
        }
    }

    fn propagate_hessian(&self, x: &DVec, u: Option<&DVec>) -> Vec<DMat> {
        self.model.f_hessian(x, u)
    }

    fn observe(&self, x: &DVec) -> Linearized {
        Linearized {
            value: self.model.h(x),
            jac: self.model.h_jacobian(x),
            coupling: self.m.clone(),
        }
    }

    fn observe_hessian(&self, x: &DVec) -> Vec<DMat> {
        self.model.h_hessian(x)
    }
}

/// Non-additive system: couplings are the noise Jacobians at zero noise.
#[derive(Clone, Debug)]
pub struct NonAdditiveNoise<M> {
    pub model: M,
    pub q: DMat,
    pub r: DMat,
}

impl<M: NonAdditiveModel> NonAdditiveNoise<M> {
    pub fn new(model: M, q: DMat, r: DMat) -> Self {
        Self { model, q, r }
    }

    fn w0(&self) -> DVec {
        DVec::zeros(self.q.nrows())
    }

    fn v0(&self) -> DVec {
        DVec::zeros(self.r.nrows())
    }
}

impl<M: NonAdditiveModel> EkfSystem for NonAdditiveNoise<M> {
    const NOISE_FORM: &'static str = "nonadditive";

    fn q(&self) -> &DMat {
        &self.q
    }

    fn r(&self) -> &DMat {
        &self.r
    }

    fn validate(&self, xdim: usize) -> Result<()> {
        check_state_dim(self.model.state_dim(), xdim)?;
        check_shape(&self.q, self.q.nrows(), self.q.nrows(), "Q")?;
        check_shape(&self.r, self.r.nrows(), self.r.nrows(), "R")
    }

    fn propagate(&self, x: &DVec, u: Option<&DVec>) -> Linearized {
        let w0 = self.w0();
        let (jac, coupling) = self.model.f_jacobians(x, u, &w0);
        Linearized { value: self.model.f(x, u, &w0), jac, coupling }
    }

    fn propagate_hessian(&self, x: &DVec, u: Option<&DVec>) -> Vec<DMat> {
        self.model.f_hessian(x, u, &self.w0())
    }

    fn observe(&self, x: &DVec) -> Linearized {
        let v0 = self.v0();
        let (jac, coupling) = self.model.h_jacobians(x, &v0);
        Linearized { value: self.model.h(x, &v0), jac, coupling }
    }

    fn observe_hessian(&self, x: &DVec) -> Vec<DMat> {
        self.model.h_hessian(x, &self.v0())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning of an extended Kalman filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EkfConfig {
    /// Linearization order, 1 or 2.
    pub order: u8,
    /// Extra re-linearization passes in `correct` (0 = plain EKF).
    pub iterations: usize,
    /// Apply the second-order measurement bias in `correct_jpda` too.
    pub jpda_second_order: bool,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            order: 1,
            iterations: 0,
            jpda_second_order: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Observation linearized around one point.
struct MeasurementLinearization {
    h: DMat,
    m: DMat,
    z_pred: DVec,
}

/// Extended Kalman filter over an [`EkfSystem`].
#[derive(Clone, Debug)]
pub struct ExtendedKalmanFilter<S> {
    system: S,
    config: EkfConfig,
    fs: FilterState,
    diag: Diagnostics,
}

pub type AdditiveEkf<M> = ExtendedKalmanFilter<AdditiveNoise<M>>;
pub type NonAdditiveEkf<M> = ExtendedKalmanFilter<NonAdditiveNoise<M>>;

impl<M: AdditiveModel> ExtendedKalmanFilter<AdditiveNoise<M>> {
    /// Additive-noise EKF with identity noise couplings.
    pub fn additive(model: M, q: DMat, r: DMat, xdim: usize, config: EkfConfig) -> Result<Self> {
        let mut system = AdditiveNoise::new(model, q, r);
        system.l = DMat::identity(xdim, system.q.nrows());
        Self::new(system, xdim, config)
    }
}

impl<M: NonAdditiveModel> ExtendedKalmanFilter<NonAdditiveNoise<M>> {
    pub fn non_additive(
        model: M,
        q: DMat,
        r: DMat,
        xdim: usize,
        config: EkfConfig,
    ) -> Result<Self> {
        Self::new(NonAdditiveNoise::new(model, q, r), xdim, config)
    }
}

impl<S: EkfSystem> ExtendedKalmanFilter<S> {
    pub fn new(system: S, xdim: usize, config: EkfConfig) -> Result<Self> {
        if config.order != 1 && config.order != 2 {
            return Err(FilterError::InvalidOrder(config.order));
        }
        system.validate(xdim)?;
        Ok(Self {
            system,
            config,
            fs: FilterState::new(xdim),
            diag: Diagnostics::default(),
        })
    }

    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    fn second_order(&self) -> bool {
        self.config.order == 2
    }

    /// Linearize the observation at `at`.
    ///
    /// The predicted measurement is `h(at) + H·(prior − at)`, which reduces
    /// to `h(prior)` on the first pass. `bias_cov` feeds the second-order term.
    fn linearize(
        &self,
        at: &DVec,
        bias_cov: &DMat,
        prior: &DVec,
        h_override: Option<&DMat>,
        with_bias: bool,
    ) -> Result<MeasurementLinearization> {
        let obs = self.system.observe(at);
        let zdim = obs.value.len();
        let h = h_override.cloned().unwrap_or(obs.jac);
        check_shape(&h, zdim, self.fs.xdim(), "H")?;

        let mut z_pred = obs.value + &h * (prior - at);
        if with_bias {
            z_pred += quadratic_bias(&self.system.observe_hessian(at), bias_cov);
        }
        Ok(MeasurementLinearization { h, m: obs.coupling, z_pred })
    }

    /// `M·R·Mᵀ` with per-call overrides.
    fn measurement_noise(
        &self,
        lin: &MeasurementLinearization,
        opts: &CorrectOptions,
    ) -> Result<DMat> {
        let m = opts.m.as_ref().unwrap_or(&lin.m);
        let r = opts.r.as_ref().unwrap_or(self.system.r());
        check_shape(r, r.nrows(), r.nrows(), "R")?;
        check_shape(m, lin.z_pred.len(), r.nrows(), "M")?;
        Ok(noise_cov(m, r))
    }

    /// Innovation and innovation covariance at the current estimate.
    fn innovation(&self, z: &DVec, opts: &CorrectOptions) -> Result<(DVec, DMat)> {
        self.fs.ensure_initialized()?;
        let x = self.fs.state();
        let p = self.fs.cov();
        let lin = self.linearize(x, p, x, opts.h.as_ref(), self.second_order())?;
        check_len(z, lin.z_pred.len(), "measurement")?;
        let s = innovation_cov(&lin.h, p, &self.measurement_noise(&lin, opts)?);
        Ok((z - &lin.z_pred, s))
    }

    /// Multi-hypothesis (JPDA) correction; see
    /// [`KalmanFilter::correct_jpda`](crate::kf::KalmanFilter::correct_jpda).
    ///
    /// All candidates share one linearization. The iterated variant repeats
    /// the weighted update around the new combined estimate.
    pub fn correct_jpda(
        &mut self,
        zs: &[DVec],
        probs: &[f64],
        opts: &[CorrectOptions],
    ) -> Result<(DVec, DMat)> {
        self.fs.ensure_initialized()?;
        check_candidates(zs, probs, opts)?;
        let default_opts = CorrectOptions::default();
        let h_override = opts.first().and_then(|o| o.h.as_ref());
        let with_bias = self.second_order() && self.config.jpda_second_order;
        let (prior_x, prior_p) = self.fs.snapshot();

        let mut x = prior_x.clone();
        let mut p = prior_p.clone();
        for _ in 0..=self.config.iterations {
            let lin = self.linearize(&x, &p, &prior_x, h_override, with_bias)?;
            let noises = (0..zs.len())
                .map(|i| self.measurement_noise(&lin, opts.get(i).unwrap_or(&default_opts)))
                .collect::<Result<Vec<_>>>()?;
            (x, p) = jpda_update(&prior_x, &prior_p, &lin.h, &lin.z_pred, zs, probs, &noises)?;
        }

        self.fs.set(&x, &p)?;
        self.fs.bump_step();
        self.diag.record_post(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }
}

impl<S: EkfSystem> Filter for ExtendedKalmanFilter<S> {
    fn filter_state(&self) -> &FilterState {
        &self.fs
    }

    fn filter_state_mut(&mut self) -> &mut FilterState {
        &mut self.fs
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    fn predict(&mut self, u: Option<&DVec>, opts: &PredictOptions) -> Result<(DVec, DMat)> {
        self.fs.ensure_initialized()?;
        let xdim = self.fs.xdim();
        let (post_x, post_p) = self.fs.snapshot();

        let lin = self.system.propagate(&post_x, u);
        let f = opts.f.as_ref().unwrap_or(&lin.jac);
        let l = opts.l.as_ref().unwrap_or(&lin.coupling);
        let q = opts.q.as_ref().unwrap_or(self.system.q());
        check_len(&lin.value, xdim, "f(x)")?;
        check_shape(f, xdim, xdim, "F")?;
        check_shape(q, q.nrows(), q.nrows(), "Q")?;
        check_shape(l, xdim, q.nrows(), "L")?;

        let mut x = lin.value.clone();
        let p = f * &post_p * f.transpose() + l * q * l.transpose();
        if self.second_order() {
            x += quadratic_bias(&self.system.propagate_hessian(&post_x, u), &post_p);
        }

        self.fs.set(&x, &p)?;
        self.diag.record_prior(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }

    fn correct(&mut self, z: &DVec, opts: &CorrectOptions) -> Result<(DVec, DMat)> {
        self.fs.ensure_initialized()?;
        let with_bias = self.second_order();
        let (prior_x, prior_p) = self.fs.snapshot();

        let mut x = prior_x.clone();
        let mut p = prior_p.clone();
        let mut last = None;
        // S is always formed from the prior covariance; only H and ẑ move.
        for _ in 0..=self.config.iterations {
            let lin = self.linearize(&x, &p, &prior_x, opts.h.as_ref(), with_bias)?;
            check_len(z, lin.z_pred.len(), "measurement")?;
            let s = innovation_cov(&lin.h, &prior_p, &self.measurement_noise(&lin, opts)?);
            let innov = z - &lin.z_pred;
            let (x_next, p_next, k) = gain_update(&prior_x, &prior_p, &lin.h, &innov, &s)?;
            x = x_next;
            p = p_next;
            last = Some((innov, s, k));
        }

        self.fs.set(&x, &p)?;
        self.fs.bump_step();
        if let Some((innov, s, k)) = &last {
            self.diag.record_innovation(innov, s, Some(k));
        }
        self.diag.record_post(self.fs.state(), self.fs.cov());
        tracing::trace!(
            step = self.fs.step_count(),
            iterations = self.config.iterations,
            "ekf correct"
        );
        Ok(self.fs.snapshot())
    }

    fn distance(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64> {
        let (innov, s) = self.innovation(z, opts)?;
        penalized_distance(&innov, &s)
    }

    fn likelihood(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64> {
        let (innov, s) = self.innovation(z, opts)?;
        gaussian_likelihood(&innov, &s)
    }
}

impl<S: EkfSystem> fmt::Display for ExtendedKalmanFilter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = if self.config.order == 1 { "First" } else { "Second" };
        write!(f, "{order}-order {} noise extended Kalman filter", S::NOISE_FORM)?;
        if self.config.iterations > 0 {
            write!(f, " ({} iterations)", self.config.iterations)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kf::{KalmanFilter, KfConfig};
    use approx::assert_abs_diff_eq;

    fn f_cv() -> DMat {
        DMat::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0])
    }

    fn h_pos() -> DMat {
        DMat::from_row_slice(1, 2, &[1.0, 0.0])
    }

    /// The reference linear system written as a non-linear model.
    #[derive(Clone, Debug)]
    struct LinearModel;

    impl AdditiveModel for LinearModel {
        fn f(&self, x: &DVec, _u: Option<&DVec>) -> DVec {
            f_cv() * x
        }

        fn h(&self, x: &DVec) -> DVec {
            h_pos() * x
        }
    }

    #[derive(Debug)]
    struct LinearNonAdditive;

    impl NonAdditiveModel for LinearNonAdditive {
        fn f(&self, x: &DVec, _u: Option<&DVec>, w: &DVec) -> DVec {
            f_cv() * x + w
        }

        fn h(&self, x: &DVec, v: &DVec) -> DVec {
            h_pos() * x + v
        }
    }

    /// x' = F·x + [0.5, 1]ᵀ·w,  z = H·x + 2·v
    #[derive(Debug)]
    struct ScaledNoise;

    impl NonAdditiveModel for ScaledNoise {
        fn f(&self, x: &DVec, _u: Option<&DVec>, w: &DVec) -> DVec {
            f_cv() * x + accel_gain() * w
        }

        fn h(&self, x: &DVec, v: &DVec) -> DVec {
            h_pos() * x + v * 2.0
        }
    }

    fn accel_gain() -> DMat {
        DMat::from_column_slice(2, 1, &[0.5, 1.0])
    }

    /// x' = [x0 + x1², x1],  z = x0²
    #[derive(Debug)]
    struct Quadratic;

    impl AdditiveModel for Quadratic {
        fn f(&self, x: &DVec, _u: Option<&DVec>) -> DVec {
            DVec::from_vec(vec![x[0] + x[1] * x[1], x[1]])
        }

        fn h(&self, x: &DVec) -> DVec {
            DVec::from_vec(vec![x[0] * x[0]])
        }

        fn h_jacobian(&self, x: &DVec) -> DMat {
            DMat::from_row_slice(1, 2, &[2.0 * x[0], 0.0])
        }
    }

    fn q_small() -> DMat {
        DMat::identity(2, 2) * 0.01
    }

    fn r_small() -> DMat {
        DMat::from_element(1, 1, 0.04)
    }

    fn x0() -> DVec {
        DVec::from_vec(vec![0.0, 1.0])
    }

    #[test]
    fn invalid_order_is_rejected() {
        let cfg = EkfConfig { order: 3, ..EkfConfig::default() };
        let err = AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, cfg).unwrap_err();
        assert_eq!(err, FilterError::InvalidOrder(3));
    }

    #[test]
    fn linear_model_matches_kalman_filter() {
        let mut kf =
            KalmanFilter::new(KfConfig::new(f_cv(), h_pos(), q_small(), r_small())).unwrap();
        let mut ekf =
            AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        kf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        ekf.init(&x0(), &DMat::identity(2, 2)).unwrap();

        for z in [1.2, 2.1, 2.9, 4.2] {
            let z = DVec::from_vec(vec![z]);
            let (xk, pk) = kf.step(&z, None).unwrap();
            let (xe, pe) = ekf.step(&z, None).unwrap();
            assert_abs_diff_eq!(xk, xe, epsilon = 1e-6);
            assert_abs_diff_eq!(pk, pe, epsilon = 1e-6);
        }
        assert_eq!(ekf.step_count(), 4);
    }

    #[test]
    fn non_additive_linear_matches_additive() {
        let mut a =
            AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        let mut n = NonAdditiveEkf::non_additive(
            LinearNonAdditive,
            q_small(),
            r_small(),
            2,
            EkfConfig::default(),
        )
        .unwrap();
        a.init(&x0(), &DMat::identity(2, 2)).unwrap();
        n.init(&x0(), &DMat::identity(2, 2)).unwrap();

        let z = DVec::from_vec(vec![1.3]);
        let (xa, pa) = a.step(&z, None).unwrap();
        let (xn, pn) = n.step(&z, None).unwrap();
        assert_abs_diff_eq!(xa, xn, epsilon = 1e-6);
        assert_abs_diff_eq!(pa, pn, epsilon = 1e-6);
    }

    #[test]
    fn iterations_do_not_change_linear_result() {
        let cfg = EkfConfig { iterations: 3, ..EkfConfig::default() };
        let mut plain =
            AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        let mut iterated =
            AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, cfg).unwrap();
        plain.init(&x0(), &DMat::identity(2, 2)).unwrap();
        iterated.init(&x0(), &DMat::identity(2, 2)).unwrap();

        let z = DVec::from_vec(vec![1.2]);
        let (xp, pp) = plain.step(&z, None).unwrap();
        let (xi, pi) = iterated.step(&z, None).unwrap();
        assert_abs_diff_eq!(xp, xi, epsilon = 1e-6);
        assert_abs_diff_eq!(pp, pi, epsilon = 1e-6);
    }

    #[test]
    fn second_order_adds_prediction_bias() {
        let cfg = EkfConfig { order: 2, ..EkfConfig::default() };
        let mut ekf = AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, cfg).unwrap();
        let p0 = DMat::from_diagonal(&DVec::from_vec(vec![0.5, 0.3]));
        ekf.init(&DVec::from_vec(vec![1.0, 2.0]), &p0).unwrap();
        let (x, _) = ekf.predict(None, &PredictOptions::default()).unwrap();
        // f(x) = [5, 2], bias = ½·tr([[0,0],[0,2]]·P) = P11
        assert_abs_diff_eq!(x[0], 5.0 + 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn second_order_adds_measurement_bias() {
        let cfg = EkfConfig { order: 2, ..EkfConfig::default() };
        let mut ekf = AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, cfg).unwrap();
        let p0 = DMat::from_diagonal(&DVec::from_vec(vec![0.5, 0.3]));
        ekf.init(&DVec::from_vec(vec![1.0, 2.0]), &p0).unwrap();
        let z = DVec::from_vec(vec![2.0]);
        ekf.correct(&z, &CorrectOptions::default()).unwrap();
        // ẑ = x0² + P00 = 1.5
        let innov = ekf.diagnostics().innovation.as_ref().unwrap();
        assert_abs_diff_eq!(innov[0], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn iterated_correction_moves_closer_to_measurement() {
        let p0 = DMat::from_diagonal(&DVec::from_vec(vec![1.0, 0.1]));
        let start = DVec::from_vec(vec![1.0, 0.0]);
        let z = DVec::from_vec(vec![4.0]);

        let mut plain =
            AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        plain.init(&start, &p0).unwrap();
        let (xp, _) = plain.correct(&z, &CorrectOptions::default()).unwrap();

        let cfg = EkfConfig { iterations: 5, ..EkfConfig::default() };
        let mut iterated = AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, cfg).unwrap();
        iterated.init(&start, &p0).unwrap();
        let (xi, pi) = iterated.correct(&z, &CorrectOptions::default()).unwrap();

        // True posterior mode is near x0 = 2.
        assert!((xi[0] - 2.0).abs() < (xp[0] - 2.0).abs());
        assert_abs_diff_eq!(pi[(0, 1)], pi[(1, 0)]);
    }

    #[test]
    fn jpda_matches_kalman_filter_for_linear_model() {
        let mut kf =
            KalmanFilter::new(KfConfig::new(f_cv(), h_pos(), q_small(), r_small())).unwrap();
        let mut ekf =
            AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        kf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        ekf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        kf.predict(None, &PredictOptions::default()).unwrap();
        ekf.predict(None, &PredictOptions::default()).unwrap();

        let zs = vec![DVec::from_vec(vec![1.2]), DVec::from_vec(vec![0.7])];
        let probs = [0.5, 0.3];
        let opts = vec![
            CorrectOptions::default(),
            CorrectOptions::default().with_r(DMat::from_element(1, 1, 0.5)),
        ];
        let (xk, pk) = kf.correct_jpda(&zs, &probs, &opts).unwrap();
        let (xe, pe) = ekf.correct_jpda(&zs, &probs, &opts).unwrap();
        assert_abs_diff_eq!(xk, xe, epsilon = 1e-6);
        assert_abs_diff_eq!(pk, pe, epsilon = 1e-6);
    }

    #[test]
    fn jpda_h_override_comes_from_first_candidate() {
        let mut kf =
            KalmanFilter::new(KfConfig::new(f_cv(), h_pos(), q_small(), r_small())).unwrap();
        let mut ekf =
            AdditiveEkf::additive(LinearModel, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        kf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        ekf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        kf.predict(None, &PredictOptions::default()).unwrap();
        ekf.predict(None, &PredictOptions::default()).unwrap();

        let mut reference = ekf.clone();
        let mut swapped = ekf.clone();

        let zs = vec![DVec::from_vec(vec![1.2]), DVec::from_vec(vec![0.7])];
        let vel = DMat::from_row_slice(1, 2, &[0.0, 1.0]);
        let opts = vec![
            CorrectOptions::default().with_h(h_pos()),
            CorrectOptions::default().with_h(vel.clone()),
        ];
        let (xk, pk) = kf.correct_jpda(&zs, &[0.5, 0.3], &opts).unwrap();
        let (xe, pe) = ekf.correct_jpda(&zs, &[0.5, 0.3], &opts).unwrap();
        let (xr, pr) = reference.correct_jpda(&zs, &[0.5, 0.3], &[]).unwrap();
        assert_abs_diff_eq!(xk, xe, epsilon = 1e-9);
        assert_abs_diff_eq!(pk, pe, epsilon = 1e-9);
        assert_abs_diff_eq!(xe, xr, epsilon = 1e-9);
        assert_abs_diff_eq!(pe, pr, epsilon = 1e-9);

        let swapped_opts = vec![CorrectOptions::default().with_h(vel), opts[0].clone()];
        let (xs, _) = swapped.correct_jpda(&zs, &[0.5, 0.3], &swapped_opts).unwrap();
        assert!((xs - xe).amax() > 1e-3);
    }

    #[test]
    fn iterated_jpda_with_certain_association_matches_iterated_correct() {
        let p0 = DMat::from_diagonal(&DVec::from_vec(vec![1.0, 0.1]));
        let start = DVec::from_vec(vec![1.0, 0.0]);
        let z = DVec::from_vec(vec![4.0]);
        let cfg = EkfConfig { iterations: 4, ..EkfConfig::default() };

        let mut single =
            AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, cfg.clone()).unwrap();
        let mut jpda = AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, cfg).unwrap();
        let mut plain =
            AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        single.init(&start, &p0).unwrap();
        jpda.init(&start, &p0).unwrap();
        plain.init(&start, &p0).unwrap();

        let (xs, ps) = single.correct(&z, &CorrectOptions::default()).unwrap();
        let (xj, pj) = jpda.correct_jpda(&[z.clone()], &[1.0], &[]).unwrap();
        let (xp, _) = plain.correct_jpda(&[z], &[1.0], &[]).unwrap();
        assert_abs_diff_eq!(xs, xj, epsilon = 1e-9);
        assert_abs_diff_eq!(ps, pj, epsilon = 1e-9);
        // The re-linearization really ran.
        assert!((xj[0] - xp[0]).abs() > 1e-3);
        assert_eq!(jpda.step_count(), 1);
    }

    #[test]
    fn jpda_second_order_bias_is_opt_in() {
        let p0 = DMat::from_diagonal(&DVec::from_vec(vec![0.5, 0.3]));
        let start = DVec::from_vec(vec![1.0, 2.0]);
        let z = DVec::from_vec(vec![2.0]);
        let build = |order, jpda_second_order| {
            let cfg = EkfConfig { order, jpda_second_order, ..EkfConfig::default() };
            let mut ekf = AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, cfg).unwrap();
            ekf.init(&start, &p0).unwrap();
            ekf
        };

        let (x_first, _) = build(1, false).correct_jpda(&[z.clone()], &[1.0], &[]).unwrap();
        let (x_default, _) = build(2, false).correct_jpda(&[z.clone()], &[1.0], &[]).unwrap();
        assert_abs_diff_eq!(x_default, x_first, epsilon = 1e-9);

        let (x_biased, p_biased) = build(2, true).correct_jpda(&[z.clone()], &[1.0], &[]).unwrap();
        let (x_second, p_second) = build(2, false).correct(&z, &CorrectOptions::default()).unwrap();
        assert_abs_diff_eq!(x_biased, x_second, epsilon = 1e-9);
        assert_abs_diff_eq!(p_biased, p_second, epsilon = 1e-9);
        assert!((x_biased[0] - x_first[0]).abs() > 1e-3);
    }

    #[test]
    fn non_additive_noise_jacobians_scale_the_noise() {
        let q = DMat::from_element(1, 1, 0.2);
        let mut ekf =
            NonAdditiveEkf::non_additive(ScaledNoise, q.clone(), r_small(), 2, EkfConfig::default())
                .unwrap();
        let obs = ekf.system().observe(&x0());
        assert_abs_diff_eq!(obs.coupling, DMat::from_element(1, 1, 2.0), epsilon = 1e-6);
        let prop = ekf.system().propagate(&x0(), None);
        assert_abs_diff_eq!(prop.coupling, accel_gain(), epsilon = 1e-6);

        let kf_config = KfConfig::new(f_cv(), h_pos(), q, r_small())
            .with_noise_coupling(accel_gain(), DMat::from_element(1, 1, 2.0));
        let mut kf = KalmanFilter::new(kf_config).unwrap();
        kf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        ekf.init(&x0(), &DMat::identity(2, 2)).unwrap();
        for z in [1.1, 2.3, 2.9] {
            let z = DVec::from_vec(vec![z]);
            let (xk, pk) = kf.step(&z, None).unwrap();
            let (xe, pe) = ekf.step(&z, None).unwrap();
            assert_abs_diff_eq!(xk, xe, epsilon = 1e-6);
            assert_abs_diff_eq!(pk, pe, epsilon = 1e-6);
        }
        // S = H·P·Hᵀ + 4·R
        let s = ekf.diagnostics().innovation_cov.as_ref().unwrap()[(0, 0)];
        let p = kf.diagnostics().prior_cov.as_ref().unwrap()[(0, 0)];
        assert_abs_diff_eq!(s, p + 4.0 * 0.04, epsilon = 1e-6);
    }

    #[test]
    fn distance_and_likelihood_are_consistent() {
        let mut ekf =
            AdditiveEkf::additive(Quadratic, q_small(), r_small(), 2, EkfConfig::default())
                .unwrap();
        ekf.init(&DVec::from_vec(vec![1.0, 0.0]), &DMat::identity(2, 2)).unwrap();
        let z = DVec::from_vec(vec![1.5]);
        let opts = CorrectOptions::default();
        let d = ekf.distance(&z, &opts).unwrap();
        let l = ekf.likelihood(&z, &opts).unwrap();
        assert!(l > 0.0);
        assert_abs_diff_eq!(l.ln(), -0.5 * ((2.0 * std::f64::consts::PI).ln() + d), epsilon = 1e-9);
    }

    #[test]
    fn display_names_the_variant() {
        let cfg = EkfConfig { order: 2, ..EkfConfig::default() };
        let ekf =
            NonAdditiveEkf::non_additive(LinearNonAdditive, q_small(), r_small(), 2, cfg).unwrap();
        assert_eq!(ekf.to_string(), "Second-order nonadditive noise extended Kalman filter");
    }
}

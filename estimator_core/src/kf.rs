//! Linear Kalman filter.
//!
//! ## System model
//! x' = F·x + G·u + L·w,   w ~ N(0, Q)
//! z  = H·x + M·v,         v ~ N(0, R)
//!
//! ## Recursion
//! predict:  x ← F·x (+ G·u),  P ← F·P·Fᵀ + L·Q·Lᵀ
//! correct:  r = z − H·x,  S = H·P·Hᵀ + M·R·Mᵀ,  K = P·Hᵀ·S⁻¹
//!           x ← x + K·r,  P ← P − K·S·Kᵀ
//!
//! Every covariance is symmetrized after assignment. The gain/update helpers
//! at the bottom of this file are shared with the EKF.

use crate::error::{FilterError, Result};
use crate::filter::{Diagnostics, Filter, FilterState};
use crate::linalg::{
    check_len, check_shape, gaussian_likelihood, invert, outer, penalized_distance, symmetrize,
};
use crate::types::{CorrectOptions, DMat, DVec, PredictOptions};
use std::fmt;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// System matrices of a linear Kalman filter.
#[derive(Clone, Debug)]
pub struct KfConfig {
    /// State transition, xdim × xdim
    pub f: DMat,
    /// Process-noise coupling, xdim × wdim
    pub l: DMat,
    /// Observation matrix, zdim × xdim
    pub h: DMat,
    /// Measurement-noise coupling, zdim × vdim
    pub m: DMat,
    /// Process-noise covariance, wdim × wdim
    pub q: DMat,
    /// Measurement-noise covariance, vdim × vdim
    pub r: DMat,
    /// Control-input matrix, xdim × udim. Without it a control is added as-is.
    pub g: Option<DMat>,
}

impl KfConfig {
    /// Configuration with identity noise couplings.
    pub fn new(f: DMat, h: DMat, q: DMat, r: DMat) -> Self {
        let l = DMat::identity(f.nrows(), q.nrows());
        let m = DMat::identity(h.nrows(), r.nrows());
        Self { f, l, h, m, q, r, g: None }
    }

    pub fn with_noise_coupling(mut self, l: DMat, m: DMat) -> Self {
        self.l = l;
        self.m = m;
        self
    }

    pub fn with_control(mut self, g: DMat) -> Self {
        self.g = Some(g);
        self
    }

    fn validate(&self) -> Result<()> {
        let xdim = self.f.nrows();
        let wdim = self.q.nrows();
        let zdim = self.h.nrows();
        let vdim = self.r.nrows();
        check_shape(&self.f, xdim, xdim, "F")?;
        check_shape(&self.l, xdim, wdim, "L")?;
        check_shape(&self.q, wdim, wdim, "Q")?;
        check_shape(&self.h, zdim, xdim, "H")?;
        check_shape(&self.m, zdim, vdim, "M")?;
        check_shape(&self.r, vdim, vdim, "R")?;
        if let Some(g) = &self.g {
            check_shape(g, xdim, g.ncols(), "G")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Standard linear Kalman filter.
#[derive(Clone, Debug)]
pub struct KalmanFilter {
    config: KfConfig,
    fs: FilterState,
    diag: Diagnostics,
}

impl KalmanFilter {
    pub fn new(config: KfConfig) -> Result<Self> {
        config.validate()?;
        let xdim = config.f.nrows();
        Ok(Self {
            config,
            fs: FilterState::new(xdim),
            diag: Diagnostics::default(),
        })
    }

    pub fn config(&self) -> &KfConfig {
        &self.config
    }

    /// Resolve `H`, `M`, `R` for one measurement of length `zdim`.
    fn measurement_matrices<'a>(
        &'a self,
        opts: &'a CorrectOptions,
        zdim: usize,
    ) -> Result<(&'a DMat, &'a DMat, &'a DMat)> {
        let h = opts.h.as_ref().unwrap_or(&self.config.h);
        let m = opts.m.as_ref().unwrap_or(&self.config.m);
        let r = opts.r.as_ref().unwrap_or(&self.config.r);
        check_shape(h, zdim, self.fs.xdim(), "H")?;
        check_shape(r, r.nrows(), r.nrows(), "R")?;
        check_shape(m, zdim, r.nrows(), "M")?;
        Ok((h, m, r))
    }

    /// Innovation and its covariance of `z` against the current estimate.
    fn innovation(&self, z: &DVec, opts: &CorrectOptions) -> Result<(DVec, DMat, DMat)> {
        self.fs.ensure_initialized()?;
        let (h, m, r) = self.measurement_matrices(opts, z.len())?;
        let innov = z - h * self.fs.state();
        let s = innovation_cov(h, self.fs.cov(), &noise_cov(m, r));
        Ok((innov, s, h.clone()))
    }

    /// Multi-hypothesis (JPDA) correction.
    ///
    /// `zs[i]` is a candidate measurement with association probability
    /// `probs[i]`; `1 − Σ probs` is the probability that none of them
    /// originated from the target. `opts` is either empty (configured noise
    /// for every candidate) or holds one entry per candidate. Noise overrides
    /// apply per candidate; an `H` override is taken from the first entry.
    pub fn correct_jpda(
        &mut self,
        zs: &[DVec],
        probs: &[f64],
        opts: &[CorrectOptions],
    ) -> Result<(DVec, DMat)> {
        self.fs.ensure_initialized()?;
        check_candidates(zs, probs, opts)?;
        let default_opts = CorrectOptions::default();
        let (prior_x, prior_p) = self.fs.snapshot();

        // Candidates share one observation matrix: the first entry's override.
        let h = opts.first().and_then(|o| o.h.as_ref()).unwrap_or(&self.config.h);
        let mut noises = Vec::with_capacity(zs.len());
        for (i, z) in zs.iter().enumerate() {
            let o = opts.get(i).unwrap_or(&default_opts);
            let (_, m, r) = self.measurement_matrices(o, z.len())?;
            noises.push(noise_cov(m, r));
        }
        check_shape(h, h.nrows(), self.fs.xdim(), "H")?;
        let z_pred = h * &prior_x;
        let (x, p) = jpda_update(&prior_x, &prior_p, h, &z_pred, zs, probs, &noises)?;

        self.fs.set(&x, &p)?;
        self.fs.bump_step();
        self.diag.record_post(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }
}

impl Filter for KalmanFilter {
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
        let f = opts.f.as_ref().unwrap_or(&self.config.f);
        let l = opts.l.as_ref().unwrap_or(&self.config.l);
        let q = opts.q.as_ref().unwrap_or(&self.config.q);
        check_shape(f, xdim, xdim, "F")?;
        check_shape(q, q.nrows(), q.nrows(), "Q")?;
        check_shape(l, xdim, q.nrows(), "L")?;

        let mut x = f * self.fs.state();
        if let Some(u) = u {
            x += control_term(self.config.g.as_ref(), u, xdim)?;
        }
        let p = f * self.fs.cov() * f.transpose() + l * q * l.transpose();

        self.fs.set(&x, &p)?;
        self.diag.record_prior(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }

    fn correct(&mut self, z: &DVec, opts: &CorrectOptions) -> Result<(DVec, DMat)> {
        let (innov, s, h) = self.innovation(z, opts)?;
        let (x, p, k) = gain_update(self.fs.state(), self.fs.cov(), &h, &innov, &s)?;

        self.fs.set(&x, &p)?;
        self.fs.bump_step();
        self.diag.record_innovation(&innov, &s, Some(&k));
        self.diag.record_post(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }

    fn distance(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64> {
        let (innov, s, _) = self.innovation(z, opts)?;
        penalized_distance(&innov, &s)
    }

    fn likelihood(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64> {
        let (innov, s, _) = self.innovation(z, opts)?;
        gaussian_likelihood(&innov, &s)
    }
}

impl fmt::Display for KalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Standard linear Kalman filter (xdim={})", self.fs.xdim())
    }
}

// ---------------------------------------------------------------------------
// Shared update helpers
// ---------------------------------------------------------------------------

/// `G·u`, or `u` itself when no control matrix is configured.
pub(crate) fn control_term(g: Option<&DMat>, u: &DVec, xdim: usize) -> Result<DVec> {
    match g {
        Some(g) => {
            check_len(u, g.ncols(), "control")?;
            Ok(g * u)
        }
        None => {
            check_len(u, xdim, "control")?;
            Ok(u.clone())
        }
    }
}

/// `M·R·Mᵀ`
pub(crate) fn noise_cov(m: &DMat, r: &DMat) -> DMat {
    m * r * m.transpose()
}

/// `S = H·P·Hᵀ + R̃`, symmetrized.
pub(crate) fn innovation_cov(h: &DMat, p: &DMat, r_tilde: &DMat) -> DMat {
    symmetrize(&(h * p * h.transpose() + r_tilde))
}

/// `K = P·Hᵀ·S⁻¹`
pub(crate) fn kalman_gain(p: &DMat, h: &DMat, s: &DMat) -> Result<DMat> {
    let s_inv = invert(s, "innovation covariance")?;
    Ok(p * h.transpose() * s_inv)
}

/// Gain update of `(x, P)` with innovation `r` and its covariance `S`.
/// Returns the posterior and the gain.
pub(crate) fn gain_update(
    x: &DVec,
    p: &DMat,
    h: &DMat,
    r: &DVec,
    s: &DMat,
) -> Result<(DVec, DMat, DMat)> {
    let k = kalman_gain(p, h, s)?;
    let x_post = x + &k * r;
    let p_post = symmetrize(&(p - &k * s * k.transpose()));
    Ok((x_post, p_post, k))
}

pub(crate) fn check_candidates(zs: &[DVec], probs: &[f64], opts: &[CorrectOptions]) -> Result<()> {
    if probs.len() != zs.len() {
        return Err(FilterError::DimensionMismatch {
            context: "association probabilities",
            expected: zs.len(),
            actual: probs.len(),
        });
    }
    if !opts.is_empty() && opts.len() != zs.len() {
        return Err(FilterError::DimensionMismatch {
            context: "per-candidate options",
            expected: zs.len(),
            actual: opts.len(),
        });
    }
    Ok(())
}

/// Probabilistically weighted correction against one linearization.
///
/// `h` and `z_pred` describe the linearization, `noises[i]` is `M·R·Mᵀ` for
/// candidate `i`. The covariance is the mixture of the "no candidate" prior,
/// the per-candidate posteriors and the spread of the state increments.
pub(crate) fn jpda_update(
    prior_x: &DVec,
    prior_p: &DMat,
    h: &DMat,
    z_pred: &DVec,
    zs: &[DVec],
    probs: &[f64],
    noises: &[DMat],
) -> Result<(DVec, DMat)> {
    let xdim = prior_x.len();
    let mut state_item = DVec::zeros(xdim);
    let mut cov_posteriors = DMat::zeros(xdim, xdim);
    let mut cov_spread = DMat::zeros(xdim, xdim);

    for ((z, &prob), r_tilde) in zs.iter().zip(probs).zip(noises) {
        check_len(z, z_pred.len(), "measurement")?;
        let s = innovation_cov(h, prior_p, r_tilde);
        let k = kalman_gain(prior_p, h, &s)?;
        let incre = &k * (z - z_pred);
        cov_posteriors += (prior_p - &k * &s * k.transpose()) * prob;
        cov_spread += outer(&incre) * prob;
        state_item += incre * prob;
    }

    let miss = 1.0 - probs.iter().sum::<f64>();
    let x = prior_x + &state_item;
    let p = prior_p * miss + cov_posteriors + (cov_spread - outer(&state_item));
    Ok((x, symmetrize(&p)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

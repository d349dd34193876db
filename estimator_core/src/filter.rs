//! The lifecycle contract every estimator implements.
//!
//! ```text
//!   init ──► predict ──► correct ──► predict ──► correct ...
//!              ▲                        │
//!              └──────── reset ◄────────┘   (optional, keeps step_count)
//! ```
//!
//! `predict` returns the prior, `correct` returns the posterior and bumps the
//! step counter. Both are fallible: using a filter before `init` yields
//! [`FilterError::NotInitialized`].

use crate::error::{FilterError, Result};
use crate::linalg::{check_len, check_shape, symmetrize};
use crate::types::{CorrectOptions, DMat, DVec, PredictOptions};
use std::fmt;

// ---------------------------------------------------------------------------
// FilterState
// ---------------------------------------------------------------------------

/// State vector, error covariance and lifecycle bookkeeping of one filter.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterState {
    xdim: usize,
    state: DVec,
    cov: DMat,
    initialized: bool,
    step_count: usize,
}

impl FilterState {
    pub fn new(xdim: usize) -> Self {
        Self {
            xdim,
            state: DVec::zeros(xdim),
            cov: DMat::zeros(xdim, xdim),
            initialized: false,
            step_count: 0,
        }
    }

    pub fn xdim(&self) -> usize {
        self.xdim
    }

    pub fn state(&self) -> &DVec {
        &self.state
    }

    pub fn cov(&self) -> &DMat {
        &self.cov
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(FilterError::NotInitialized)
        }
    }

    /// Copy in `(state, cov)`, mark initialised and zero the step counter.
    pub fn init(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.set(state, cov)?;
        self.initialized = true;
        self.step_count = 0;
        Ok(())
    }

    /// Overwrite `(state, cov)` without touching the lifecycle bookkeeping.
    pub fn reset(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.ensure_initialized()?;
        self.set(state, cov)
    }

    /// Assign a new estimate. The covariance is always stored symmetrized.
    pub fn set(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        check_len(state, self.xdim, "state")?;
        check_shape(cov, self.xdim, self.xdim, "covariance")?;
        self.state = state.clone();
        self.cov = symmetrize(cov);
        Ok(())
    }

    pub(crate) fn bump_step(&mut self) {
        self.step_count += 1;
    }

    /// Current estimate as fresh copies.
    pub fn snapshot(&self) -> (DVec, DMat) {
        (self.state.clone(), self.cov.clone())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Intermediate quantities of the last predict/correct, for inspection and
/// debugging. Fields are `None` until the step that produces them has run.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    pub prior_state: Option<DVec>,
    pub prior_cov: Option<DMat>,
    pub post_state: Option<DVec>,
    pub post_cov: Option<DMat>,
    /// Innovation `r = z − ẑ`
    pub innovation: Option<DVec>,
    /// Innovation covariance `S`
    pub innovation_cov: Option<DMat>,
    /// Kalman gain `K`
    pub gain: Option<DMat>,
}

impl Diagnostics {
    pub(crate) fn record_prior(&mut self, state: &DVec, cov: &DMat) {
        self.prior_state = Some(state.clone());
        self.prior_cov = Some(cov.clone());
    }

    pub(crate) fn record_post(&mut self, state: &DVec, cov: &DMat) {
        self.post_state = Some(state.clone());
        self.post_cov = Some(cov.clone());
    }

    pub(crate) fn record_innovation(&mut self, r: &DVec, s: &DMat, k: Option<&DMat>) {
        self.innovation = Some(r.clone());
        self.innovation_cov = Some(s.clone());
        self.gain = k.cloned();
    }
}

// ---------------------------------------------------------------------------
// Filter trait
// ---------------------------------------------------------------------------

/// Recursive Bayesian estimator with an `init → predict → correct` lifecycle.
///
/// `Display` gives a one-line description of the variant.
pub trait Filter: fmt::Display {
    /// Dimension of the state vector.
    fn xdim(&self) -> usize {
        self.filter_state().xdim()
    }

    fn filter_state(&self) -> &FilterState;

    fn filter_state_mut(&mut self) -> &mut FilterState;

    fn diagnostics(&self) -> &Diagnostics;

    /// (Re-)initialise with a copy of `(state, cov)`.
    fn init(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.filter_state_mut().init(state, cov)
    }

    /// Overwrite the estimate of an initialised filter.
    fn reset(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.filter_state_mut().reset(state, cov)
    }

    /// Time update. Returns the prior `(state, cov)`.
    fn predict(&mut self, u: Option<&DVec>, opts: &PredictOptions) -> Result<(DVec, DMat)>;

    /// Measurement update. Returns the posterior `(state, cov)`.
    fn correct(&mut self, z: &DVec, opts: &CorrectOptions) -> Result<(DVec, DMat)>;

    /// `rᵀS⁻¹r + ln|S|` of `z` against the current estimate.
    fn distance(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64>;

    /// Gaussian density of `z` against the current estimate, always `> 0`.
    fn likelihood(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64>;

    fn state(&self) -> Result<DVec> {
        let fs = self.filter_state();
        fs.ensure_initialized()?;
        Ok(fs.state().clone())
    }

    fn cov(&self) -> Result<DMat> {
        let fs = self.filter_state();
        fs.ensure_initialized()?;
        Ok(fs.cov().clone())
    }

    fn is_initialized(&self) -> bool {
        self.filter_state().is_initialized()
    }

    fn step_count(&self) -> usize {
        self.filter_state().step_count()
    }

    /// `predict(u)` followed by `correct(z)` with the configured matrices.
    fn step(&mut self, z: &DVec, u: Option<&DVec>) -> Result<(DVec, DMat)> {
        self.predict(u, &PredictOptions::default())?;
        self.correct(z, &CorrectOptions::default())
    }
}

/// Owned, type-erased filter as stored by the multiple-model combiners.
pub type BoxedFilter = Box<dyn Filter + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_requires_init() {
        let mut fs = FilterState::new(2);
        let x = DVec::zeros(2);
        let p = DMat::identity(2, 2);
        assert_eq!(fs.reset(&x, &p), Err(FilterError::NotInitialized));
        fs.init(&x, &p).unwrap();
        fs.bump_step();
        fs.reset(&DVec::from_vec(vec![1.0, 2.0]), &p).unwrap();
        assert!(fs.is_initialized());
        assert_eq!(fs.step_count(), 1);
        assert_eq!(fs.state()[1], 2.0);
    }

    #[test]
    fn init_symmetrizes_and_checks_shape() {
        let mut fs = FilterState::new(2);
        let p = DMat::from_row_slice(2, 2, &[1.0, 0.2, 0.0, 1.0]);
        fs.init(&DVec::zeros(2), &p).unwrap();
        assert_eq!(fs.cov()[(0, 1)], fs.cov()[(1, 0)]);
        assert_eq!(fs.step_count(), 0);

        let err = fs.init(&DVec::zeros(3), &p).unwrap_err();
        assert_eq!(
            err,
            FilterError::DimensionMismatch {
                context: "state",
                expected: 2,
                actual: 3,
            }
        );
    }
}

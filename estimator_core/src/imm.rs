//! Interacting Multiple Models (IMM) filter.
//!
//! Maintains a bank of filters, possibly with different state layouts, and a
//! probability vector μ over them.
//!
//! One cycle:
//! 1. **Mixing** (before predict): c_j = Σᵢ Πᵢⱼ·μᵢ, μᵢ|ⱼ = Πᵢⱼ·μᵢ / c_j.
//!    Each filter j is reset to the mixture of all estimates converted to its
//!    own model type, then predicted. μ ← c.
//! 2. **Correct**: every filter is corrected, μⱼ ∝ μⱼ·Lⱼ(z).
//! 3. **Fusion** (after both): the combined estimate is the moment-matched
//!    mixture expressed in the first model's type.
//!
//! Π is row-stochastic: `Π[(i, j)]` is the probability of switching from
//! model i to model j between two steps.

use crate::error::{FilterError, Result};
use crate::filter::{BoxedFilter, Diagnostics, Filter, FilterState};
use crate::linalg::{check_shape, mixture_cov, weighted_mean};
use crate::switch::ModelSwitch;
use crate::types::{CorrectOptions, DMat, DVec, ModelType, PredictOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Model bank
// ---------------------------------------------------------------------------

/// One member of a multiple-model bank.
pub struct ModelEntry {
    pub filter: BoxedFilter,
    pub model_type: ModelType,
}

impl ModelEntry {
    pub fn new(filter: BoxedFilter, model_type: ModelType) -> Self {
        Self { filter, model_type }
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("filter", &self.filter.to_string())
            .field("model_type", &self.model_type)
            .finish()
    }
}

/// Normalise a probability vector in place. Returns `false` (and leaves the
/// vector untouched) when the total is not positive.
pub(crate) fn normalise(probs: &mut [f64]) -> bool {
    let total: f64 = probs.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return false;
    }
    probs.iter_mut().for_each(|p| *p /= total);
    true
}

/// Initial probabilities: user supplied (normalised) or uniform.
///
/// Entries must be finite and non-negative with a positive total.
pub(crate) fn initial_probs(n: usize, probs: Option<Vec<f64>>) -> Result<Vec<f64>> {
    let Some(mut probs) = probs else {
        return Ok(vec![1.0 / n as f64; n]);
    };
    if probs.len() != n {
        return Err(FilterError::DimensionMismatch {
            context: "model probabilities",
            expected: n,
            actual: probs.len(),
        });
    }
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) || !normalise(&mut probs) {
        return Err(FilterError::InvalidProbabilities);
    }
    Ok(probs)
}

/// Copy of every model's estimate and bookkeeping, see [`restore_bank`].
pub(crate) fn save_bank(models: &[ModelEntry]) -> Vec<FilterState> {
    models.iter().map(|m| m.filter.filter_state().clone()).collect()
}

/// Put every model back to a saved state when `outcome` is an error, so a
/// failed bank operation leaves no model half updated.
pub(crate) fn restore_bank<T>(
    models: &mut [ModelEntry],
    saved: Vec<FilterState>,
    outcome: Result<T>,
) -> Result<T> {
    if outcome.is_err() {
        for (entry, fs) in models.iter_mut().zip(saved) {
            *entry.filter.filter_state_mut() = fs;
        }
    }
    outcome
}

/// Correct every model with the same measurement.
pub(crate) fn correct_bank(
    models: &mut [ModelEntry],
    z: &DVec,
    opts: &CorrectOptions,
) -> Result<()> {
    for entry in models.iter_mut() {
        entry.filter.correct(z, opts)?;
    }
    Ok(())
}

/// Fused estimate of the bank, expressed in the first model's type.
pub(crate) fn fuse<S: ModelSwitch>(
    switch: &S,
    models: &[ModelEntry],
    probs: &[f64],
) -> Result<(DVec, DMat)> {
    let target = &models[0].model_type;
    let mut xs = Vec::with_capacity(models.len());
    let mut ps = Vec::with_capacity(models.len());
    for entry in models {
        let fs = entry.filter.filter_state();
        xs.push(switch.switch_state(fs.state(), &entry.model_type, target)?);
        ps.push(switch.switch_cov(fs.cov(), &entry.model_type, target)?);
    }
    let mean = weighted_mean(probs, &xs);
    let cov = mixture_cov(probs, &xs, &ps, &mean);
    Ok((mean, cov))
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImmConfig {
    /// Diagonal of the default transition matrix. The remaining mass is
    /// spread evenly over the other models.
    pub self_transition: f64,
}

impl Default for ImmConfig {
    fn default() -> Self {
        Self { self_transition: 0.999 }
    }
}

impl ImmConfig {
    /// Row-stochastic `n × n` matrix with `self_transition` on the diagonal.
    pub fn default_transition(&self, n: usize) -> DMat {
        if n == 1 {
            return DMat::identity(1, 1);
        }
        let off = (1.0 - self.self_transition) / (n - 1) as f64;
        DMat::from_fn(n, n, |i, j| if i == j { self.self_transition } else { off })
    }
}

// ---------------------------------------------------------------------------
// IMM Filter
// ---------------------------------------------------------------------------

pub struct ImmFilter<S> {
    switch: S,
    config: ImmConfig,
    models: Vec<ModelEntry>,
    probs: Vec<f64>,
    init_probs: Vec<f64>,
    trans: DMat,
    fs: FilterState,
    diag: Diagnostics,
}

impl<S: ModelSwitch> ImmFilter<S> {
    pub fn new(switch: S, config: ImmConfig) -> Self {
        Self {
            switch,
            config,
            models: Vec::new(),
            probs: Vec::new(),
            init_probs: Vec::new(),
            trans: DMat::zeros(0, 0),
            fs: FilterState::new(0),
            diag: Diagnostics::default(),
        }
    }

    /// Add filters to the bank. Only allowed before `init`.
    ///
    /// `probs` and `trans` describe the whole bank after the addition;
    /// defaults are uniform probabilities and
    /// [`ImmConfig::default_transition`].
    pub fn add_models(
        &mut self,
        entries: Vec<ModelEntry>,
        probs: Option<Vec<f64>>,
        trans: Option<DMat>,
    ) -> Result<()> {
        if self.fs.is_initialized() {
            return Err(FilterError::ModelsLocked);
        }
        let n = self.models.len() + entries.len();
        if n == 0 {
            return Err(FilterError::NoModels);
        }
        let probs = initial_probs(n, probs)?;
        let trans = match trans {
            Some(t) => {
                check_shape(&t, n, n, "transition matrix")?;
                t
            }
            None => self.config.default_transition(n),
        };

        self.models.extend(entries);
        self.init_probs = probs.clone();
        self.probs = probs;
        self.trans = trans;
        self.fs = FilterState::new(self.models[0].filter.xdim());
        debug!(models = n, "imm bank configured");
        Ok(())
    }

    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    pub fn model_types(&self) -> Vec<&ModelType> {
        self.models.iter().map(|m| &m.model_type).collect()
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn trans_mat(&self) -> &DMat {
        &self.trans
    }

    /// Replace the transition matrix; it stays fixed until replaced again.
    pub fn set_trans_mat(&mut self, trans: DMat) -> Result<()> {
        check_shape(&trans, self.models.len(), self.models.len(), "transition matrix")?;
        self.trans = trans;
        Ok(())
    }

    /// Index and entry of the most probable model.
    pub fn dominant_model(&self) -> Option<(usize, &ModelEntry)> {
        self.probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| (i, &self.models[i]))
    }

    fn ensure_models(&self) -> Result<()> {
        if self.models.is_empty() {
            Err(FilterError::NoModels)
        } else {
            Ok(())
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        self.ensure_models()?;
        self.fs.ensure_initialized()
    }

    /// Convert a canonical (first-model) estimate into every model's type.
    fn distribute(&self, state: &DVec, cov: &DMat) -> Result<Vec<(DVec, DMat)>> {
        let canonical = &self.models[0].model_type;
        self.models
            .iter()
            .map(|m| {
                Ok((
                    self.switch.switch_state(state, canonical, &m.model_type)?,
                    self.switch.switch_cov(cov, canonical, &m.model_type)?,
                ))
            })
            .collect()
    }

    /// Interaction step. Returns the mixed initial condition of every model
    /// and the predicted model probabilities; the bank itself is untouched.
    fn interaction(&self) -> Result<(Vec<(DVec, DMat)>, Vec<f64>)> {
        let n = self.models.len();
        let mut c_bar: Vec<f64> = (0..n)
            .map(|j| (0..n).map(|i| self.trans[(i, j)] * self.probs[i]).sum::<f64>())
            .collect();

        let mut mixed = Vec::with_capacity(n);
        for j in 0..n {
            let to = &self.models[j].model_type;
            let norm = c_bar[j].max(f64::MIN_POSITIVE);
            let mut weights = Vec::with_capacity(n);
            let mut xs = Vec::with_capacity(n);
            let mut ps = Vec::with_capacity(n);
            for (i, entry) in self.models.iter().enumerate() {
                let fs = entry.filter.filter_state();
                weights.push(self.trans[(i, j)] * self.probs[i] / norm);
                xs.push(self.switch.switch_state(fs.state(), &entry.model_type, to)?);
                ps.push(self.switch.switch_cov(fs.cov(), &entry.model_type, to)?);
            }
            let x_mix = weighted_mean(&weights, &xs);
            let p_mix = mixture_cov(&weights, &xs, &ps, &x_mix);
            mixed.push((x_mix, p_mix));
        }

        if !normalise(&mut c_bar) {
            warn!("predicted model probabilities vanished, keeping previous");
            return Ok((mixed, self.probs.clone()));
        }
        Ok((mixed, c_bar))
    }

    /// Reset every model to its mixed pair and predict it.
    fn predict_bank(
        &mut self,
        mixed: &[(DVec, DMat)],
        u: Option<&DVec>,
        opts: &PredictOptions,
    ) -> Result<()> {
        for (entry, (x, p)) in self.models.iter_mut().zip(mixed) {
            entry.filter.reset(x, p)?;
            entry.filter.predict(u, opts)?;
        }
        Ok(())
    }

}

impl<S: ModelSwitch> Filter for ImmFilter<S> {
    fn filter_state(&self) -> &FilterState {
        &self.fs
    }

    fn filter_state_mut(&mut self) -> &mut FilterState {
        &mut self.fs
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    fn init(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.ensure_models()?;
        let per_model = self.distribute(state, cov)?;
        for (entry, (x, p)) in self.models.iter_mut().zip(&per_model) {
            entry.filter.init(x, p)?;
        }
        self.probs = self.init_probs.clone();
        self.fs.init(state, cov)
    }

    fn reset(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.ensure_ready()?;
        let per_model = self.distribute(state, cov)?;
        for (entry, (x, p)) in self.models.iter_mut().zip(&per_model) {
            entry.filter.reset(x, p)?;
        }
        self.fs.reset(state, cov)
    }

    fn predict(&mut self, u: Option<&DVec>, opts: &PredictOptions) -> Result<(DVec, DMat)> {
        self.ensure_ready()?;
        let (mixed, predicted) = self.interaction()?;

        let saved = save_bank(&self.models);
        let outcome = self
            .predict_bank(&mixed, u, opts)
            .and_then(|()| fuse(&self.switch, &self.models, &predicted));
        let (x, p) = restore_bank(&mut self.models, saved, outcome)?;

        self.probs = predicted;
        debug!(probs = ?self.probs, "imm predict");
        self.fs.set(&x, &p)?;
        self.diag.record_prior(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }

    fn correct(&mut self, z: &DVec, opts: &CorrectOptions) -> Result<(DVec, DMat)> {
        self.ensure_ready()?;
        let mut posterior = self.probs.clone();
        for (entry, prob) in self.models.iter().zip(posterior.iter_mut()) {
            *prob *= entry.filter.likelihood(z, opts)?;
        }
        if !normalise(&mut posterior) {
            warn!("all model likelihoods underflowed, keeping predicted probabilities");
            posterior = self.probs.clone();
        }

        let saved = save_bank(&self.models);
        let outcome = correct_bank(&mut self.models, z, opts)
            .and_then(|()| fuse(&self.switch, &self.models, &posterior));
        let (x, p) = restore_bank(&mut self.models, saved, outcome)?;

        self.probs = posterior;
        debug!(probs = ?self.probs, "imm correct");
        self.fs.set(&x, &p)?;
        self.fs.bump_step();
        self.diag.record_post(self.fs.state(), self.fs.cov());
        Ok(self.fs.snapshot())
    }

    fn distance(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64> {
        self.ensure_ready()?;
        self.models
            .iter()
            .zip(&self.probs)
            .map(|(m, p)| m.filter.distance(z, opts).map(|d| p * d))
            .sum()
    }

    fn likelihood(&self, z: &DVec, opts: &CorrectOptions) -> Result<f64> {
        self.ensure_ready()?;
        let pdf = self
            .models
            .iter()
            .zip(&self.probs)
            .map(|(m, p)| m.filter.likelihood(z, opts).map(|l| p * l))
            .sum::<Result<f64>>()?;
        Ok(pdf.max(f64::MIN_POSITIVE))
    }
}

impl<S> fmt::Display for ImmFilter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Interacting multiple model filter:")?;
        for (i, (m, p)) in self.models.iter().zip(&self.probs).enumerate() {
            writeln!(f, "  {i}: [{}] {}, probability: {p:.4}", m.model_type, m.filter)?;
        }
        Ok(())
    }
}

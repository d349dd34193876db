//! Static (non-interacting) multiple model filter.
//!
//! Every filter in the bank runs on its own; only the model probabilities are
//! updated from the measurement likelihoods. Useful when the motion regime is
//! fixed but unknown, e.g. to pick a process-noise level.

use crate::error::{FilterError, Result};
use crate::filter::{Diagnostics, Filter, FilterState};
use crate::imm::{
    correct_bank, fuse, initial_probs, normalise, restore_bank, save_bank, ModelEntry,
};
use crate::switch::ModelSwitch;
use crate::types::{CorrectOptions, DMat, DVec, PredictOptions};
use std::fmt;
use tracing::{debug, warn};

pub struct MmFilter<S> {
    switch: S,
    models: Vec<ModelEntry>,
    probs: Vec<f64>,
    init_probs: Vec<f64>,
    fs: FilterState,
    diag: Diagnostics,
}

impl<S: ModelSwitch> MmFilter<S> {
    pub fn new(switch: S) -> Self {
        Self {
            switch,
            models: Vec::new(),
            probs: Vec::new(),
            init_probs: Vec::new(),
            fs: FilterState::new(0),
            diag: Diagnostics::default(),
        }
    }

    /// Add filters to the bank. Only allowed before `init`.
    pub fn add_models(&mut self, entries: Vec<ModelEntry>, probs: Option<Vec<f64>>) -> Result<()> {
        if self.fs.is_initialized() {
            return Err(FilterError::ModelsLocked);
        }
        let n = self.models.len() + entries.len();
        if n == 0 {
            return Err(FilterError::NoModels);
        }
        let probs = initial_probs(n, probs)?;
        self.models.extend(entries);
        self.init_probs = probs.clone();
        self.probs = probs;
        self.fs = FilterState::new(self.models[0].filter.xdim());
        Ok(())
    }

    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    /// Probability-weighted state, in the first model's type.
    pub fn weighted_state(&self) -> Result<DVec> {
        self.state()
    }

    /// State of the most probable model, in that model's own type.
    pub fn max_prob_state(&self) -> Result<DVec> {
        self.ensure_ready()?;
        let best = self
            .probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i);
        self.models[best].filter.state()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(FilterError::NoModels);
        }
        self.fs.ensure_initialized()
    }

    fn predict_bank(&mut self, u: Option<&DVec>, opts: &PredictOptions) -> Result<()> {
        for entry in &mut self.models {
            entry.filter.predict(u, opts)?;
        }
        Ok(())
    }
}

impl<S: ModelSwitch> Filter for MmFilter<S> {
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
        if self.models.is_empty() {
            return Err(FilterError::NoModels);
        }
        let canonical = self.models[0].model_type.clone();
        for entry in &mut self.models {
            let x = self.switch.switch_state(state, &canonical, &entry.model_type)?;
            let p = self.switch.switch_cov(cov, &canonical, &entry.model_type)?;
            entry.filter.init(&x, &p)?;
        }
        self.probs = self.init_probs.clone();
        self.fs.init(state, cov)
    }

    fn reset(&mut self, state: &DVec, cov: &DMat) -> Result<()> {
        self.ensure_ready()?;
        let canonical = self.models[0].model_type.clone();
        for entry in &mut self.models {
            let x = self.switch.switch_state(state, &canonical, &entry.model_type)?;
            let p = self.switch.switch_cov(cov, &canonical, &entry.model_type)?;
            entry.filter.reset(&x, &p)?;
        }
        self.fs.reset(state, cov)
    }

    fn predict(&mut self, u: Option<&DVec>, opts: &PredictOptions) -> Result<(DVec, DMat)> {
        self.ensure_ready()?;
        let saved = save_bank(&self.models);
        let outcome = self
            .predict_bank(u, opts)
            .and_then(|()| fuse(&self.switch, &self.models, &self.probs));
        let (x, p) = restore_bank(&mut self.models, saved, outcome)?;

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
            warn!("all model likelihoods underflowed, keeping prior probabilities");
            posterior = self.probs.clone();
        }

        let saved = save_bank(&self.models);
        let outcome = correct_bank(&mut self.models, z, opts)
            .and_then(|()| fuse(&self.switch, &self.models, &posterior));
        let (x, p) = restore_bank(&mut self.models, saved, outcome)?;

        self.probs = posterior;
        debug!(probs = ?self.probs, "mmf correct");
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

impl<S> fmt::Display for MmFilter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Multiple model filter:")?;
        for (i, (m, p)) in self.models.iter().zip(&self.probs).enumerate() {
            writeln!(f, "  {i}: [{}] {}, probability: {p:.4}", m.model_type, m.filter)?;
        }
        Ok(())
    }
}

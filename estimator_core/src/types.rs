//! Fundamental types used across the entire workspace.

use crate::error::{FilterError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generic dynamic-size vector (states, measurements, innovations)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (F, H, Q, R, P, S, K)
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Motion-model tags
// ---------------------------------------------------------------------------

/// Tag identifying the state layout of a filter inside a multiple-model bank.
///
/// The tag is only interpreted by a [`ModelSwitch`](crate::switch::ModelSwitch);
/// the filters themselves never look at it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    /// Constant velocity
    Cv,
    /// Constant acceleration
    Ca,
    /// Coordinated turn (2D, turn rate appended to the CV state)
    Ct,
    /// Anything a user-supplied switch knows about
    Custom(String),
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Cv => write!(f, "cv"),
            ModelType::Ca => write!(f, "ca"),
            ModelType::Ct => write!(f, "ct"),
            ModelType::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for ModelType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cv" => Ok(ModelType::Cv),
            "ca" => Ok(ModelType::Ca),
            "ct" | "ct2d" => Ok(ModelType::Ct),
            other => Err(FilterError::UnknownModelType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-call overrides
// ---------------------------------------------------------------------------

/// Transient replacements for the transition-side matrices of one `predict`.
///
/// Fields left as `None` fall back to the filter's configured matrices. For the
/// EKF, `f` and `l` replace the Jacobians computed at the posterior.
#[derive(Clone, Debug, Default)]
pub struct PredictOptions {
    pub f: Option<DMat>,
    pub l: Option<DMat>,
    pub q: Option<DMat>,
}

impl PredictOptions {
    pub fn with_f(mut self, f: DMat) -> Self {
        self.f = Some(f);
        self
    }

    pub fn with_l(mut self, l: DMat) -> Self {
        self.l = Some(l);
        self
    }

    pub fn with_q(mut self, q: DMat) -> Self {
        self.q = Some(q);
        self
    }
}

/// Transient replacements for the measurement-side matrices of one `correct`,
/// `distance` or `likelihood` call.
#[derive(Clone, Debug, Default)]
pub struct CorrectOptions {
    pub h: Option<DMat>,
    pub m: Option<DMat>,
    pub r: Option<DMat>,
}

impl CorrectOptions {
    pub fn with_h(mut self, h: DMat) -> Self {
        self.h = Some(h);
        self
    }

    pub fn with_m(mut self, m: DMat) -> Self {
        self.m = Some(m);
        self
    }

    pub fn with_r(mut self, r: DMat) -> Self {
        self.r = Some(r);
        self
    }
}

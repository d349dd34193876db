//! `estimator_core`: Recursive Bayesian state estimators.
//!
//! # Module layout
//! - [`filter`]: Lifecycle contract (`init / reset / predict / correct`) and shared state
//! - [`kf`]: Linear Kalman filter
//! - [`ekf`]: Extended Kalman filter: additive / non-additive noise, 2nd order, iterated
//! - [`imm`]: Interacting multiple model filter
//! - [`mmf`]: Static multiple model filter
//! - [`switch`]: State conversion between motion-model types
//! - [`numdiff`]: Central-difference Jacobians and Hessians
//! - [`linalg`]: Symmetrization, Gaussian likelihood, mixture moments
//! - [`types`]: Matrix aliases, model tags, per-call overrides
//! - [`error`]: `FilterError`

pub mod ekf;
pub mod error;
pub mod filter;
pub mod imm;
pub mod kf;
pub mod linalg;
pub mod mmf;
pub mod numdiff;
pub mod switch;
pub mod types;

pub use ekf::{
    AdditiveEkf, AdditiveModel, AdditiveNoise, EkfConfig, ExtendedKalmanFilter, NonAdditiveEkf,
    NonAdditiveModel, NonAdditiveNoise,
};
pub use error::{FilterError, Result};
pub use filter::{BoxedFilter, Diagnostics, Filter, FilterState};
pub use imm::{ImmConfig, ImmFilter, ModelEntry};
pub use kf::{KalmanFilter, KfConfig};
pub use mmf::MmFilter;
pub use switch::{IdentitySwitch, ModelSwitch};
pub use types::{CorrectOptions, DMat, DVec, ModelType, PredictOptions};

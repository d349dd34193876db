//! State conversion between the CV, CA and CT layouts of [`crate::kinematic`].
//!
//! Every conversion passes through the CV layout. Components the source model
//! does not carry (accelerations, turn rate) are filled with zero mean and a
//! large variance, components the target does not carry are dropped.

use estimator_core::{DMat, DVec, FilterError, ModelSwitch, ModelType, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SwitchConfig {
    /// Variance given to components that did not exist in the source layout.
    pub uncertainty: f64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self { uncertainty: 100.0 }
    }
}

#[derive(Clone, Debug, Default)]
pub struct KinematicSwitch {
    pub config: SwitchConfig,
}

/// Linear map from one layout to another plus the target indices it leaves empty.
struct Conversion {
    map: DMat,
    fresh: Vec<usize>,
}

impl KinematicSwitch {
    pub fn new(config: SwitchConfig) -> Self {
        Self { config }
    }

    /// Number of spatial axes implied by a state of `dim` in layout `tag`.
    fn axes(tag: &ModelType, dim: usize) -> Result<usize> {
        let axes = match tag {
            ModelType::Cv if dim % 2 == 0 => dim / 2,
            ModelType::Ca if dim % 3 == 0 => dim / 3,
            ModelType::Ct if dim == 5 || dim == 7 => (dim - 1) / 2,
            ModelType::Custom(name) => return Err(FilterError::UnknownModelType(name.clone())),
            _ => 0,
        };
        if axes == 0 {
            return Err(FilterError::DimensionMismatch {
                context: "switch source layout",
                expected: Self::dim(tag, 2).unwrap_or(0),
                actual: dim,
            });
        }
        Ok(axes)
    }

    fn dim(tag: &ModelType, axes: usize) -> Result<usize> {
        match tag {
            ModelType::Cv => Ok(2 * axes),
            ModelType::Ca => Ok(3 * axes),
            ModelType::Ct => Ok(2 * axes + 1),
            ModelType::Custom(name) => Err(FilterError::UnknownModelType(name.clone())),
        }
    }

    /// `(dim(tag) × 2·axes)` map from the CV layout into `tag`.
    fn from_cv(tag: &ModelType, axes: usize) -> Result<Conversion> {
        let n = Self::dim(tag, axes)?;
        let mut map = DMat::zeros(n, 2 * axes);
        let mut fresh = Vec::new();
        match tag {
            ModelType::Cv => map.fill_with_identity(),
            ModelType::Ca => {
                for a in 0..axes {
                    map[(3 * a, 2 * a)] = 1.0;
                    map[(3 * a + 1, 2 * a + 1)] = 1.0;
                    fresh.push(3 * a + 2);
                }
            }
            ModelType::Ct => {
                if axes != 2 && axes != 3 {
                    return Err(FilterError::DimensionMismatch {
                        context: "coordinated turn axes",
                        expected: 2,
                        actual: axes,
                    });
                }
                // [x, vx, y, vy] ω [z, vz]
                for i in 0..4 {
                    map[(i, i)] = 1.0;
                }
                for i in 4..2 * axes {
                    map[(i + 1, i)] = 1.0;
                }
                fresh.push(4);
            }
            ModelType::Custom(name) => return Err(FilterError::UnknownModelType(name.clone())),
        }
        Ok(Conversion { map, fresh })
    }

    fn conversion(
        &self,
        dim: usize,
        from: &ModelType,
        to: &ModelType,
    ) -> Result<Option<Conversion>> {
        let axes = Self::axes(from, dim)?;
        if from == to {
            return Ok(None);
        }
        trace!(%from, %to, axes, "switching state layout");
        let into_cv = Self::from_cv(from, axes)?.map.transpose();
        let out = Self::from_cv(to, axes)?;
        Ok(Some(Conversion { map: out.map * into_cv, fresh: out.fresh }))
    }
}

impl ModelSwitch for KinematicSwitch {
    fn switch_state(&self, x: &DVec, from: &ModelType, to: &ModelType) -> Result<DVec> {
        Ok(match self.conversion(x.len(), from, to)? {
            Some(c) => c.map * x,
            None => x.clone(),
        })
    }

    fn switch_cov(&self, p: &DMat, from: &ModelType, to: &ModelType) -> Result<DMat> {
        if !p.is_square() {
            return Err(FilterError::DimensionMismatch {
                context: "switch covariance",
                expected: p.nrows(),
                actual: p.ncols(),
            });
        }
        Ok(match self.conversion(p.nrows(), from, to)? {
            Some(c) => {
                let mut out = &c.map * p * c.map.transpose();
                for i in c.fresh {
                    out[(i, i)] = self.config.uncertainty;
                }
                out
            }
            None => p.clone(),
        })
    }
}

//! Conversion of estimates between the state layouts of different motion models.

use crate::error::{FilterError, Result};
use crate::types::{DMat, DVec, ModelType};

/// Converts a state vector / covariance from the layout of one model type to
/// another. Used by the multiple-model filters for mixing and fusion.
pub trait ModelSwitch {
    fn switch_state(&self, x: &DVec, from: &ModelType, to: &ModelType) -> Result<DVec>;

    fn switch_cov(&self, p: &DMat, from: &ModelType, to: &ModelType) -> Result<DMat>;
}

/// Switch for banks whose models all share one state layout.
///
/// Same-tag conversions pass through; anything else is rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentitySwitch;

impl ModelSwitch for IdentitySwitch {
    fn switch_state(&self, x: &DVec, from: &ModelType, to: &ModelType) -> Result<DVec> {
        if from == to {
            Ok(x.clone())
        } else {
            Err(FilterError::UnknownModelType(format!("{from} -> {to}")))
        }
    }

    fn switch_cov(&self, p: &DMat, from: &ModelType, to: &ModelType) -> Result<DMat> {
        if from == to {
            Ok(p.clone())
        } else {
            Err(FilterError::UnknownModelType(format!("{from} -> {to}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_same_type_through() {
        let x = DVec::from_vec(vec![1.0, 2.0]);
        assert_eq!(IdentitySwitch.switch_state(&x, &ModelType::Cv, &ModelType::Cv).unwrap(), x);
        assert!(matches!(
            IdentitySwitch.switch_state(&x, &ModelType::Cv, &ModelType::Ca),
            Err(FilterError::UnknownModelType(_))
        ));
    }
}

//! Track initialisation from a single position fix.

use estimator_core::linalg::{check_len, check_shape};
use estimator_core::{DMat, DVec, Result};

/// Constant-velocity state and covariance from one position measurement.
///
/// Positions come from `z` with covariance `r`; velocities start at zero with
/// standard deviation `vmax / 2` per axis, so `±vmax` spans two sigma.
pub fn single_point_init(z: &DVec, r: &DMat, vmax: &[f64]) -> Result<(DVec, DMat)> {
    let axes = z.len();
    check_shape(r, axes, axes, "initial measurement noise")?;
    check_len(&DVec::from_column_slice(vmax), axes, "vmax")?;

    let mut x = DVec::zeros(2 * axes);
    let mut p = DMat::zeros(2 * axes, 2 * axes);
    for i in 0..axes {
        x[2 * i] = z[i];
        for j in 0..axes {
            p[(2 * i, 2 * j)] = r[(i, j)];
        }
        let sigma_v = vmax[i] / 2.0;
        p[(2 * i + 1, 2 * i + 1)] = sigma_v * sigma_v;
    }
    Ok((x, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use estimator_core::FilterError;

    #[test]
    fn builds_cv_layout() {
        let z = DVec::from_vec(vec![10.0, -4.0]);
        let r = DMat::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 9.0]);
        let (x, p) = single_point_init(&z, &r, &[100.0, 50.0]).unwrap();
        assert_eq!(x.as_slice(), &[10.0, 0.0, -4.0, 0.0]);
        assert_eq!(p[(0, 0)], 4.0);
        assert_eq!(p[(0, 2)], 1.0);
        assert_eq!(p[(2, 2)], 9.0);
        assert_eq!(p[(1, 1)], 2500.0);
        assert_eq!(p[(3, 3)], 625.0);
        assert_eq!(p[(0, 1)], 0.0);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let z = DVec::zeros(2);
        assert!(matches!(
            single_point_init(&z, &DMat::identity(3, 3), &[1.0, 1.0]),
            Err(FilterError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            single_point_init(&z, &DMat::identity(2, 2), &[1.0]),
            Err(FilterError::DimensionMismatch { .. })
        ));
    }
}

//! Linear algebra helpers shared by the estimators.
//!
//! Everything here works on dynamic `nalgebra` matrices and reports failures
//! through [`FilterError`] instead of panicking.

use crate::error::{FilterError, Result};
use crate::types::{DMat, DVec};
use std::f64::consts::PI;

/// `(P + Pᵀ) / 2`
pub fn symmetrize(p: &DMat) -> DMat {
    (p + p.transpose()) * 0.5
}

/// Inverse through an LU decomposition.
pub fn invert(m: &DMat, context: &'static str) -> Result<DMat> {
    if !m.is_square() {
        return Err(FilterError::DimensionMismatch {
            context,
            expected: m.nrows(),
            actual: m.ncols(),
        });
    }
    m.clone()
        .lu()
        .try_inverse()
        .ok_or(FilterError::IllConditioned { context })
}

/// Natural log of the determinant of a covariance matrix.
pub fn log_det(m: &DMat, context: &'static str) -> Result<f64> {
    let det = m.clone().lu().determinant();
    if det > 0.0 && det.is_finite() {
        Ok(det.ln())
    } else {
        Err(FilterError::IllConditioned { context })
    }
}

/// `v vᵀ`
pub fn outer(v: &DVec) -> DMat {
    v * v.transpose()
}

pub fn check_shape(m: &DMat, rows: usize, cols: usize, context: &'static str) -> Result<()> {
    if m.nrows() != rows {
        return Err(FilterError::DimensionMismatch {
            context,
            expected: rows,
            actual: m.nrows(),
        });
    }
    if m.ncols() != cols {
        return Err(FilterError::DimensionMismatch {
            context,
            expected: cols,
            actual: m.ncols(),
        });
    }
    Ok(())
}

pub fn check_len(v: &DVec, len: usize, context: &'static str) -> Result<()> {
    if v.len() != len {
        return Err(FilterError::DimensionMismatch {
            context,
            expected: len,
            actual: v.len(),
        });
    }
    Ok(())
}

/// Squared Mahalanobis norm `rᵀ S⁻¹ r`.
pub fn mahalanobis_sq(r: &DVec, s: &DMat) -> Result<f64> {
    let s_inv = invert(s, "innovation covariance")?;
    Ok((r.transpose() * s_inv * r)[(0, 0)])
}

/// Gating distance with a log-determinant penalty: `rᵀ S⁻¹ r + ln|S|`.
///
/// The penalty keeps a filter with a huge innovation covariance from
/// looking closer than a confident one.
pub fn penalized_distance(r: &DVec, s: &DMat) -> Result<f64> {
    Ok(mahalanobis_sq(r, s)? + log_det(s, "innovation covariance")?)
}

/// Zero-mean Gaussian density of the innovation `r ~ N(0, S)`.
///
/// Evaluated in log space and floored at `f64::MIN_POSITIVE`, so the result
/// is always strictly positive and model probabilities can never all vanish.
pub fn gaussian_likelihood(r: &DVec, s: &DMat) -> Result<f64> {
    let n = r.len() as f64;
    let maha = mahalanobis_sq(r, s)?;
    let ln_det = log_det(s, "innovation covariance")?;
    let log_pdf = -0.5 * (n * (2.0 * PI).ln() + ln_det + maha);
    let pdf = log_pdf.exp();
    if pdf < f64::MIN_POSITIVE || pdf.is_nan() {
        tracing::debug!(log_pdf, "likelihood below floor");
        return Ok(f64::MIN_POSITIVE);
    }
    Ok(pdf)
}

/// Second-order bias `½·tr(Hessᵢ P)` for every output component `i`.
pub fn quadratic_bias(hessians: &[DMat], p: &DMat) -> DVec {
    DVec::from_iterator(
        hessians.len(),
        hessians.iter().map(|hess| 0.5 * (hess * p).trace()),
    )
}

/// Weighted mean of vectors, `Σ wᵢ xᵢ`.
pub fn weighted_mean(weights: &[f64], xs: &[DVec]) -> DVec {
    let dim = xs.first().map_or(0, |x| x.len());
    weights
        .iter()
        .zip(xs)
        .fold(DVec::zeros(dim), |acc, (w, x)| acc + x * *w)
}

/// Moment-matched covariance of a Gaussian mixture around `mean`:
/// `Σ wᵢ (Pᵢ + (xᵢ − mean)(xᵢ − mean)ᵀ)`, symmetrized.
pub fn mixture_cov(weights: &[f64], xs: &[DVec], ps: &[DMat], mean: &DVec) -> DMat {
    let dim = mean.len();
    let cov = weights
        .iter()
        .zip(xs.iter().zip(ps))
        .fold(DMat::zeros(dim, dim), |acc, (w, (x, p))| {
            acc + (p + outer(&(x - mean))) * *w
        });
    symmetrize(&cov)
}

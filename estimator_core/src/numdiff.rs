//! Central-difference derivatives.
//!
//! Used as the fallback when a model does not provide analytic Jacobians or
//! Hessians.

use crate::types::{DMat, DVec};

/// Per-component step for first derivatives: `max(1e-5·|xᵢ|, √ε)`.
fn jacobian_step(xi: f64) -> f64 {
    (1e-5 * xi.abs()).max(f64::EPSILON.sqrt())
}

/// Per-component step for second derivatives. The four-point stencil divides
/// by the product of two steps, so it needs `ε^¼` rather than `√ε`.
fn hessian_step(xi: f64) -> f64 {
    (1e-4 * xi.abs()).max(f64::EPSILON.powf(0.25))
}

/// Jacobian `∂f/∂x` at `x`, one column per state component.
pub fn jacobian<F>(f: F, x: &DVec) -> DMat
where
    F: Fn(&DVec) -> DVec,
{
    let n = x.len();
    let mut columns = Vec::with_capacity(n);
    for i in 0..n {
        let eps = jacobian_step(x[i]);
        let mut xp = x.clone();
        xp[i] += eps;
        let mut xm = x.clone();
        xm[i] -= eps;
        columns.push((f(&xp) - f(&xm)) / (2.0 * eps));
    }
    if columns.is_empty() {
        return DMat::zeros(f(x).len(), 0);
    }
    DMat::from_columns(&columns)
}

/// Hessians of every output component of `f` at `x`.
///
/// Element `k` of the result is the `n×n` matrix `∂²fₖ/∂x∂xᵀ`.
pub fn hessian<F>(f: F, x: &DVec) -> Vec<DMat>
where
    F: Fn(&DVec) -> DVec,
{
    let n = x.len();
    let m = f(x).len();
    let mut hess = vec![DMat::zeros(n, n); m];
    for i in 0..n {
        let hi = hessian_step(x[i]);
        for j in i..n {
            let hj = hessian_step(x[j]);
            let shifted = |si: f64, sj: f64| {
                let mut xs = x.clone();
                xs[i] += si * hi;
                xs[j] += sj * hj;
                f(&xs)
            };
            let d = (shifted(1.0, 1.0) + shifted(-1.0, -1.0)
                - shifted(-1.0, 1.0)
                - shifted(1.0, -1.0))
                / (4.0 * hi * hj);
            for (k, h) in hess.iter_mut().enumerate() {
                h[(i, j)] = d[k];
                h[(j, i)] = d[k];
            }
        }
    }
    hess
}

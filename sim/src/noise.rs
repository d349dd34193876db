//! Gaussian noise sampling.

use anyhow::{anyhow, ensure, Result};
use estimator_core::{DMat, DVec};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Draw one sample of `N(mean, cov)`.
///
/// `cov` must be symmetric positive definite; the sample is `mean + L·n` with
/// `L` the Cholesky factor and `n` standard normal.
pub fn multi_normal<R: Rng + ?Sized>(mean: &DVec, cov: &DMat, rng: &mut R) -> Result<DVec> {
    ensure!(
        cov.nrows() == mean.len() && cov.is_square(),
        "covariance is {}x{}, mean has {} entries",
        cov.nrows(),
        cov.ncols(),
        mean.len()
    );
    let chol = cov
        .clone()
        .cholesky()
        .ok_or_else(|| anyhow!("covariance is not positive definite"))?;
    let n = DVec::from_fn(mean.len(), |_, _| StandardNormal.sample(rng));
    Ok(mean + chol.l() * n)
}

/// `count` zero-mean samples with covariance `cov`.
pub fn zero_mean_samples<R: Rng + ?Sized>(
    cov: &DMat,
    count: usize,
    rng: &mut R,
) -> Result<Vec<DVec>> {
    let mean = DVec::zeros(cov.nrows());
    (0..count).map(|_| multi_normal(&mean, cov, rng)).collect()
}

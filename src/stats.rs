//! Convergence diagnostics over an ensemble of chains.
//!
//! All functions take the retained samples as a `(n_chains, n_samples, dim)` array.

use nalgebra as na;
use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_stats::errors::EmptyInput;
use ndarray_stats::CorrelationExt;

use crate::core::to_dmatrix;
use crate::error::{SamplerError, SamplerResult};

/// Smallest accepted ratio between the smallest and largest eigenvalue of the
/// within-chain correlation matrix.
pub const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

fn check_ensemble(chains: &ArrayView3<f64>) -> SamplerResult<(usize, usize, usize)> {
    let (m, n, d) = chains.dim();
    if m < 2 {
        return Err(SamplerError::NumericalInstability(format!(
            "Between-chain variance needs at least two chains, got {m}."
        )));
    }
    if n < 2 {
        return Err(SamplerError::NumericalInstability(format!(
            "Within-chain variance needs at least two samples per chain, got {n}."
        )));
    }
    if d == 0 {
        return Err(SamplerError::NumericalInstability(
            "Samples have zero dimensions.".into(),
        ));
    }
    if chains.iter().any(|v| !v.is_finite()) {
        return Err(SamplerError::NumericalInstability(
            "Samples contain non-finite values.".into(),
        ));
    }
    Ok((m, n, d))
}

/// The within-chain covariance `W` (mean of the per-chain covariances) and the
/// between-chain covariance `B` (covariance of the chain means), both unbiased.
pub fn within_between(chains: ArrayView3<f64>) -> SamplerResult<(Array2<f64>, Array2<f64>)> {
    let (m, _, d) = check_ensemble(&chains)?;
    let empty =
        |e: EmptyInput| SamplerError::NumericalInstability(format!("Covariance failed: {e}"));

    let mut within = Array2::<f64>::zeros((d, d));
    for chain in chains.axis_iter(Axis(0)) {
        within += &chain.t().cov(1.0).map_err(empty)?;
    }
    within /= m as f64;

    let means = chains
        .mean_axis(Axis(1))
        .ok_or_else(|| SamplerError::NumericalInstability("Chains are empty.".into()))?;
    let between = means.t().cov(1.0).map_err(empty)?;

    Ok((within, between))
}

/**
Gelman-Rubin-Brooks multivariate potential scale reduction factor.

\[
\hat R = \sqrt{\frac{n-1}{n} + \frac{m+1}{m}\,\lambda_{\max}\left(W^{-1} B\right)}
\]

where `W` and `B` are the within- and between-chain covariances of [`within_between`].
The largest eigenvalue of `W^{-1} B` is taken from the symmetric matrix
`L^{-1} B L^{-T}` (`W = L L^T`), which has the same spectrum.

Values near 1 indicate the chains agree; larger values indicate they have not
converged to a common distribution.

# Errors

[`SamplerError::NumericalInstability`] when there are fewer than two chains or two
samples per chain, when samples are non-finite, or when `W` is singular or
ill-conditioned. Conditioning is judged on the correlation matrix of `W`, so rescaling a
parameter never changes the outcome (reciprocal condition number below
[`MIN_RECIPROCAL_CONDITION`]).

Reference: S. Brooks and G. Roberts, *Assessing Convergence of Markov Chain Monte Carlo
Algorithms*, Statistics and Computing 8, 319-335, 1998.

# Examples

```rust
use bounded_mcmc::stats::grb_factor;
use ndarray::Array3;

// Two chains that disagree wildly about their location.
let chains = Array3::from_shape_fn((2, 4, 1), |(c, i, _)| 100.0 * c as f64 + i as f64);
assert!(grb_factor(chains.view()).unwrap() > 10.0);
```
*/
pub fn grb_factor(chains: ArrayView3<f64>) -> SamplerResult<f64> {
    let (m, n, _) = check_ensemble(&chains)?;
    let (within, between) = within_between(chains)?;
    let lambda = max_generalized_eigenvalue(within.view(), between.view())?;
    let (m, n) = (m as f64, n as f64);
    Ok(((n - 1.0) / n + (m + 1.0) / m * lambda).sqrt())
}

/// Largest eigenvalue of `W^{-1} B` for symmetric `B` and symmetric positive-definite `W`,
/// clamped at zero.
///
/// Both matrices are first scaled by `D^{-1/2}` on each side, `D = diag(W)`. The spectrum is
/// unchanged and the conditioning check does not depend on the units of each parameter.
fn max_generalized_eigenvalue(w: ArrayView2<f64>, b: ArrayView2<f64>) -> SamplerResult<f64> {
    let scale = w.diag().mapv(|v| if v > 0.0 { 1.0 / v.sqrt() } else { f64::NAN });
    if scale.iter().any(|s| !s.is_finite()) {
        return Err(SamplerError::NumericalInstability(
            "Within-chain variance is zero in at least one dimension.".into(),
        ));
    }
    let w = to_dmatrix(w).map_with_location(|i, j, v| v * scale[i] * scale[j]);
    let b = to_dmatrix(b).map_with_location(|i, j, v| v * scale[i] * scale[j]);

    let w_eigen = w.symmetric_eigenvalues();
    let smallest = w_eigen.iter().copied().fold(f64::INFINITY, f64::min);
    let largest = w_eigen.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(smallest > largest * MIN_RECIPROCAL_CONDITION) {
        return Err(SamplerError::NumericalInstability(format!(
            "Within-chain correlation is singular or ill-conditioned \
             (eigenvalues in [{smallest:e}, {largest:e}])."
        )));
    }

    let singular =
        || SamplerError::NumericalInstability("Within-chain covariance is singular.".into());
    let l = na::Cholesky::new(w).ok_or_else(singular)?.l();
    // L^{-1} B, then L^{-1} (L^{-1} B)^T = L^{-1} B L^{-T}.
    let half = l.solve_lower_triangular(&b).ok_or_else(singular)?;
    let full = l
        .solve_lower_triangular(&half.transpose())
        .ok_or_else(singular)?;
    let sym = (&full + full.transpose()) * 0.5;

    let lambda = sym
        .symmetric_eigenvalues()
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    Ok(lambda.max(0.0))
}

/**
Univariate Gelman-Rubin potential scale reduction factor, one value per dimension.

With `W` the mean of the per-chain variances and `B = n/(m-1) * sum_i (mean_i - mean)^2`,
`R = sqrt(((n-1)/n W + B/n) / W)`. Dimensions in which every chain is constant (`W = 0`)
come out as NaN.
*/
pub fn psrf(chains: ArrayView3<f64>) -> SamplerResult<Array1<f64>> {
    let (m, n, _) = check_ensemble(&chains)?;
    let (m, n) = (m as f64, n as f64);

    let means = chains.mean_axis(Axis(1)).ok_or_else(|| {
        SamplerError::NumericalInstability("Mean reduction across samples failed.".into())
    })?;
    let grand_mean = means.mean_axis(Axis(0)).ok_or_else(|| {
        SamplerError::NumericalInstability("Mean reduction across chains failed.".into())
    })?;
    let between = (&means - &grand_mean.insert_axis(Axis(0)))
        .pow2()
        .sum_axis(Axis(0))
        * (n / (m - 1.0));
    let within = chains
        .var_axis(Axis(1), 1.0)
        .mean_axis(Axis(0))
        .ok_or_else(|| {
            SamplerError::NumericalInstability("Mean reduction across variances failed.".into())
        })?;

    Ok(Zip::from(&within)
        .and(&between)
        .map_collect(|&w, &b| {
            if w == 0.0 {
                f64::NAN
            } else {
                ((w * (n - 1.0) / n + b / n) / w).sqrt()
            }
        }))
}

/*!
Score evaluators and their composition into a tempered posterior.

Every score in this crate lives on the "-2 log density" scale: an evaluator returns
`-2 ln p(x)` up to an additive constant, so *lower* scores are *more* probable. Likelihood
and prior are both plain [`Target`]s; any `Fn(&[f64]) -> f64 + Send + Sync` closure is one.

# Examples

```rust
use std::sync::Arc;
use bounded_mcmc::core::Bounds;
use bounded_mcmc::distributions::{Gaussian, Posterior, Target};
use ndarray::{arr1, arr2};

let likelihood = Gaussian::new(arr1(&[0.0, 0.0]), arr2(&[[1.0, 0.0], [0.0, 1.0]])).unwrap();
assert_eq!(likelihood.evaluate(&[1.0, 2.0]), 5.0);

// Without a prior the box contributes a constant uniform term.
let bounds = Bounds::new(&[-1.0, -1.0], &[1.0, 1.0]).unwrap();
let posterior = Posterior::new(Arc::new(likelihood), None, 1.0, &bounds);
assert!((posterior.score(&[0.0, 0.0]) + 2.0 * 4.0_f64.ln()).abs() < 1e-12);
```
*/

use std::sync::Arc;

use nalgebra as na;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::core::{to_dmatrix, Bounds};
use crate::error::{SamplerError, SamplerResult};

/// A black-box score on the -2 log scale.
///
/// Implementations are shared read-only between worker threads, hence `Send + Sync`.
pub trait Target: Send + Sync {
    /// Returns `-2 ln p(x)` up to an additive constant.
    fn evaluate(&self, x: &[f64]) -> f64;
}

impl<F> Target for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, x: &[f64]) -> f64 {
        self(x)
    }
}

/// A likelihood that carries no information: scores zero everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Flat;

impl Target for Flat {
    fn evaluate(&self, _x: &[f64]) -> f64 {
        0.0
    }
}

/**
A multivariate Gaussian scored as its squared Mahalanobis distance
`(x - mean)^T cov^{-1} (x - mean)`, which is `-2 ln p(x)` without the normalizing constant.

The precision matrix is obtained once, through a Cholesky factorization of `cov`; both
parameters are read-only after construction.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: Array1<f64>,
    cov: Array2<f64>,
    precision: na::DMatrix<f64>,
}

impl Gaussian {
    pub fn new(mean: Array1<f64>, cov: Array2<f64>) -> SamplerResult<Self> {
        let d = mean.len();
        if cov.dim() != (d, d) {
            return Err(SamplerError::Configuration(format!(
                "Gaussian with {d}-dimensional mean needs a {d}x{d} covariance, got {:?}.",
                cov.dim()
            )));
        }
        let precision = na::Cholesky::new(to_dmatrix(cov.view()))
            .ok_or_else(|| {
                SamplerError::Configuration("Gaussian covariance is not positive-definite.".into())
            })?
            .inverse();
        Ok(Self {
            mean,
            cov,
            precision,
        })
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn cov(&self) -> ArrayView2<'_, f64> {
        self.cov.view()
    }
}

impl Target for Gaussian {
    fn evaluate(&self, x: &[f64]) -> f64 {
        let diff = na::DVector::from_iterator(
            self.mean.len(),
            x.iter().zip(self.mean.iter()).map(|(xi, mi)| xi - mi),
        );
        diff.dot(&(&self.precision * &diff))
    }
}

/**
Composes a likelihood, an optional prior and an inverse temperature `beta = 1/T` into the
score the chain kernel minimizes:

- with a prior: `beta * likelihood(x) + prior(x)`,
- without one: `beta * likelihood(x) - 2 * sum_i ln(upper[i] - lower[i])`, i.e. a uniform
  prior over the bounding box.

Cloning is cheap; the evaluators sit behind [`Arc`]s.
*/
#[derive(Clone)]
pub struct Posterior {
    likelihood: Arc<dyn Target>,
    prior: Option<Arc<dyn Target>>,
    beta: f64,
    log_volume: f64,
}

impl Posterior {
    pub fn new(
        likelihood: Arc<dyn Target>,
        prior: Option<Arc<dyn Target>>,
        temperature: f64,
        bounds: &Bounds,
    ) -> Self {
        Self {
            likelihood,
            prior,
            beta: 1.0 / temperature,
            log_volume: bounds.log_volume(),
        }
    }

    pub fn with_prior(mut self, prior: Arc<dyn Target>) -> Self {
        self.prior = Some(prior);
        self
    }

    /// The inverse temperature.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn has_prior(&self) -> bool {
        self.prior.is_some()
    }

    pub fn score(&self, x: &[f64]) -> f64 {
        match &self.prior {
            Some(prior) => self.likelihood.evaluate(x) * self.beta + prior.evaluate(x),
            None => self.likelihood.evaluate(x) * self.beta - 2.0 * self.log_volume,
        }
    }
}

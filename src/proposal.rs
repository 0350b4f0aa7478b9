//! Gaussian random-walk proposals with a Cholesky-factored covariance.

use nalgebra as na;
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::{from_dmatrix, to_dmatrix, Bounds};
use crate::error::{SamplerError, SamplerResult};

/**
Proposes `x + L z`, where `L` is the lower Cholesky factor of the proposal covariance and
`z` is a vector of independent standard normal draws, then clips the candidate into the
bounds.

The factorization happens once, in [`CholeskyProposal::new`]. The proposal holds no random
state of its own; every call draws from the generator of the chain that asks.

# Examples

```rust
use bounded_mcmc::core::Bounds;
use bounded_mcmc::proposal::CholeskyProposal;
use rand::{rngs::SmallRng, SeedableRng};

let bounds = Bounds::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
let proposal = CholeskyProposal::new(bounds.default_covariance().view(), bounds.clone()).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let candidate = proposal.sample(&[0.5, 0.5], &mut rng);
assert!(bounds.contains(&candidate));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyProposal {
    factor: na::DMatrix<f64>,
    bounds: Bounds,
}

impl CholeskyProposal {
    pub fn new(covariance: ArrayView2<f64>, bounds: Bounds) -> SamplerResult<Self> {
        let d = bounds.dim();
        if covariance.dim() != (d, d) {
            return Err(SamplerError::Configuration(format!(
                "Expected a {d}x{d} proposal covariance, got {:?}.",
                covariance.dim()
            )));
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(SamplerError::Configuration(
                "Proposal covariance contains non-finite entries.".into(),
            ));
        }
        let chol = na::Cholesky::new(to_dmatrix(covariance)).ok_or_else(|| {
            SamplerError::Configuration(
                "Cholesky factorization of the proposal covariance failed; \
                 it must be positive-definite."
                    .into(),
            )
        })?;
        Ok(Self {
            factor: chol.l(),
            bounds,
        })
    }

    /// The lower-triangular factor `L` with `L L^T = covariance`.
    pub fn factor(&self) -> Array2<f64> {
        from_dmatrix(&self.factor)
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn sample<R: Rng>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        let d = current.len();
        let z = na::DVector::<f64>::from_iterator(d, (0..d).map(|_| rng.sample(StandardNormal)));
        let step = &self.factor * z;
        let mut candidate: Vec<f64> = current.iter().zip(step.iter()).map(|(x, s)| x + s).collect();
        self.bounds.clip(&mut candidate);
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Axis};
    use ndarray_stats::CorrelationExt;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn factor_reproduces_covariance() {
        let bounds = Bounds::new(&[-10.0, -10.0], &[10.0, 10.0]).unwrap();
        let cov = arr2(&[[4.0, 2.0], [2.0, 3.0]]);
        let proposal = CholeskyProposal::new(cov.view(), bounds).unwrap();
        let l = proposal.factor();
        assert_eq!(l[[0, 1]], 0.0);
        assert_abs_diff_eq!(l.dot(&l.t()), cov, epsilon = 1e-12);
    }

    #[test]
    fn non_positive_definite_covariance_is_configuration_error() {
        let bounds = Bounds::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let cov = arr2(&[[1.0, 3.0], [3.0, 1.0]]);
        let res = CholeskyProposal::new(cov.view(), bounds.clone());
        assert!(matches!(res, Err(SamplerError::Configuration(_))));

        let zero = Array2::<f64>::zeros((2, 2));
        assert!(CholeskyProposal::new(zero.view(), bounds).is_err());
    }

    #[test]
    fn wrong_shape_is_configuration_error() {
        let bounds = Bounds::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let cov = Array2::<f64>::eye(3);
        let res = CholeskyProposal::new(cov.view(), bounds);
        assert!(matches!(res, Err(SamplerError::Configuration(_))));
    }

    #[test]
    fn candidates_are_clipped_into_bounds() {
        let bounds = Bounds::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        // Steps far larger than the box, so most candidates land on an edge.
        let cov = Array2::<f64>::eye(2) * 100.0;
        let proposal = CholeskyProposal::new(cov.view(), bounds.clone()).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut hit_edge = false;
        for _ in 0..1_000 {
            let c = proposal.sample(&[0.5, 0.5], &mut rng);
            assert!(bounds.contains(&c), "{c:?} escaped the box");
            hit_edge |= c.iter().any(|&v| v == 0.0 || v == 1.0);
        }
        assert!(hit_edge);
    }

    #[test]
    fn steps_follow_the_proposal_covariance() {
        let bounds = Bounds::new(&[-1e6, -1e6], &[1e6, 1e6]).unwrap();
        let cov = arr2(&[[4.0, 2.0], [2.0, 3.0]]);
        let proposal = CholeskyProposal::new(cov.view(), bounds).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 50_000;
        let mut steps = Array2::<f64>::zeros((n, 2));
        for mut row in steps.axis_iter_mut(Axis(0)) {
            let c = proposal.sample(&[0.0, 0.0], &mut rng);
            row[0] = c[0];
            row[1] = c[1];
        }
        let emp = steps.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(emp, cov, epsilon = 0.15);
    }
}

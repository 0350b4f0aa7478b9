use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use nalgebra as na;
use ndarray::prelude::*;
use rand::Rng;

use crate::error::{SamplerError, SamplerResult};

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

pub trait MarkovChain {
    /// Does one iteration of the chain and reports whether the proposed move was accepted.
    fn step(&mut self) -> bool;

    /// The state the chain currently sits in.
    fn current_state(&self) -> &[f64];

    /// The score (on the -2 log scale) of the current state.
    fn current_score(&self) -> f64;
}

/// Everything one run of a chain records: the visited states, their scores and the
/// fraction of accepted proposals.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRun {
    /// `n_steps x dim`, one row per step.
    pub samples: Array2<f64>,
    pub scores: Array1<f64>,
    pub acceptance_rate: f64,
}

impl ChainRun {
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.samples.ncols()
    }
}

pub fn run_chain<M: MarkovChain>(chain: &mut M, n_steps: usize) -> ChainRun {
    let dim = chain.current_state().len();
    let mut samples = Array2::<f64>::zeros((n_steps, dim));
    let mut scores = Array1::<f64>::zeros(n_steps);
    let mut accept_count = 0_usize;

    for i in 0..n_steps {
        if chain.step() {
            accept_count += 1;
        }
        samples
            .row_mut(i)
            .assign(&ArrayView1::from(chain.current_state()));
        scores[i] = chain.current_score();
    }

    ChainRun {
        samples,
        scores,
        acceptance_rate: acceptance_rate(accept_count, n_steps),
    }
}

/// Same as [`run_chain`], but reports the running acceptance rate on `pb`.
/// The bar is refreshed at most every 500 ms and once more on the last step.
pub fn run_chain_with_progress<M: MarkovChain>(
    chain: &mut M,
    n_steps: usize,
    pb: &ProgressBar,
) -> ChainRun {
    let dim = chain.current_state().len();
    let mut samples = Array2::<f64>::zeros((n_steps, dim));
    let mut scores = Array1::<f64>::zeros(n_steps);
    let mut accept_count = 0_usize;
    let mut last_update = Instant::now();

    pb.set_length(n_steps as u64);

    for i in 0..n_steps {
        if chain.step() {
            accept_count += 1;
        }
        samples
            .row_mut(i)
            .assign(&ArrayView1::from(chain.current_state()));
        scores[i] = chain.current_score();

        if last_update.elapsed() >= UPDATE_INTERVAL || i + 1 == n_steps {
            pb.set_position(i as u64 + 1);
            pb.set_message(format!(
                "AcceptRate={:.3}",
                acceptance_rate(accept_count, i + 1)
            ));
            last_update = Instant::now();
        }
    }

    ChainRun {
        samples,
        scores,
        acceptance_rate: acceptance_rate(accept_count, n_steps),
    }
}

fn acceptance_rate(accepted: usize, n_steps: usize) -> f64 {
    if n_steps == 0 {
        0.0
    } else {
        accepted as f64 / n_steps as f64
    }
}

/**
The rectangular parameter domain `lower[i] <= x[i] <= upper[i]`.

Construction checks that both limits are finite, have the same non-zero length and
satisfy `lower[i] < upper[i]`, so every method below can rely on it.

# Examples

```rust
use bounded_mcmc::core::Bounds;

let bounds = Bounds::new(&[0.0, -1.0], &[10.0, 1.0]).unwrap();
let mut x = vec![12.0, -3.0];
bounds.clip(&mut x);
assert_eq!(x, vec![10.0, -1.0]);
assert!(bounds.contains(&x));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Bounds {
    pub fn new(lower: &[f64], upper: &[f64]) -> SamplerResult<Self> {
        if lower.is_empty() {
            return Err(SamplerError::Configuration(
                "Expected at least one dimension.".into(),
            ));
        }
        if lower.len() != upper.len() {
            return Err(SamplerError::Configuration(format!(
                "Lower bound has {} entries but upper bound has {}.",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (&lo, &hi)) in lower.iter().zip(upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(SamplerError::Configuration(format!(
                    "Bounds of dimension {i} must be finite, got [{lo}, {hi}]."
                )));
            }
            if lo >= hi {
                return Err(SamplerError::Configuration(format!(
                    "Expected lower < upper in dimension {i}, got [{lo}, {hi}]."
                )));
            }
        }
        Ok(Self {
            lower: Array1::from(lower.to_vec()),
            upper: Array1::from(upper.to_vec()),
        })
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> ArrayView1<'_, f64> {
        self.lower.view()
    }

    pub fn upper(&self) -> ArrayView1<'_, f64> {
        self.upper.view()
    }

    pub fn widths(&self) -> Array1<f64> {
        &self.upper - &self.lower
    }

    /// `sum_i ln(upper[i] - lower[i])`, the log-volume of the box.
    pub fn log_volume(&self) -> f64 {
        self.widths().iter().map(|w| w.ln()).sum()
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dim()
            && x
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&v, (&lo, &hi))| lo <= v && v <= hi)
    }

    /// Clamps every component of `x` into its interval.
    pub fn clip(&self, x: &mut [f64]) {
        for (v, (&lo, &hi)) in x.iter_mut().zip(self.lower.iter().zip(self.upper.iter())) {
            *v = v.clamp(lo, hi);
        }
    }

    /// Draws a point uniformly from the box.
    pub fn sample_uniform<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .map(|(&lo, &hi)| rng.gen::<f64>() * (hi - lo) + lo)
            .collect()
    }

    /// Diagonal proposal covariance with variance `0.1 * (upper[i] - lower[i])`.
    pub fn default_covariance(&self) -> Array2<f64> {
        Array2::from_diag(&(self.widths() * 0.1))
    }
}

pub(crate) fn to_dmatrix(a: ArrayView2<f64>) -> na::DMatrix<f64> {
    na::DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub(crate) fn from_dmatrix(m: &na::DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

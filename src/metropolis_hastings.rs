/*!
# Random-Walk Metropolis Chain

A single Markov chain over a bounded box. Each step draws a candidate from a
[`CholeskyProposal`], scores it with the chain's [`Posterior`] and accepts it with
probability

\[
r = \begin{cases}
1 & \text{if } s(x) > s(x') \\
\exp\left(\tfrac{1}{2}(s(x) - s(x'))\right) & \text{otherwise}
\end{cases}
\]

where scores \(s\) are on the -2 log scale, so a lower score is a better point. The
proposal is symmetric (clipping aside), so no Hastings correction enters the ratio.

Every chain owns its random number generator, seeded from a `u64`. Two chains built with
the same seed, inputs and starting point produce bit-identical runs, regardless of which
thread they run on.

## Example Usage

```rust
use std::sync::Arc;
use bounded_mcmc::core::Bounds;
use bounded_mcmc::distributions::{Flat, Posterior};
use bounded_mcmc::metropolis_hastings::MHMarkovChain;
use bounded_mcmc::proposal::CholeskyProposal;

let bounds = Bounds::new(&[0.0], &[10.0]).unwrap();
let posterior = Posterior::new(Arc::new(Flat), None, 1.0, &bounds);
let proposal = CholeskyProposal::new(bounds.default_covariance().view(), bounds.clone()).unwrap();

let mut chain = MHMarkovChain::new(posterior, proposal, &[5.0], 42);
let run = chain.run(1_000);

assert_eq!(run.samples.nrows(), 1_000);
// A flat posterior accepts every proposal.
assert_eq!(run.acceptance_rate, 1.0);
```
*/

use indicatif::ProgressBar;
use rand::prelude::*;

use crate::core::{run_chain, run_chain_with_progress, ChainRun, MarkovChain};
use crate::distributions::Posterior;
use crate::proposal::CholeskyProposal;

/// A single random-walk Metropolis chain.
///
/// Holds its own copy of the posterior and proposal, the current state and its score, and a
/// chain-specific random number generator.
#[derive(Clone)]
pub struct MHMarkovChain {
    /// The score being sampled.
    pub posterior: Posterior,
    /// The random walk used to generate candidates.
    pub proposal: CholeskyProposal,
    current_state: Vec<f64>,
    current_score: f64,
    /// The chain-specific random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl MHMarkovChain {
    /// Creates a chain at `initial_state`, scoring it immediately.
    pub fn new(
        posterior: Posterior,
        proposal: CholeskyProposal,
        initial_state: &[f64],
        seed: u64,
    ) -> Self {
        let rng = SmallRng::seed_from_u64(seed);
        Self::with_rng(posterior, proposal, initial_state.to_vec(), seed, rng)
    }

    /// Creates a chain whose starting point is drawn uniformly from the proposal's bounds,
    /// using the chain's own generator.
    pub fn uniform_start(posterior: Posterior, proposal: CholeskyProposal, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let initial_state = proposal.bounds().sample_uniform(&mut rng);
        Self::with_rng(posterior, proposal, initial_state, seed, rng)
    }

    fn with_rng(
        posterior: Posterior,
        proposal: CholeskyProposal,
        initial_state: Vec<f64>,
        seed: u64,
        rng: SmallRng,
    ) -> Self {
        let current_score = posterior.score(&initial_state);
        Self {
            posterior,
            proposal,
            current_state: initial_state,
            current_score,
            seed,
            rng,
        }
    }

    /// Runs the chain for exactly `n_steps` steps, continuing from wherever it currently is.
    pub fn run(&mut self, n_steps: usize) -> ChainRun {
        run_chain(self, n_steps)
    }

    /// Like [`MHMarkovChain::run`], reporting progress and the running acceptance rate on `pb`.
    pub fn run_with_progress(&mut self, n_steps: usize, pb: &ProgressBar) -> ChainRun {
        run_chain_with_progress(self, n_steps, pb)
    }
}

impl MarkovChain for MHMarkovChain {
    fn step(&mut self) -> bool {
        let candidate = self.proposal.sample(&self.current_state, &mut self.rng);
        let candidate_score = self.posterior.score(&candidate);

        // Strict improvements never go through exp(); ties take exp(0) = 1.
        let ratio = if self.current_score > candidate_score {
            1.0
        } else {
            (0.5 * (self.current_score - candidate_score)).exp()
        };

        let u: f64 = self.rng.gen();
        if u <= ratio {
            self.current_state = candidate;
            self.current_score = candidate_score;
            true
        } else {
            false
        }
    }

    fn current_state(&self) -> &[f64] {
        &self.current_state
    }

    fn current_score(&self) -> f64 {
        self.current_score
    }
}

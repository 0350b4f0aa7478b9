/*!
# Multi-Chain Sampler

Runs `n_chains` independent [`MHMarkovChain`]s over the same bounded posterior. Every chain
first runs `n_burnin` discarded steps from its starting point, then `n_samples` retained
steps from wherever the burn-in left it. The retained runs form a [`ChainEnsemble`], which
merges into a flat [`SamplerOutput`] together with the Gelman-Rubin-Brooks factor.

Chains run one after another on the calling thread, or on a dedicated worker pool of
`n_workers` threads. The pool first runs all burn-ins as one batch and only then all
sampling phases as a second batch. Chain `i` owns a generator seeded with `seed + i`, so
both execution modes produce identical output for the same seed.

## Example Usage

```rust
use bounded_mcmc::distributions::Flat;
use bounded_mcmc::sampler::{Sampler, SamplerConfig};

let config = SamplerConfig {
    n_chains: 3,
    n_burnin: 200,
    n_samples: 500,
    seed: Some(42),
    ..SamplerConfig::default()
};
let sampler = Sampler::new(Flat, &[0.0, 0.0], &[1.0, 2.0], config).unwrap();
let output = sampler.run().unwrap();

assert_eq!(output.samples.dim(), (3 * 500, 2));
assert_eq!(output.scores.len(), 3 * 500);
assert_eq!(output.acceptance_rates.len(), 3);
```
*/

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::prelude::*;
use rand::prelude::*;
use rayon::prelude::*;

use crate::core::{Bounds, ChainRun, MarkovChain};
use crate::distributions::{Posterior, Target};
use crate::error::{Phase, SamplerError, SamplerResult};
use crate::metropolis_hastings::MHMarkovChain;
use crate::proposal::CholeskyProposal;
use crate::stats;

/// Options of a sampler invocation. Every field has a default, see [`SamplerConfig::default`].
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Number of independent chains. Default 5.
    pub n_chains: usize,
    /// Discarded steps per chain before sampling starts. Default 10 000.
    pub n_burnin: usize,
    /// Retained steps per chain. Default 10 000.
    pub n_samples: usize,
    /// The likelihood is scaled by `1 / temperature`. Default 1.
    pub temperature: f64,
    /// Proposal covariance (`dim x dim`). Defaults to [`Bounds::default_covariance`].
    pub covariance: Option<Array2<f64>>,
    /// Starting points (`n_chains x dim`). Defaults to uniform draws from the bounds.
    pub initial_states: Option<Array2<f64>>,
    /// Run chains on a worker pool instead of the calling thread. Default off.
    pub parallel: bool,
    /// Size of the worker pool, used only when `parallel` is set. Default 4.
    pub n_workers: usize,
    /// Base seed; chain `i` uses `seed + i`. Drawn at random when absent.
    pub seed: Option<u64>,
    /// Show one progress bar per chain and phase. Default off.
    pub progress: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_chains: 5,
            n_burnin: 10_000,
            n_samples: 10_000,
            temperature: 1.0,
            covariance: None,
            initial_states: None,
            parallel: false,
            n_workers: 4,
            seed: None,
            progress: false,
        }
    }
}

/// The merged result of a sampler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOutput {
    /// `(n_chains * n_samples) x dim`; rows `[i * n_samples, (i + 1) * n_samples)` are chain `i`.
    pub samples: Array2<f64>,
    /// Score of every row of `samples`.
    pub scores: Array1<f64>,
    /// Acceptance rate of each chain's sampling phase.
    pub acceptance_rates: Array1<f64>,
    /// Gelman-Rubin-Brooks factor, NaN when it cannot be computed.
    pub grb: f64,
}

/// The retained runs of all chains, in chain order, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEnsemble {
    chains: Vec<ChainRun>,
}

impl ChainEnsemble {
    /// Wraps chain runs that all share the same length and dimension.
    pub fn new(chains: Vec<ChainRun>) -> SamplerResult<Self> {
        let first = chains.first().ok_or_else(|| {
            SamplerError::Configuration("An ensemble needs at least one chain.".into())
        })?;
        let shape = first.samples.dim();
        if let Some(i) = chains.iter().position(|c| c.samples.dim() != shape) {
            return Err(SamplerError::Configuration(format!(
                "Chain {i} has shape {:?}, expected {shape:?}.",
                chains[i].samples.dim()
            )));
        }
        if let Some(i) = chains.iter().position(|c| c.scores.len() != shape.0) {
            return Err(SamplerError::Configuration(format!(
                "Chain {i} has {} scores for {} samples.",
                chains[i].scores.len(),
                shape.0
            )));
        }
        Ok(Self { chains })
    }

    pub fn chains(&self) -> &[ChainRun] {
        &self.chains
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn n_samples(&self) -> usize {
        self.chains[0].len()
    }

    pub fn dim(&self) -> usize {
        self.chains[0].dim()
    }

    /// All retained samples as `(n_chains, n_samples, dim)`.
    pub fn samples(&self) -> Array3<f64> {
        let (m, n, d) = (self.n_chains(), self.n_samples(), self.dim());
        Array3::from_shape_fn((m, n, d), |(c, i, j)| self.chains[c].samples[[i, j]])
    }

    /// All retained scores as `(n_chains, n_samples)`.
    pub fn scores(&self) -> Array2<f64> {
        let (m, n) = (self.n_chains(), self.n_samples());
        Array2::from_shape_fn((m, n), |(c, i)| self.chains[c].scores[i])
    }

    pub fn acceptance_rates(&self) -> Array1<f64> {
        self.chains.iter().map(|c| c.acceptance_rate).collect()
    }

    /// The Gelman-Rubin-Brooks factor of the ensemble, see [`stats::grb_factor`].
    pub fn grb(&self) -> SamplerResult<f64> {
        stats::grb_factor(self.samples().view())
    }

    /// Concatenates the chains in order. A GRB factor that cannot be computed is
    /// logged and reported as NaN; the samples are kept either way.
    pub fn merge(self) -> SamplerOutput {
        let grb = self.grb().unwrap_or_else(|e| {
            warn!("Gelman-Rubin-Brooks factor unavailable: {e}");
            f64::NAN
        });
        let (m, n, d) = (self.n_chains(), self.n_samples(), self.dim());
        let samples =
            Array2::from_shape_fn((m * n, d), |(r, j)| self.chains[r / n].samples[[r % n, j]]);
        let scores = Array1::from_shape_fn(m * n, |r| self.chains[r / n].scores[r % n]);
        SamplerOutput {
            samples,
            scores,
            acceptance_rates: self.acceptance_rates(),
            grb,
        }
    }
}

/**
The multi-chain sampler. All inputs are validated by [`Sampler::new`], including the
Cholesky factorization of the proposal covariance, so a sampler that exists can run.
*/
#[derive(Clone)]
pub struct Sampler {
    posterior: Posterior,
    proposal: CholeskyProposal,
    config: SamplerConfig,
    seed: u64,
}

impl Sampler {
    /// Builds a sampler for `likelihood` over the box `[lower, upper]`.
    ///
    /// # Errors
    ///
    /// [`SamplerError::Configuration`] for invalid bounds, chain counts, temperature, pool
    /// size, a covariance of the wrong shape or one that is not positive-definite, and
    /// starting points of the wrong shape or outside the bounds.
    pub fn new<L: Target + 'static>(
        likelihood: L,
        lower: &[f64],
        upper: &[f64],
        config: SamplerConfig,
    ) -> SamplerResult<Self> {
        let bounds = Bounds::new(lower, upper)?;
        let d = bounds.dim();

        if config.n_chains == 0 {
            return Err(SamplerError::Configuration(
                "Expected at least one chain.".into(),
            ));
        }
        if config.n_samples == 0 {
            return Err(SamplerError::Configuration(
                "Expected at least one retained sample per chain.".into(),
            ));
        }
        if !(config.temperature.is_finite() && config.temperature > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "Temperature must be positive and finite, got {}.",
                config.temperature
            )));
        }
        if config.parallel && config.n_workers == 0 {
            return Err(SamplerError::Configuration(
                "Parallel execution needs at least one worker.".into(),
            ));
        }
        if let Some(starts) = &config.initial_states {
            if starts.dim() != (config.n_chains, d) {
                return Err(SamplerError::Configuration(format!(
                    "Expected initial states of shape {:?}, got {:?}.",
                    (config.n_chains, d),
                    starts.dim()
                )));
            }
            for (i, start) in starts.axis_iter(Axis(0)).enumerate() {
                if !bounds.contains(&start.to_vec()) {
                    return Err(SamplerError::Configuration(format!(
                        "Initial state of chain {i} ({start}) lies outside the bounds."
                    )));
                }
            }
        }

        let proposal = match &config.covariance {
            Some(cov) => CholeskyProposal::new(cov.view(), bounds.clone())?,
            None => CholeskyProposal::new(bounds.default_covariance().view(), bounds.clone())?,
        };
        let posterior = Posterior::new(Arc::new(likelihood), None, config.temperature, &bounds);
        let seed = config.seed.unwrap_or_else(|| thread_rng().gen::<u64>());

        Ok(Self {
            posterior,
            proposal,
            config,
            seed,
        })
    }

    /// Replaces the implicit uniform prior over the bounds with `prior`.
    pub fn with_prior<P: Target + 'static>(mut self, prior: P) -> Self {
        self.posterior = self.posterior.with_prior(Arc::new(prior));
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn bounds(&self) -> &Bounds {
        self.proposal.bounds()
    }

    /// The base seed in use (either the configured one or the one drawn at construction).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs all chains and merges them, see [`ChainEnsemble::merge`].
    pub fn run(&self) -> SamplerResult<SamplerOutput> {
        let ensemble = self.run_ensemble()?;
        let output = ensemble.merge();
        info!(
            "Sampling finished: acceptance rates {}, GRB {:.4}",
            output.acceptance_rates, output.grb
        );
        Ok(output)
    }

    /// Runs burn-in and sampling for every chain and returns the retained runs.
    ///
    /// # Errors
    ///
    /// [`SamplerError::Worker`] when any chain fails; nothing from the other chains is
    /// returned in that case.
    pub fn run_ensemble(&self) -> SamplerResult<ChainEnsemble> {
        let SamplerConfig {
            n_chains,
            n_burnin,
            n_samples,
            parallel,
            n_workers,
            ..
        } = self.config;
        info!(
            "Running {n_chains} chains ({n_burnin} burn-in + {n_samples} samples each, {})",
            if parallel {
                format!("{n_workers} workers")
            } else {
                "sequential".to_string()
            }
        );

        let progress = if self.config.progress {
            Some(Progress::new()?)
        } else {
            None
        };

        let runs = if parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_workers)
                .build()
                .map_err(|e| {
                    SamplerError::Configuration(format!("Failed to build the worker pool: {e}"))
                })?;
            pool.install(|| self.run_parallel(progress.as_ref()))?
        } else {
            self.run_sequential(progress.as_ref())?
        };

        ChainEnsemble::new(runs)
    }

    fn run_sequential(&self, progress: Option<&Progress>) -> SamplerResult<Vec<ChainRun>> {
        (0..self.config.n_chains)
            .map(|i| {
                let mut chain = self.init_chain(i)?;
                self.run_phase(&mut chain, i, Phase::BurnIn, progress)?;
                self.run_phase(&mut chain, i, Phase::Sampling, progress)
            })
            .collect()
    }

    /// Two batches: every burn-in is collected before the first sampling phase starts.
    fn run_parallel(&self, progress: Option<&Progress>) -> SamplerResult<Vec<ChainRun>> {
        let mut chains: Vec<MHMarkovChain> = (0..self.config.n_chains)
            .into_par_iter()
            .map(|i| -> SamplerResult<MHMarkovChain> {
                let mut chain = self.init_chain(i)?;
                self.run_phase(&mut chain, i, Phase::BurnIn, progress)?;
                Ok(chain)
            })
            .collect::<SamplerResult<_>>()?;

        chains
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| self.run_phase(chain, i, Phase::Sampling, progress))
            .collect()
    }

    fn init_chain(&self, index: usize) -> SamplerResult<MHMarkovChain> {
        let seed = self.seed.wrapping_add(index as u64);
        let chain = run_unit(index, Phase::BurnIn, || match &self.config.initial_states {
            Some(starts) => MHMarkovChain::new(
                self.posterior.clone(),
                self.proposal.clone(),
                &starts.row(index).to_vec(),
                seed,
            ),
            None => {
                MHMarkovChain::uniform_start(self.posterior.clone(), self.proposal.clone(), seed)
            }
        })?;
        // -inf would freeze the chain; +inf is left alone since any finite candidate beats it.
        let score = chain.current_score();
        if score.is_nan() || score == f64::NEG_INFINITY {
            return Err(SamplerError::Worker {
                chain: index,
                phase: Phase::BurnIn,
                message: format!(
                    "Starting point {:?} has score {score}.",
                    chain.current_state()
                ),
            });
        }
        Ok(chain)
    }

    fn run_phase(
        &self,
        chain: &mut MHMarkovChain,
        index: usize,
        phase: Phase,
        progress: Option<&Progress>,
    ) -> SamplerResult<ChainRun> {
        let n_steps = match phase {
            Phase::BurnIn => self.config.n_burnin,
            Phase::Sampling => self.config.n_samples,
        };
        let run = run_unit(index, phase, || match progress {
            Some(progress) => {
                let pb = progress.bar(index, phase, n_steps);
                let run = chain.run_with_progress(n_steps, &pb);
                pb.finish_with_message("Done!");
                run
            }
            None => chain.run(n_steps),
        })?;
        debug!(
            "Chain {index} finished {phase}: {n_steps} steps, acceptance rate {:.3}",
            run.acceptance_rate
        );
        Ok(run)
    }
}

/// Runs one unit of work, turning a panic (typically from an evaluator) into an error.
fn run_unit<T, F>(chain: usize, phase: Phase, unit: F) -> SamplerResult<T>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(unit)).map_err(|payload| SamplerError::Worker {
        chain,
        phase,
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

struct Progress {
    multi: MultiProgress,
    style: ProgressStyle,
}

impl Progress {
    fn new() -> SamplerResult<Self> {
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| SamplerError::Configuration(format!("Bad progress template: {e}")))?
            .progress_chars("##-");
        Ok(Self {
            multi: MultiProgress::new(),
            style,
        })
    }

    fn bar(&self, index: usize, phase: Phase, n_steps: usize) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(n_steps as u64));
        pb.set_prefix(format!("Chain {index} {phase}"));
        pb.set_style(self.style.clone());
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Flat, Gaussian};
    use ndarray::{arr1, arr2};

    fn small_config() -> SamplerConfig {
        SamplerConfig {
            n_chains: 3,
            n_burnin: 100,
            n_samples: 200,
            seed: Some(42),
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let c = SamplerConfig::default();
        assert_eq!(
            (c.n_chains, c.n_burnin, c.n_samples, c.n_workers),
            (5, 10_000, 10_000, 4)
        );
        assert_eq!(c.temperature, 1.0);
        assert!(!c.parallel && !c.progress);
        assert!(c.covariance.is_none() && c.initial_states.is_none() && c.seed.is_none());
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let bad = |config: SamplerConfig| {
            matches!(
                Sampler::new(Flat, &[0.0, 0.0], &[1.0, 1.0], config),
                Err(SamplerError::Configuration(_))
            )
        };
        assert!(bad(SamplerConfig {
            n_chains: 0,
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            n_samples: 0,
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            temperature: 0.0,
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            temperature: f64::NAN,
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            parallel: true,
            n_workers: 0,
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            covariance: Some(Array2::eye(3)),
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            covariance: Some(arr2(&[[1.0, 2.0], [2.0, 1.0]])),
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            initial_states: Some(Array2::zeros((2, 2))),
            ..small_config()
        }));
        assert!(bad(SamplerConfig {
            initial_states: Some(Array2::from_elem((3, 2), 1.5)),
            ..small_config()
        }));
        assert!(matches!(
            Sampler::new(Flat, &[0.0, 1.0], &[1.0, 1.0], small_config()),
            Err(SamplerError::Configuration(_))
        ));
    }

    #[test]
    fn zero_burn_in_starts_sampling_at_the_initial_state() {
        let config = SamplerConfig {
            n_chains: 2,
            n_burnin: 0,
            n_samples: 1,
            initial_states: Some(arr2(&[[0.25], [0.75]])),
            // A proposal this narrow barely moves the chain in one step.
            covariance: Some(arr2(&[[1e-12]])),
            ..small_config()
        };
        let sampler = Sampler::new(Flat, &[0.0], &[1.0], config).unwrap();
        let ensemble = sampler.run_ensemble().unwrap();
        assert!((ensemble.chains()[0].samples[[0, 0]] - 0.25).abs() < 1e-4);
        assert!((ensemble.chains()[1].samples[[0, 0]] - 0.75).abs() < 1e-4);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let target = Gaussian::new(arr1(&[1.0, -1.0]), arr2(&[[1.0, 0.3], [0.3, 0.5]])).unwrap();
        let sequential =
            Sampler::new(target.clone(), &[-5.0, -5.0], &[5.0, 5.0], small_config()).unwrap();
        let parallel = Sampler::new(
            target,
            &[-5.0, -5.0],
            &[5.0, 5.0],
            SamplerConfig {
                parallel: true,
                n_workers: 2,
                ..small_config()
            },
        )
        .unwrap();
        assert_eq!(sequential.run().unwrap(), parallel.run().unwrap());
    }

    #[test]
    fn chain_seeds_are_offsets_of_the_base_seed() {
        let sampler = Sampler::new(Flat, &[0.0], &[1.0], small_config()).unwrap();
        assert_eq!(sampler.seed(), 42);
        assert_eq!(sampler.init_chain(2).unwrap().seed, 44);
        let unseeded = Sampler::new(
            Flat,
            &[0.0],
            &[1.0],
            SamplerConfig {
                seed: None,
                ..small_config()
            },
        )
        .unwrap();
        let seed = unseeded.seed();
        assert_eq!(unseeded.init_chain(1).unwrap().seed, seed.wrapping_add(1));
    }

    #[test]
    fn progress_bars_do_not_change_results() {
        let plain = Sampler::new(Flat, &[0.0], &[1.0], small_config()).unwrap();
        let with_bars = Sampler::new(
            Flat,
            &[0.0],
            &[1.0],
            SamplerConfig {
                progress: true,
                ..small_config()
            },
        )
        .unwrap();
        assert_eq!(plain.run().unwrap(), with_bars.run().unwrap());
    }

    #[test]
    fn ensemble_rejects_mismatched_chains() {
        let run = |n: usize| ChainRun {
            samples: Array2::zeros((n, 2)),
            scores: Array1::zeros(n),
            acceptance_rate: 0.5,
        };
        assert!(ChainEnsemble::new(vec![]).is_err());
        assert!(ChainEnsemble::new(vec![run(3), run(4)]).is_err());
        let mut short_scores = run(3);
        short_scores.scores = Array1::zeros(2);
        assert!(ChainEnsemble::new(vec![run(3), short_scores]).is_err());
        assert!(ChainEnsemble::new(vec![run(3), run(3)]).is_ok());
    }

    #[test]
    fn degenerate_starting_scores() {
        let config = SamplerConfig {
            n_chains: 2,
            ..small_config()
        };
        let infinite = |_: &[f64]| f64::NEG_INFINITY;
        let minus_inf = Sampler::new(infinite, &[0.0], &[1.0], config.clone()).unwrap();
        match minus_inf.run() {
            Err(SamplerError::Worker {
                chain,
                phase,
                message,
            }) => {
                assert_eq!((chain, phase), (0, Phase::BurnIn));
                assert!(message.ends_with("has score -inf."), "{message}");
            }
            other => panic!("expected a worker failure, got {other:?}"),
        }

        // A start outside the support is left as soon as a finite candidate appears.
        let outside = |x: &[f64]| if x[0] < 0.5 { f64::INFINITY } else { 0.0 };
        let config = SamplerConfig {
            initial_states: Some(arr2(&[[0.1], [0.2]])),
            ..config
        };
        let output = Sampler::new(outside, &[0.0], &[1.0], config)
            .unwrap()
            .run()
            .unwrap();
        assert!(output.scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn single_chain_reports_nan_grb() {
        let sampler = Sampler::new(
            Flat,
            &[0.0],
            &[1.0],
            SamplerConfig {
                n_chains: 1,
                ..small_config()
            },
        )
        .unwrap();
        let output = sampler.run().unwrap();
        assert!(output.grb.is_nan());
        assert_eq!(output.samples.nrows(), 200);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let err = run_unit(4, Phase::Sampling, || -> f64 { panic!("bad evaluator") }).unwrap_err();
        assert_eq!(
            err,
            SamplerError::Worker {
                chain: 4,
                phase: Phase::Sampling,
                message: "bad evaluator".to_string()
            }
        );
        let owned = run_unit(0, Phase::BurnIn, || -> f64 { panic!("{}", 12) }).unwrap_err();
        assert!(owned.to_string().ends_with(": 12"));
    }
}

//! # Bounded MCMC
//!
//! Multi-chain random-walk **Metropolis** sampling of an unnormalized posterior over a
//! bounded box, with the multivariate **Gelman-Rubin-Brooks** factor to judge whether the
//! chains have mixed.
//!
//! You provide:
//! - a likelihood implementing [`distributions::Target`] (any `Fn(&[f64]) -> f64 + Send + Sync`
//!   works), returning `-2 ln L(x)` up to a constant,
//! - the lower and upper bounds of every parameter,
//! - optionally a prior (also a `Target`) and a [`sampler::SamplerConfig`].
//!
//! ## Example
//!
//! ```rust
//! use bounded_mcmc::sampler::{Sampler, SamplerConfig};
//!
//! // -2 log-likelihood of a unit Gaussian centred at 3.
//! let likelihood = |x: &[f64]| (x[0] - 3.0).powi(2);
//!
//! let config = SamplerConfig {
//!     n_chains: 4,
//!     n_burnin: 1_000,
//!     n_samples: 5_000,
//!     parallel: true,
//!     seed: Some(42),
//!     ..SamplerConfig::default()
//! };
//! let output = Sampler::new(likelihood, &[-10.0], &[10.0], config)?.run()?;
//!
//! let mean = output.samples.sum() / output.samples.len() as f64;
//! assert!((mean - 3.0).abs() < 0.5);
//! assert!(output.grb < 1.2);
//! # Ok::<(), bounded_mcmc::error::SamplerError>(())
//! ```
//!
//! Log records go through the [`log`] facade; install any logger to see them.

pub mod core;
pub mod distributions;
pub mod error;
pub mod metropolis_hastings;
pub mod proposal;
pub mod sampler;
pub mod stats;

pub use error::{SamplerError, SamplerResult};
pub use sampler::{ChainEnsemble, Sampler, SamplerConfig, SamplerOutput};

//! Error type shared by the sampler, the chain kernel and the diagnostics.

use std::fmt;

use thiserror::Error;

/// The two phases every chain goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BurnIn,
    Sampling,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::BurnIn => write!(f, "burn-in"),
            Phase::Sampling => write!(f, "sampling"),
        }
    }
}

/// Everything that can go wrong while setting up or running the sampler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    /// Invalid inputs, raised before any chain runs.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// The convergence diagnostic cannot be computed from the given chains.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// A unit of work failed; the whole batch is discarded.
    #[error("Chain {chain} failed during {phase}: {message}")]
    Worker {
        chain: usize,
        phase: Phase,
        message: String,
    },
}

/// Convenience type for `Result<T, SamplerError>`.
pub type SamplerResult<T> = Result<T, SamplerError>;

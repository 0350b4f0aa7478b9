//! Checks the sampler against a correlated 2D Gaussian by comparing the sample mean and
//! covariance with those of the target.

use bounded_mcmc::distributions::Gaussian;
use bounded_mcmc::sampler::{Sampler, SamplerConfig};
use ndarray::{arr1, arr2, Array2, Axis};
use ndarray_stats::CorrelationExt;

#[cfg(test)]
mod tests {
    use super::*;

    const N_CHAINS: usize = 4;
    const SAMPLE_SIZE: usize = 10_000;
    const BURNIN: usize = 2_000;
    const SEED: u64 = 42;

    fn sample(target: Gaussian) -> Array2<f64> {
        let config = SamplerConfig {
            n_chains: N_CHAINS,
            n_burnin: BURNIN,
            n_samples: SAMPLE_SIZE,
            parallel: true,
            seed: Some(SEED),
            ..SamplerConfig::default()
        };
        // The box is wide enough that clipping barely touches the target.
        Sampler::new(target, &[-20.0, -20.0], &[20.0, 20.0], config)
            .unwrap()
            .run()
            .unwrap()
            .samples
    }

    fn target_cov() -> Array2<f64> {
        arr2(&[[4.0, 2.0], [2.0, 3.0]])
    }

    /// Sample mean and covariance match the target.
    #[test]
    fn test_two_d_gaussian_accept() {
        let target = Gaussian::new(arr1(&[0.0, 0.0]), target_cov()).unwrap();
        let samples = sample(target);
        assert_eq!(samples.dim(), (N_CHAINS * SAMPLE_SIZE, 2));

        let mean = samples.mean_axis(Axis(0)).unwrap();
        for (i, m) in mean.iter().enumerate() {
            assert!(m.abs() < 0.3, "Mean deviation in dimension {i} too large: {m}");
        }

        // Rows of the transpose are the variables.
        let cov = samples.t().cov(1.0).unwrap();
        let diff = (&cov - &target_cov()).mapv(f64::abs);
        for ((i, j), d) in diff.indexed_iter() {
            assert!(*d < 0.5, "Covariance deviation at ({i}, {j}) too large: {d}");
        }
    }

    /// Sampling the wrong target yields a covariance far from the right one.
    #[test]
    fn test_two_d_gaussian_reject() {
        let false_target = Gaussian::new(arr1(&[0.0, 0.0]), Array2::eye(2)).unwrap();
        let samples = sample(false_target);

        let cov = samples.t().cov(1.0).unwrap();
        let max_diff = (&cov - &target_cov())
            .iter()
            .fold(0.0_f64, |acc, d| acc.max(d.abs()));
        assert!(
            max_diff > 1.0,
            "Covariance of the wrong target is too close to the right one: {cov}"
        );
    }
}

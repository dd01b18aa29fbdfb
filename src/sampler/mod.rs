//! Sampling and optimization of a scalar log-probability over bounded free parameters.
//!
//! Both fit modes reduce to an [Objective]: a pure function of the free-parameter vector
//! returning the log-posterior, `-inf` for vectors it rejects. A [FitAlgorithm] explores it within
//! the hard bounds of the [ResolvedParameters] and reports a [SamplerOutput], which is then
//! summarised by the [ResultPackager](crate::ResultPackager).
//!
//! - [McmcSampler]: affine-invariant ensemble sampler, the output is a full chain.
//! - [CobylaOptimizer]: derivative-free local optimizer, the output is a point estimate with an
//!   optional covariance from the curvature of the log-probability.
//!
//! A run moves through `Idle → Initialized → Running` and ends with a [SamplerStatus] or with a
//! [FailureReason](crate::FailureReason). The samplers never look at the observed data, they only
//! call the objective.

mod bounds;

mod cobyla;
pub use cobyla::CobylaOptimizer;

mod hessian;

mod mcmc;
pub use mcmc::{McmcSampler, WalkerInit};

use crate::error::{ConfigError, FitError};
use crate::params::ResolvedParameters;

use enum_dispatch::enum_dispatch;
use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Log-posterior seen by the samplers
pub trait Objective: Sync {
    /// Length of the free-parameter vector
    fn ndim(&self) -> usize;

    /// Log-posterior at `x`, `-inf` if `x` is rejected
    fn ln_prob(&self, x: &[f64]) -> f64;
}

/// Cooperative cancellation flag shared between a running fit and its caller
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the fit to stop at the next check point
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Terminal state of a sampler run that produced a usable estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplerStatus {
    Converged,
    MaxIterationsReached,
    /// The run was ended by a [StopSignal], the estimate uses the partial chain
    Stopped,
}

/// Ensemble chain, step-major
#[derive(Clone, Debug, PartialEq)]
pub struct Chain {
    /// Walker positions, shape `(steps, walkers, ndim)`
    pub positions: Array3<f64>,
    /// Log-probabilities of the positions, shape `(steps, walkers)`
    pub ln_prob: Array2<f64>,
}

impl Chain {
    pub fn n_steps(&self) -> usize {
        self.ln_prob.nrows()
    }

    pub fn n_walkers(&self) -> usize {
        self.ln_prob.ncols()
    }

    pub fn ndim(&self) -> usize {
        self.positions.len_of(Axis(2))
    }

    /// Samples with finite log-probability taken from the steps `begin..end`, shape
    /// `(samples, ndim)`
    pub fn finite_samples(&self, begin: usize, end: usize) -> Array2<f64> {
        let positions = self.positions.slice(s![begin..end, .., ..]);
        let ln_prob = self.ln_prob.slice(s![begin..end, ..]);
        let rows: Vec<_> = positions
            .outer_iter()
            .zip(ln_prob.outer_iter())
            .flat_map(|(walkers, ln_prob)| {
                walkers
                    .outer_iter()
                    .zip(ln_prob.into_iter())
                    .filter(|(_, lp)| lp.is_finite())
                    .map(|(x, _)| x.to_owned())
                    .collect::<Vec<_>>()
            })
            .collect();
        let mut samples = Array2::zeros((rows.len(), self.ndim()));
        for (mut row, x) in samples.outer_iter_mut().zip(rows.iter()) {
            row.assign(x);
        }
        samples
    }

    /// Compares the means of the last two quarters of the chain
    ///
    /// The chain is converged if for every parameter the two means differ by no more than
    /// `tolerance` standard deviations of the last half of the chain.
    pub fn is_converged(&self, tolerance: f64) -> bool {
        let n = self.n_steps();
        if n < 4 {
            return false;
        }
        let third = self.finite_samples(n / 2, 3 * n / 4);
        let fourth = self.finite_samples(3 * n / 4, n);
        let half = self.finite_samples(n / 2, n);
        if third.nrows() < 2 || fourth.nrows() < 2 {
            return false;
        }
        let (Some(mean3), Some(mean4)) = (third.mean_axis(Axis(0)), fourth.mean_axis(Axis(0)))
        else {
            return false;
        };
        let std = half.std_axis(Axis(0), 1.0);
        mean3
            .iter()
            .zip(mean4.iter())
            .zip(std.iter())
            .all(|((m3, m4), s)| (m3 - m4).abs() <= tolerance * s)
    }
}

/// What a sampler run estimated
#[derive(Clone, Debug, PartialEq)]
pub enum Estimate {
    /// Full ensemble chain, summarised by percentiles
    Chain(Chain),
    /// Single optimum, optionally with the covariance of the free parameters
    Point { covariance: Option<Array2<f64>> },
}

/// Output of a sampler run, before packaging
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerOutput {
    pub status: SamplerStatus,
    /// Free-parameter vector with the highest log-probability seen
    pub best_x: Vec<f64>,
    pub best_ln_prob: f64,
    pub estimate: Estimate,
    /// Ensemble steps or objective evaluations
    pub n_iterations: usize,
    pub acceptance_fraction: Option<f64>,
    /// Ensemble steps in which no walker moved
    pub rejected_steps: usize,
}

impl SamplerOutput {
    pub fn chain(&self) -> Option<&Chain> {
        match &self.estimate {
            Estimate::Chain(chain) => Some(chain),
            Estimate::Point { .. } => None,
        }
    }

    pub fn covariance(&self) -> Option<ArrayView2<'_, f64>> {
        match &self.estimate {
            Estimate::Chain(_) => None,
            Estimate::Point { covariance } => covariance.as_ref().map(|c| c.view()),
        }
    }
}

#[enum_dispatch]
pub trait FitAlgorithmTrait: Clone + Debug {
    /// Checks the settings against the problem dimension
    fn check(&self, ndim: usize) -> Result<(), ConfigError>;

    /// Explores `objective` within the bounds of `parameters`, starting from their initial guess
    fn run<O: Objective>(
        &self,
        objective: &O,
        parameters: &ResolvedParameters,
        stop: &StopSignal,
    ) -> Result<SamplerOutput, FitError>;
}

/// Sampler or optimizer used by a fit
#[enum_dispatch(FitAlgorithmTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum FitAlgorithm {
    Mcmc(McmcSampler),
    Cobyla(CobylaOptimizer),
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::Array;
    use rand::prelude::*;
    use rand_distr::StandardNormal;

    fn chain_from_fn(n_steps: usize, f: impl Fn(usize) -> f64) -> Chain {
        let positions = Array::from_shape_fn((n_steps, 4, 1), |(i, _, _)| f(i));
        Chain {
            positions,
            ln_prob: Array2::zeros((n_steps, 4)),
        }
    }

    #[test]
    fn stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_stopped());
        clone.stop();
        assert!(signal.is_stopped());
    }

    #[test]
    fn finite_samples_skip_rejected_positions() {
        let mut chain = chain_from_fn(3, |i| i as f64);
        chain.ln_prob[(1, 2)] = f64::NEG_INFINITY;
        let samples = chain.finite_samples(0, 3);
        assert_eq!(samples.dim(), (11, 1));
        assert_eq!(chain.finite_samples(1, 2).nrows(), 3);
    }

    #[test]
    fn stationary_chain_is_converged() {
        let mut rng = StdRng::seed_from_u64(0);
        let noise: Vec<f64> = (0..400).map(|_| rng.sample(StandardNormal)).collect();
        let positions = Array::from_shape_fn((100, 4, 1), |(i, j, _)| noise[4 * i + j]);
        let chain = Chain {
            positions,
            ln_prob: Array2::zeros((100, 4)),
        };
        assert!(chain.is_converged(0.5));
    }

    #[test]
    fn drifting_chain_is_not_converged() {
        let chain = chain_from_fn(100, |i| i as f64);
        assert!(!chain.is_converged(0.5));
    }
}

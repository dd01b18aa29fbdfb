use crate::error::{ConfigError, FailureReason, FitError};
use crate::params::ResolvedParameters;
use crate::sampler::bounds::within_bounds;
use crate::sampler::{
    Chain, Estimate, FitAlgorithmTrait, Objective, SamplerOutput, SamplerStatus, StopSignal,
};

use emcee::{EnsembleSampler, Guess, Prob};
use ndarray::{Array2, Array3};
use rand::prelude::*;
use rand_distr::StandardNormal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How walkers are placed before the first step
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WalkerInit {
    /// Gaussian ball around the starting guess, `scatter` is the standard deviation in units of
    /// the bound width
    Ball { scatter: f64 },
    /// Uniformly over the bounds
    Uniform,
}

impl Default for WalkerInit {
    fn default() -> Self {
        Self::Ball { scatter: 0.01 }
    }
}

/// Affine-invariant ensemble MCMC sampler
///
/// Wraps the [emcee] stretch-move sampler. The chain is produced in chunks of `check_interval`
/// steps: between chunks the [StopSignal] is checked and progress is logged. All the positions
/// of all the steps are kept, burn-in is removed by the
/// [ResultPackager](crate::ResultPackager).
///
/// The terminal status is [SamplerStatus::Converged] if the last two quarters of the chain agree
/// in mean within `convergence_tolerance` posterior standard deviations and
/// [SamplerStatus::MaxIterationsReached] otherwise.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Mcmc")]
pub struct McmcSampler {
    /// Number of walkers, `max(4 ndim, 16)` if not specified
    #[serde(default)]
    pub nwalkers: Option<usize>,
    /// Number of ensemble steps
    pub niterations: u32,
    pub check_interval: u32,
    pub convergence_tolerance: f64,
    #[serde(default)]
    pub init: WalkerInit,
    pub seed: u64,
}

impl McmcSampler {
    pub fn new(niterations: u32, seed: u64) -> Self {
        Self {
            nwalkers: None,
            niterations,
            check_interval: Self::default_check_interval(),
            convergence_tolerance: Self::default_convergence_tolerance(),
            init: WalkerInit::default(),
            seed,
        }
    }

    pub fn with_nwalkers(mut self, nwalkers: usize) -> Self {
        self.nwalkers = Some(nwalkers);
        self
    }

    pub fn with_init(mut self, init: WalkerInit) -> Self {
        self.init = init;
        self
    }

    pub fn with_check_interval(mut self, check_interval: u32) -> Self {
        self.check_interval = check_interval;
        self
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        2000
    }

    #[inline]
    pub fn default_check_interval() -> u32 {
        100
    }

    #[inline]
    pub fn default_convergence_tolerance() -> f64 {
        0.5
    }

    #[inline]
    pub fn default_seed() -> u64 {
        0
    }

    pub fn nwalkers_for(&self, ndim: usize) -> usize {
        self.nwalkers.unwrap_or_else(|| usize::max(4 * ndim, 16))
    }

    fn initial_positions<R: Rng>(
        &self,
        parameters: &ResolvedParameters,
        nwalkers: usize,
        rng: &mut R,
    ) -> Vec<Vec<f64>> {
        const MAX_RESAMPLING: usize = 100;

        let lower = parameters.lower();
        let upper = parameters.upper();
        let x0 = parameters.initial_guess();
        (0..nwalkers)
            .map(|_| match self.init {
                WalkerInit::Ball { scatter } => {
                    let mut x = x0.clone();
                    for _ in 0..MAX_RESAMPLING {
                        for (i, xi) in x.iter_mut().enumerate() {
                            let eps: f64 = rng.sample(StandardNormal);
                            *xi = x0[i] + scatter * (upper[i] - lower[i]) * eps;
                        }
                        if within_bounds(&x, &lower, &upper) {
                            return x;
                        }
                    }
                    x0.clone()
                }
                WalkerInit::Uniform => lower
                    .iter()
                    .zip(upper.iter())
                    .map(|(&a, &b)| rng.random_range(a..=b))
                    .collect(),
            })
            .collect()
    }
}

impl Default for McmcSampler {
    fn default() -> Self {
        Self::new(Self::default_niterations(), Self::default_seed())
    }
}

struct EmceeModel<'a, O> {
    objective: &'a O,
}

impl<O: Objective> Prob for EmceeModel<'_, O> {
    fn lnlike(&self, params: &Guess) -> f32 {
        let x: Vec<f64> = params.values.iter().map(|&v| v as f64).collect();
        let ln_prob = self.objective.ln_prob(&x);
        if ln_prob.is_nan() {
            f32::NEG_INFINITY
        } else {
            ln_prob as f32
        }
    }

    fn lnprior(&self, _params: &Guess) -> f32 {
        0.0
    }
}

impl FitAlgorithmTrait for McmcSampler {
    fn check(&self, ndim: usize) -> Result<(), ConfigError> {
        let nwalkers = self.nwalkers_for(ndim);
        if nwalkers % 2 != 0 || nwalkers < 2 * ndim {
            return Err(ConfigError::InvalidSampler(format!(
                "number of walkers must be even and at least {}, got {nwalkers}",
                2 * ndim
            )));
        }
        if self.niterations == 0 || self.check_interval == 0 {
            return Err(ConfigError::InvalidSampler(
                "niterations and check_interval must be positive".to_owned(),
            ));
        }
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance > 0.0) {
            return Err(ConfigError::InvalidSampler(
                "convergence_tolerance must be positive".to_owned(),
            ));
        }
        if let WalkerInit::Ball { scatter } = self.init {
            if !(scatter.is_finite() && scatter > 0.0) {
                return Err(ConfigError::InvalidSampler(
                    "walker scatter must be positive".to_owned(),
                ));
            }
        }
        Ok(())
    }

    fn run<O: Objective>(
        &self,
        objective: &O,
        parameters: &ResolvedParameters,
        stop: &StopSignal,
    ) -> Result<SamplerOutput, FitError> {
        let ndim = parameters.ndim();
        self.check(ndim)?;
        let nwalkers = self.nwalkers_for(ndim);
        let model = EmceeModel { objective };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut current: Vec<Guess> = self
            .initial_positions(parameters, nwalkers, &mut rng)
            .iter()
            .map(|x| Guess::new(&x.iter().map(|&v| v as f32).collect::<Vec<_>>()))
            .collect();
        let initial_ln_prob: Vec<f32> = current.iter().map(|guess| model.lnlike(guess)).collect();
        debug!(nwalkers, ndim, "walkers initialized");

        let mut positions: Vec<f64> = vec![];
        let mut ln_probs: Vec<f64> = vec![];
        let mut best: Option<(Vec<f32>, f32)> = current
            .iter()
            .zip(initial_ln_prob.iter())
            .filter(|(_, lp)| lp.is_finite())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(guess, &lp)| (guess.values.clone(), lp));
        let mut accepted = 0usize;
        let mut rejected_steps = 0usize;
        let mut n_steps = 0usize;
        let mut stopped = false;

        let niterations = self.niterations as usize;
        let check_interval = self.check_interval as usize;
        for chunk in 0.. {
            if n_steps >= niterations {
                break;
            }
            if stop.is_stopped() {
                stopped = true;
                break;
            }
            let chunk_steps = usize::min(check_interval, niterations - n_steps);

            let mut sampler = EnsembleSampler::new(nwalkers, ndim, &model)
                .map_err(|err| FitError::Failed(FailureReason::Backend(err.to_string())))?;
            let chunk_seed = self.seed.wrapping_add(chunk as u64);
            sampler.seed(&[chunk_seed as usize, (chunk_seed >> 32) as usize]);

            let mut previous = current.clone();
            sampler
                .sample(&current, chunk_steps, |step| {
                    let mut moved = 0usize;
                    for ((guess, &lp), prev) in step
                        .pos
                        .iter()
                        .zip(step.lnprob.iter())
                        .zip(previous.iter_mut())
                    {
                        if guess.values != prev.values {
                            moved += 1;
                        }
                        positions.extend(guess.values.iter().map(|&v| v as f64));
                        ln_probs.push(lp as f64);
                        if lp.is_finite() && best.as_ref().is_none_or(|(_, best_lp)| lp > *best_lp)
                        {
                            best = Some((guess.values.clone(), lp));
                        }
                        *prev = guess.clone();
                    }
                    if moved == 0 {
                        rejected_steps += 1;
                    }
                    accepted += moved;
                })
                .map_err(|err| FitError::Failed(FailureReason::Backend(err.to_string())))?;
            current = previous;
            n_steps += chunk_steps;
            debug!(
                chunk,
                n_steps,
                acceptance = accepted as f64 / (n_steps * nwalkers) as f64,
                "ensemble chunk done"
            );
        }

        if n_steps == 0 {
            return Err(FitError::Failed(FailureReason::EmptyChain));
        }
        let Some((best_values, _)) = best else {
            return Err(FitError::Failed(FailureReason::NonFiniteObjective));
        };
        if accepted == 0 {
            return Err(FitError::Failed(FailureReason::NoAcceptedProposals));
        }
        if rejected_steps > 0 {
            warn!(
                rejected_steps,
                n_steps, "no walker moved during some of the ensemble steps"
            );
        }

        let chain = Chain {
            positions: Array3::from_shape_vec((n_steps, nwalkers, ndim), positions)
                .map_err(|err| FitError::Failed(FailureReason::Backend(err.to_string())))?,
            ln_prob: Array2::from_shape_vec((n_steps, nwalkers), ln_probs)
                .map_err(|err| FitError::Failed(FailureReason::Backend(err.to_string())))?,
        };
        let status = if stopped {
            SamplerStatus::Stopped
        } else if chain.is_converged(self.convergence_tolerance) {
            SamplerStatus::Converged
        } else {
            SamplerStatus::MaxIterationsReached
        };
        let best_x: Vec<f64> = best_values.iter().map(|&v| v as f64).collect();
        let best_ln_prob = objective.ln_prob(&best_x);
        let acceptance_fraction = accepted as f64 / (n_steps * nwalkers) as f64;
        info!(
            ?status,
            n_steps, acceptance_fraction, best_ln_prob, "ensemble sampling finished"
        );

        Ok(SamplerOutput {
            status,
            best_x,
            best_ln_prob,
            estimate: Estimate::Chain(chain),
            n_iterations: n_steps,
            acceptance_fraction: Some(acceptance_fraction),
            rejected_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::params::{FitParameters, ParameterName, ParameterRequirements};

    use approx::assert_abs_diff_eq;

    struct Normal1D {
        mu: f64,
        sigma: f64,
    }

    impl Objective for Normal1D {
        fn ndim(&self) -> usize {
            1
        }

        fn ln_prob(&self, x: &[f64]) -> f64 {
            let z = (x[0] - self.mu) / self.sigma;
            -0.5 * z * z
        }
    }

    struct Nowhere;

    impl Objective for Nowhere {
        fn ndim(&self) -> usize {
            1
        }

        fn ln_prob(&self, _x: &[f64]) -> f64 {
            f64::NEG_INFINITY
        }
    }

    fn parameters(lower: f64, upper: f64) -> ResolvedParameters {
        FitParameters::new()
            .free(ParameterName::RotationVelocity, lower, upper)
            .resolve(&ParameterRequirements::new().require(ParameterName::RotationVelocity))
            .unwrap()
    }

    #[test]
    fn default_walkers() {
        let sampler = McmcSampler::default();
        assert_eq!(sampler.nwalkers_for(1), 16);
        assert_eq!(sampler.nwalkers_for(7), 28);
    }

    #[test]
    fn invalid_walkers() {
        let sampler = McmcSampler::default().with_nwalkers(7);
        assert!(matches!(
            sampler.check(2),
            Err(ConfigError::InvalidSampler(_))
        ));
        let sampler = McmcSampler::default().with_nwalkers(4);
        assert!(sampler.check(3).is_err());
    }

    #[test]
    fn samples_normal_distribution() {
        let objective = Normal1D {
            mu: 2.0,
            sigma: 0.5,
        };
        let sampler = McmcSampler::new(1000, 42).with_init(WalkerInit::Uniform);
        let output = sampler
            .run(&objective, &parameters(-5.0, 5.0), &StopSignal::new())
            .unwrap();
        let chain = output.chain().unwrap();
        assert_eq!(chain.n_steps(), 1000);
        assert_eq!(chain.n_walkers(), 16);
        let samples = chain.finite_samples(500, 1000);
        let mean = samples.mean().unwrap();
        let std = samples.std(1.0);
        assert_abs_diff_eq!(mean, 2.0, epsilon = 0.1);
        assert_abs_diff_eq!(std, 0.5, epsilon = 0.1);
        let acceptance = output.acceptance_fraction.unwrap();
        assert!(acceptance > 0.2 && acceptance < 0.95);
    }

    #[test]
    fn nowhere_finite_objective_fails() {
        let sampler = McmcSampler::new(50, 0);
        assert_eq!(
            sampler.run(&Nowhere, &parameters(0.0, 1.0), &StopSignal::new()),
            Err(FitError::Failed(FailureReason::NonFiniteObjective))
        );
    }

    #[test]
    fn stopped_before_start_has_empty_chain() {
        let objective = Normal1D {
            mu: 0.0,
            sigma: 1.0,
        };
        let stop = StopSignal::new();
        stop.stop();
        assert_eq!(
            McmcSampler::new(50, 0).run(&objective, &parameters(-1.0, 1.0), &stop),
            Err(FitError::Failed(FailureReason::EmptyChain))
        );
    }
}

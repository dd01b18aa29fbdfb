use crate::error::{ConfigError, FailureReason, FitError};
use crate::params::ResolvedParameters;
use crate::sampler::bounds::{from_unit_box, to_unit_box};
use crate::sampler::hessian::{covariance_from_hessian, ln_prob_hessian};
use crate::sampler::{
    Estimate, FitAlgorithmTrait, Objective, SamplerOutput, SamplerStatus, StopSignal,
};

use cobyla::{FailStatus, Func, RhoBeg, StopTols, minimize};
use ndarray::Array2;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use tracing::{debug, info, warn};

/// COBYLA (Constrained Optimization BY Linear Approximations) maximizer of the log-probability
///
/// COBYLA is a derivative-free local optimizer. Here it minimizes `-ln_prob` over the free
/// parameters rescaled to the unit box, so `rhobeg` is the initial step as a fraction of the
/// bound width. Rejected points (`ln_prob = -inf`) are replaced by a large finite penalty, which
/// keeps the linear models of the optimizer finite.
///
/// If `covariance` is set, the covariance of the free parameters is estimated at the optimum as
/// the inverse of the negative Hessian of the log-probability, computed by central differences
/// with steps `hessian_step` times the bound width. The covariance is dropped with a warning if
/// the Hessian is not negative-definite, e.g. when the optimum sits on a bound.
///
/// A [StopSignal] raised during the run makes every further evaluation return the penalty, so
/// the optimizer winds down around the best point seen so far and the run is reported as
/// [SamplerStatus::Stopped] without a covariance.
///
/// Being a local method, COBYLA crawls along narrow curved valleys of the log-probability, like
/// the one of the rotation-map inclination and rotation velocity. Use [McmcSampler](crate::McmcSampler)
/// when such parameters are free together.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Cobyla")]
pub struct CobylaOptimizer {
    pub niterations: u32,
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub covariance: bool,
    pub hessian_step: f64,
}

impl CobylaOptimizer {
    /// Create a new [CobylaOptimizer].
    ///
    /// # Arguments
    /// - `niterations`: maximum number of objective evaluations
    /// - `rhobeg`: initial step in units of the bound width
    /// - `ftol_rel`: relative tolerance on the objective value for convergence
    pub fn new(niterations: u32, rhobeg: f64, ftol_rel: f64) -> Self {
        Self {
            niterations,
            rhobeg,
            ftol_rel,
            covariance: Self::default_covariance(),
            hessian_step: Self::default_hessian_step(),
        }
    }

    pub fn with_covariance(mut self, covariance: bool) -> Self {
        self.covariance = covariance;
        self
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        2000
    }

    #[inline]
    pub fn default_rhobeg() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_ftol_rel() -> f64 {
        1e-8
    }

    #[inline]
    pub fn default_covariance() -> bool {
        true
    }

    #[inline]
    pub fn default_hessian_step() -> f64 {
        1e-4
    }

    /// Penalty standing for `-ln_prob = +inf`
    fn penalty() -> f64 {
        f64::MAX.sqrt()
    }
}

impl Default for CobylaOptimizer {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_rhobeg(),
            Self::default_ftol_rel(),
        )
    }
}

impl FitAlgorithmTrait for CobylaOptimizer {
    fn check(&self, _ndim: usize) -> Result<(), ConfigError> {
        if self.niterations == 0 {
            return Err(ConfigError::InvalidSampler(
                "niterations must be positive".to_owned(),
            ));
        }
        if !(self.rhobeg.is_finite() && self.rhobeg > 0.0) {
            return Err(ConfigError::InvalidSampler(
                "rhobeg must be positive and finite".to_owned(),
            ));
        }
        if !(self.ftol_rel.is_finite() && self.ftol_rel >= 0.0) {
            return Err(ConfigError::InvalidSampler(
                "ftol_rel must be non-negative and finite".to_owned(),
            ));
        }
        if !(self.hessian_step.is_finite() && self.hessian_step > 0.0) {
            return Err(ConfigError::InvalidSampler(
                "hessian_step must be positive and finite".to_owned(),
            ));
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
        let lower = parameters.lower();
        let upper = parameters.upper();
        let x0 = parameters.initial_guess();

        if stop.is_stopped() {
            let best_ln_prob = objective.ln_prob(&x0);
            if !best_ln_prob.is_finite() {
                return Err(FitError::Failed(FailureReason::NonFiniteObjective));
            }
            return Ok(SamplerOutput {
                status: SamplerStatus::Stopped,
                best_x: x0,
                best_ln_prob,
                estimate: Estimate::Point { covariance: None },
                n_iterations: 0,
                acceptance_fraction: None,
                rejected_steps: 0,
            });
        }

        let n_evaluations = Cell::new(0usize);
        let neg_ln_prob = |u: &[f64], _user_data: &mut ()| -> f64 {
            // COBYLA cannot be interrupted, after a stop every point is as bad as a rejected one
            if stop.is_stopped() {
                return Self::penalty();
            }
            n_evaluations.set(n_evaluations.get() + 1);
            let x = from_unit_box(u, &lower, &upper);
            let value = -objective.ln_prob(&x);
            if value.is_finite() {
                value.min(Self::penalty())
            } else {
                Self::penalty()
            }
        };

        let unit_bounds = vec![(0.0, 1.0); ndim];
        let constraints: Vec<&dyn Func<()>> = vec![];
        let stop_tol = StopTols {
            ftol_rel: self.ftol_rel,
            ..StopTols::default()
        };
        let u0 = to_unit_box(&x0, &lower, &upper);
        debug!(ndim, "starting cobyla");
        let result = minimize(
            neg_ln_prob,
            &u0,
            &unit_bounds,
            &constraints,
            (),
            self.niterations as usize,
            RhoBeg::All(self.rhobeg),
            Some(stop_tol),
        );

        let (status, u) = match result {
            Ok((cobyla::SuccessStatus::MaxEvalReached, u, _)) => {
                (SamplerStatus::MaxIterationsReached, u)
            }
            Ok((_, u, _)) => (SamplerStatus::Converged, u),
            // The trust region has shrunk to machine precision around the optimum
            Err((FailStatus::RoundoffLimited, u, _)) => {
                debug!("cobyla step is limited by roundoff");
                (SamplerStatus::Converged, u)
            }
            Err((FailStatus::ForcedStop, u, _)) => (SamplerStatus::Stopped, u),
            Err((status, _, _)) => {
                return Err(FitError::Failed(FailureReason::Backend(format!(
                    "cobyla failed with {status:?}"
                ))));
            }
        };
        let status = if stop.is_stopped() {
            SamplerStatus::Stopped
        } else {
            status
        };
        if u.iter().any(|x| !x.is_finite()) {
            return Err(FitError::Failed(FailureReason::NonFiniteObjective));
        }
        let best_x = from_unit_box(&u, &lower, &upper);
        let best_ln_prob = objective.ln_prob(&best_x);
        if !best_ln_prob.is_finite() {
            return Err(FitError::Failed(FailureReason::NonFiniteObjective));
        }

        let covariance = if self.covariance && status != SamplerStatus::Stopped {
            let steps: Vec<f64> = lower
                .iter()
                .zip(upper.iter())
                .map(|(&a, &b)| self.hessian_step * (b - a))
                .collect();
            let hessian = ln_prob_hessian(objective, &best_x, &steps);
            match covariance_from_hessian(hessian) {
                Some(covariance) => Some(Array2::from_shape_fn((ndim, ndim), |(i, j)| {
                    covariance[(i, j)]
                })),
                None => {
                    warn!("log-probability is not concave at the optimum, covariance is dropped");
                    None
                }
            }
        } else {
            None
        };

        let n_iterations = n_evaluations.get();
        info!(?status, n_iterations, best_ln_prob, "cobyla finished");
        Ok(SamplerOutput {
            status,
            best_x,
            best_ln_prob,
            estimate: Estimate::Point { covariance },
            n_iterations,
            acceptance_fraction: None,
            rejected_steps: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::params::{FitParameters, ParameterName, ParameterRequirements};

    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Paraboloid;

    impl Objective for Paraboloid {
        fn ndim(&self) -> usize {
            2
        }

        fn ln_prob(&self, x: &[f64]) -> f64 {
            let a = (x[0] - 1.0) / 0.2;
            let b = (x[1] + 3.0) / 2.0;
            -0.5 * (a * a + b * b)
        }
    }

    fn parameters() -> ResolvedParameters {
        FitParameters::new()
            .free(ParameterName::CenterX, -5.0, 5.0)
            .free(ParameterName::CenterY, -10.0, 10.0)
            .resolve(
                &ParameterRequirements::new()
                    .require(ParameterName::CenterX)
                    .require(ParameterName::CenterY),
            )
            .unwrap()
    }

    #[test]
    fn finds_maximum_and_covariance() {
        let output = CobylaOptimizer::default()
            .run(&Paraboloid, &parameters(), &StopSignal::new())
            .unwrap();
        assert_ne!(output.status, SamplerStatus::Stopped);
        assert_abs_diff_eq!(output.best_x[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(output.best_x[1], -3.0, epsilon = 1e-2);
        let covariance = output.covariance().unwrap();
        assert_abs_diff_eq!(covariance[(0, 0)], 0.04, epsilon = 1e-3);
        assert_abs_diff_eq!(covariance[(1, 1)], 4.0, epsilon = 1e-2);
        assert_abs_diff_eq!(covariance[(0, 1)], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn optimum_on_bound_drops_covariance() {
        struct Slope;
        impl Objective for Slope {
            fn ndim(&self) -> usize {
                2
            }
            fn ln_prob(&self, x: &[f64]) -> f64 {
                if x[0] > 5.0 || x[1].abs() > 10.0 {
                    return f64::NEG_INFINITY;
                }
                x[0] - x[1] * x[1]
            }
        }
        let output = CobylaOptimizer::default()
            .run(&Slope, &parameters(), &StopSignal::new())
            .unwrap();
        assert_abs_diff_eq!(output.best_x[0], 5.0, epsilon = 1e-3);
        assert!(output.covariance().is_none());
    }

    #[test]
    fn stopped_returns_initial_guess() {
        let stop = StopSignal::new();
        stop.stop();
        let output = CobylaOptimizer::default()
            .run(&Paraboloid, &parameters(), &stop)
            .unwrap();
        assert_eq!(output.status, SamplerStatus::Stopped);
        assert_eq!(output.best_x, vec![0.0, 0.0]);
    }

    #[test]
    fn roundoff_limited_run_is_converged() {
        // The optimum value is zero, so the relative tolerance never triggers and the trust
        // region shrinks until roundoff ends the run
        let output = CobylaOptimizer::default()
            .run(&Paraboloid, &parameters(), &StopSignal::new())
            .unwrap();
        assert_eq!(output.status, SamplerStatus::Converged);
        assert_abs_diff_eq!(output.best_x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(output.best_x[1], -3.0, epsilon = 1e-3);
    }

    #[test]
    fn stop_during_run_keeps_best_point() {
        struct StoppingParaboloid {
            stop: StopSignal,
            calls: AtomicUsize,
        }
        impl Objective for StoppingParaboloid {
            fn ndim(&self) -> usize {
                2
            }
            fn ln_prob(&self, x: &[f64]) -> f64 {
                if self.calls.fetch_add(1, Ordering::Relaxed) + 1 == 20 {
                    self.stop.stop();
                }
                Paraboloid.ln_prob(x)
            }
        }

        let stop = StopSignal::new();
        let objective = StoppingParaboloid {
            stop: stop.clone(),
            calls: AtomicUsize::new(0),
        };
        let output = CobylaOptimizer::default()
            .run(&objective, &parameters(), &stop)
            .unwrap();
        assert_eq!(output.status, SamplerStatus::Stopped);
        assert_eq!(output.n_iterations, 20);
        // The evaluation of the returned point is the only call after the stop
        assert_eq!(objective.calls.load(Ordering::Relaxed), 21);
        assert!(output.best_ln_prob > Paraboloid.ln_prob(&[0.0, 0.0]));
        assert!(output.covariance().is_none());
    }

    #[test]
    fn rejected_everywhere_fails() {
        struct Nowhere;
        impl Objective for Nowhere {
            fn ndim(&self) -> usize {
                2
            }
            fn ln_prob(&self, _x: &[f64]) -> f64 {
                f64::NEG_INFINITY
            }
        }
        assert!(matches!(
            CobylaOptimizer::default().run(&Nowhere, &parameters(), &StopSignal::new()),
            Err(FitError::Failed(_))
        ));
    }
}

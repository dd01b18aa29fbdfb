use crate::error::{ConfigError, FailureReason, FitError};
use crate::params::{ParameterName, ResolvedParameters};
use crate::sampler::{Estimate, SamplerOutput, SamplerStatus};

use conv::prelude::*;
use itertools::Itertools;
use ndarray::{ArrayView1, Axis};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credible interval of a parameter
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CredibleInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Central value of a free parameter with its credible interval, if one could be estimated
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParameterEstimate {
    pub value: f64,
    pub interval: Option<CredibleInterval>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitDiagnostics {
    pub status: SamplerStatus,
    /// Log-posterior at the best free-parameter vector seen
    pub best_ln_prob: f64,
    /// Fraction of accepted ensemble proposals, `None` for optimizers
    pub acceptance_fraction: Option<f64>,
    /// Ensemble steps or objective evaluations
    pub n_iterations: usize,
    /// Samples summarised by the estimates, one for a point estimate
    pub n_samples: usize,
    /// Ensemble steps in which no walker moved
    pub rejected_steps: usize,
}

/// Outcome of a fit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitResult {
    pub parameters: BTreeMap<ParameterName, ParameterEstimate>,
    /// Fixed parameters, including defaults of unset optional parameters
    pub fixed: BTreeMap<ParameterName, f64>,
    pub diagnostics: FitDiagnostics,
}

impl FitResult {
    /// Central value of a free or fixed parameter
    pub fn value(&self, name: ParameterName) -> Option<f64> {
        self.parameters
            .get(&name)
            .map(|estimate| estimate.value)
            .or_else(|| self.fixed.get(&name).copied())
    }

    pub fn interval(&self, name: ParameterName) -> Option<CredibleInterval> {
        self.parameters.get(&name).and_then(|estimate| estimate.interval)
    }
}

/// Linear interpolation between order statistics of sorted `x`, `q` is within [0, 100]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let position = q / 100.0 * (n - 1) as f64;
    let i = position.floor();
    let frac = position - i;
    let i = i.approx_as::<usize>().unwrap_or(0).min(n - 1);
    if i + 1 >= n {
        return sorted[n - 1];
    }
    sorted[i] + frac * (sorted[i + 1] - sorted[i])
}

/// Summarises sampler outputs into [FitResult]
///
/// A chain is summarised by the median and the `lower_percentile`, `upper_percentile`
/// percentiles of every parameter over the steps kept after dropping the first
/// `burn_in_fraction` of them. Samples with non-finite log-probability are ignored. A point
/// estimate is reported as the optimum with `±1σ` intervals from the covariance, or without
/// intervals if there is no covariance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultPackager {
    pub burn_in_fraction: f64,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
}

impl ResultPackager {
    pub fn new(burn_in_fraction: f64, lower_percentile: f64, upper_percentile: f64) -> Self {
        Self {
            burn_in_fraction,
            lower_percentile,
            upper_percentile,
        }
    }

    #[inline]
    pub fn default_burn_in_fraction() -> f64 {
        0.5
    }

    #[inline]
    pub fn default_lower_percentile() -> f64 {
        16.0
    }

    #[inline]
    pub fn default_upper_percentile() -> f64 {
        84.0
    }

    pub(crate) fn check(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.burn_in_fraction) {
            return Err(ConfigError::InvalidSetting {
                name: "burn_in_fraction",
                reason: "must be within [0, 1)",
            });
        }
        if !(0.0 <= self.lower_percentile
            && self.lower_percentile < self.upper_percentile
            && self.upper_percentile <= 100.0)
        {
            return Err(ConfigError::InvalidSetting {
                name: "percentiles",
                reason: "0 <= lower < upper <= 100 is required",
            });
        }
        Ok(())
    }

    pub fn package(
        &self,
        output: &SamplerOutput,
        parameters: &ResolvedParameters,
    ) -> Result<FitResult, FitError> {
        self.check()?;
        let (estimates, n_samples) = match &output.estimate {
            Estimate::Chain(chain) => {
                let n_steps = chain.n_steps();
                let burn_in = (self.burn_in_fraction * n_steps as f64)
                    .approx_as::<usize>()
                    .unwrap_or(0)
                    .min(n_steps);
                let samples = chain.finite_samples(burn_in, n_steps);
                if samples.nrows() == 0 {
                    return Err(FitError::Failed(FailureReason::EmptyChain));
                }
                let estimates = samples
                    .axis_iter(Axis(1))
                    .map(|column| self.summarise(column))
                    .collect_vec();
                (estimates, samples.nrows())
            }
            Estimate::Point { covariance } => {
                let estimates = output
                    .best_x
                    .iter()
                    .enumerate()
                    .map(|(i, &value)| ParameterEstimate {
                        value,
                        interval: covariance.as_ref().map(|covariance| {
                            let std = covariance[(i, i)].sqrt();
                            CredibleInterval {
                                lower: value - std,
                                upper: value + std,
                            }
                        }),
                    })
                    .collect_vec();
                (estimates, 1)
            }
        };

        Ok(FitResult {
            parameters: parameters
                .names()
                .iter()
                .copied()
                .zip(estimates)
                .collect(),
            fixed: parameters.fixed().clone(),
            diagnostics: FitDiagnostics {
                status: output.status,
                best_ln_prob: output.best_ln_prob,
                acceptance_fraction: output.acceptance_fraction,
                n_iterations: output.n_iterations,
                n_samples,
                rejected_steps: output.rejected_steps,
            },
        })
    }

    fn summarise(&self, samples: ArrayView1<f64>) -> ParameterEstimate {
        let sorted = samples.iter().copied().sorted_by(f64::total_cmp).collect_vec();
        ParameterEstimate {
            value: percentile(&sorted, 50.0),
            interval: Some(CredibleInterval {
                lower: percentile(&sorted, self.lower_percentile),
                upper: percentile(&sorted, self.upper_percentile),
            }),
        }
    }
}

impl Default for ResultPackager {
    fn default() -> Self {
        Self::new(
            Self::default_burn_in_fraction(),
            Self::default_lower_percentile(),
            Self::default_upper_percentile(),
        )
    }
}

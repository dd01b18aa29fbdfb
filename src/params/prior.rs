use enum_dispatch::enum_dispatch;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[enum_dispatch]
pub trait PriorTrait: Clone + Debug {
    /// Natural logarithm of the prior density at `x`
    ///
    /// `x` is already known to lie within the hard bounds `[lower, upper]` of the parameter, the
    /// density is truncated to them.
    fn ln_prior(&self, x: f64, lower: f64, upper: f64) -> f64;

    /// Checks that the prior is usable together with the given bounds
    fn check(&self, lower: f64, upper: f64) -> Result<(), &'static str>;
}

/// Prior of a single free parameter, always truncated to the parameter bounds
#[enum_dispatch(PriorTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum Prior {
    Uniform(UniformPrior),
    Normal(NormalPrior),
    LogUniform(LogUniformPrior),
}

impl Prior {
    pub fn uniform() -> Self {
        UniformPrior {}.into()
    }

    pub fn normal(mu: f64, std: f64) -> Self {
        NormalPrior { mu, std }.into()
    }

    pub fn log_uniform() -> Self {
        LogUniformPrior {}.into()
    }
}

impl Default for Prior {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Flat density over the bounds
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct UniformPrior {}

impl PriorTrait for UniformPrior {
    fn ln_prior(&self, _x: f64, lower: f64, upper: f64) -> f64 {
        -f64::ln(upper - lower)
    }

    fn check(&self, _lower: f64, _upper: f64) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Gaussian density, for parameters constrained by an earlier fit
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NormalPrior {
    pub mu: f64,
    pub std: f64,
}

impl PriorTrait for NormalPrior {
    fn ln_prior(&self, x: f64, _lower: f64, _upper: f64) -> f64 {
        let z = (x - self.mu) / self.std;
        -0.5 * z * z - f64::ln(self.std) - 0.5 * f64::ln(std::f64::consts::TAU)
    }

    fn check(&self, _lower: f64, _upper: f64) -> Result<(), &'static str> {
        if !self.mu.is_finite() {
            return Err("mu must be finite");
        }
        if !(self.std.is_finite() && self.std > 0.0) {
            return Err("std must be positive and finite");
        }
        Ok(())
    }
}

/// Density uniform in the logarithm of the parameter, requires positive bounds
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LogUniformPrior {}

impl PriorTrait for LogUniformPrior {
    fn ln_prior(&self, x: f64, lower: f64, upper: f64) -> f64 {
        -f64::ln(x) - f64::ln(f64::ln(upper) - f64::ln(lower))
    }

    fn check(&self, lower: f64, _upper: f64) -> Result<(), &'static str> {
        if lower <= 0.0 {
            return Err("log-uniform prior requires a positive lower bound");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_integrates_to_unity() {
        let prior = Prior::uniform();
        let (lower, upper) = (2.0, 6.0);
        assert_relative_eq!(prior.ln_prior(3.0, lower, upper).exp() * (upper - lower), 1.0);
    }

    #[test]
    fn normal_peaks_at_mu() {
        let prior = Prior::normal(1.0, 0.5);
        let at_mu = prior.ln_prior(1.0, -10.0, 10.0);
        assert!(at_mu > prior.ln_prior(1.2, -10.0, 10.0));
        assert!(at_mu > prior.ln_prior(0.8, -10.0, 10.0));
        assert_relative_eq!(
            prior.ln_prior(1.5, -10.0, 10.0) - at_mu,
            -0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn log_uniform_rejects_non_positive_lower_bound() {
        assert!(Prior::log_uniform().check(0.0, 1.0).is_err());
        assert!(Prior::log_uniform().check(0.1, 1.0).is_ok());
    }

    #[test]
    fn log_uniform_density_decreases() {
        let prior = Prior::log_uniform();
        assert!(prior.ln_prior(1.0, 0.5, 5.0) > prior.ln_prior(4.0, 0.5, 5.0));
    }

    #[test]
    fn normal_rejects_bad_std() {
        assert!(Prior::normal(0.0, 0.0).check(-1.0, 1.0).is_err());
        assert!(Prior::normal(0.0, f64::NAN).check(-1.0, 1.0).is_err());
    }

    #[test]
    fn serde_roundtrip_keeps_variant() {
        let prior = Prior::normal(3.0, 0.1);
        let json = serde_json::to_string(&prior).unwrap();
        let restored: Prior = serde_json::from_str(&json).unwrap();
        assert_eq!(prior, restored);
    }
}

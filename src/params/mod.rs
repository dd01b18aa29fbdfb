//! Fixed-or-free parameter configuration shared by both fit modes.
//!
//! A fit is configured with a [FitParameters] mapping. Every entry is either a fixed value or a
//! free parameter searched within hard bounds. The mapping is checked against the active model's
//! [ParameterRequirements] by [FitParameters::resolve] before any sampling starts, producing
//! [ResolvedParameters]: the ordered list of free parameters seen by the sampler plus the fixed
//! values.

pub mod prior;
pub use prior::{Prior, PriorTrait};

use crate::error::ConfigError;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a model parameter
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ParameterName {
    /// Disk inclination, radians, within (0, π)
    Inclination,
    /// Position angle of the red-shifted major axis, radians
    PositionAngle,
    /// Systemic velocity
    SystemicVelocity,
    /// Stellar mass in solar masses, Keplerian rotation law
    StellarMass,
    /// Rotation velocity at the reference radius, power-law rotation law
    ReferenceVelocity,
    /// Reference radius of the power-law rotation law and of the flared surface
    ReferenceRadius,
    /// Power-law index of the rotation law
    RotationIndex,
    /// Height-to-radius ratio of the emitting surface at the reference radius
    AspectRatio,
    /// Power-law index of the aspect ratio
    FlaringIndex,
    /// Sky-plane offset of the disk centre along x
    CenterX,
    /// Sky-plane offset of the disk centre along y
    CenterY,
    /// Rotation velocity of a single annulus
    RotationVelocity,
}

impl ParameterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inclination => "inclination",
            Self::PositionAngle => "position_angle",
            Self::SystemicVelocity => "systemic_velocity",
            Self::StellarMass => "stellar_mass",
            Self::ReferenceVelocity => "reference_velocity",
            Self::ReferenceRadius => "reference_radius",
            Self::RotationIndex => "rotation_index",
            Self::AspectRatio => "aspect_ratio",
            Self::FlaringIndex => "flaring_index",
            Self::CenterX => "center_x",
            Self::CenterY => "center_y",
            Self::RotationVelocity => "rotation_velocity",
        }
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds, starting guess and prior of a free parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FreeParameter {
    pub lower: f64,
    pub upper: f64,
    /// Starting guess, the middle of the bounds is used if not specified
    #[serde(default)]
    pub init: Option<f64>,
    #[serde(default)]
    pub prior: Prior,
}

impl FreeParameter {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            init: None,
            prior: Prior::default(),
        }
    }

    pub fn with_init(mut self, init: f64) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = prior;
        self
    }

    pub fn initial_guess(&self) -> f64 {
        self.init.unwrap_or(0.5 * (self.lower + self.upper))
    }

    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }

    fn check(&self, name: ParameterName) -> Result<(), ConfigError> {
        if !(self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper) {
            return Err(ConfigError::InvalidBounds {
                name,
                lower: self.lower,
                upper: self.upper,
            });
        }
        if let Some(init) = self.init {
            if !init.is_finite() {
                return Err(ConfigError::NonFiniteValue { name, value: init });
            }
            if !self.contains(init) {
                return Err(ConfigError::InitOutOfBounds { name, init });
            }
        }
        self.prior
            .check(self.lower, self.upper)
            .map_err(|reason| ConfigError::InvalidPrior { name, reason })
    }
}

/// A parameter is either held at a fixed value or searched within bounds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Fixed(f64),
    Free(FreeParameter),
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Self::Fixed(value)
    }
}

impl From<FreeParameter> for Parameter {
    fn from(free: FreeParameter) -> Self {
        Self::Free(free)
    }
}

/// Parameters a model needs, with defaults for the optional ones
#[derive(Clone, Debug, Default)]
pub struct ParameterRequirements {
    required: Vec<ParameterName>,
    optional: Vec<(ParameterName, f64)>,
    fixed_only: Vec<ParameterName>,
}

impl ParameterRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, name: ParameterName) -> Self {
        if !self.required.contains(&name) {
            self.optional.retain(|(n, _)| *n != name);
            self.required.push(name);
        }
        self
    }

    /// Optional parameter that takes `default` as a fixed value when it is not configured
    pub fn optional(mut self, name: ParameterName, default: f64) -> Self {
        if !self.required.contains(&name) && !self.optional.iter().any(|(n, _)| *n == name) {
            self.optional.push((name, default));
        }
        self
    }

    /// Parameter that may be configured but never searched
    pub fn fixed_only(mut self, name: ParameterName) -> Self {
        if !self.fixed_only.contains(&name) {
            self.fixed_only.push(name);
        }
        self
    }

    fn accepts(&self, name: ParameterName) -> bool {
        self.required.contains(&name) || self.optional.iter().any(|(n, _)| *n == name)
    }
}

/// Named mapping of model parameters to their fixed value or search range
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FitParameters(BTreeMap<ParameterName, Parameter>);

impl FitParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixed(mut self, name: ParameterName, value: f64) -> Self {
        self.0.insert(name, Parameter::Fixed(value));
        self
    }

    pub fn free(mut self, name: ParameterName, lower: f64, upper: f64) -> Self {
        self.0
            .insert(name, Parameter::Free(FreeParameter::new(lower, upper)));
        self
    }

    pub fn with(mut self, name: ParameterName, parameter: impl Into<Parameter>) -> Self {
        self.0.insert(name, parameter.into());
        self
    }

    pub fn insert(&mut self, name: ParameterName, parameter: impl Into<Parameter>) {
        self.0.insert(name, parameter.into());
    }

    pub fn get(&self, name: ParameterName) -> Option<&Parameter> {
        self.0.get(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterName, &Parameter)> {
        self.0.iter()
    }

    /// Validates the mapping against the model requirements
    pub fn resolve(
        &self,
        requirements: &ParameterRequirements,
    ) -> Result<ResolvedParameters, ConfigError> {
        if let Some(&name) = self.0.keys().find(|&&name| !requirements.accepts(name)) {
            return Err(ConfigError::UnusedParameter(name));
        }
        if let Some(&name) = requirements
            .required
            .iter()
            .find(|name| !self.0.contains_key(*name))
        {
            return Err(ConfigError::MissingParameter(name));
        }

        let mut names = vec![];
        let mut free = vec![];
        let mut fixed = BTreeMap::new();
        for (&name, parameter) in self.0.iter() {
            match parameter {
                Parameter::Fixed(value) => {
                    if !value.is_finite() {
                        return Err(ConfigError::NonFiniteValue {
                            name,
                            value: *value,
                        });
                    }
                    fixed.insert(name, *value);
                }
                Parameter::Free(free_parameter) => {
                    if requirements.fixed_only.contains(&name) {
                        return Err(ConfigError::MustBeFixed(name));
                    }
                    free_parameter.check(name)?;
                    names.push(name);
                    free.push(free_parameter.clone());
                }
            }
        }
        for &(name, default) in requirements.optional.iter() {
            if !self.0.contains_key(&name) {
                fixed.insert(name, default);
            }
        }
        if free.is_empty() {
            return Err(ConfigError::NothingToFit);
        }

        Ok(ResolvedParameters { names, free, fixed })
    }
}

impl FromIterator<(ParameterName, Parameter)> for FitParameters {
    fn from_iter<I: IntoIterator<Item = (ParameterName, Parameter)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Validated parameters: ordered free parameters and fixed values
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedParameters {
    names: Vec<ParameterName>,
    free: Vec<FreeParameter>,
    fixed: BTreeMap<ParameterName, f64>,
}

impl ResolvedParameters {
    /// Names of the free parameters, in the order of the sampled vector
    pub fn names(&self) -> &[ParameterName] {
        &self.names
    }

    pub fn ndim(&self) -> usize {
        self.free.len()
    }

    pub fn free(&self) -> &[FreeParameter] {
        &self.free
    }

    pub fn fixed(&self) -> &BTreeMap<ParameterName, f64> {
        &self.fixed
    }

    pub fn lower(&self) -> Vec<f64> {
        self.free.iter().map(|p| p.lower).collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.free.iter().map(|p| p.upper).collect()
    }

    pub fn initial_guess(&self) -> Vec<f64> {
        self.free.iter().map(FreeParameter::initial_guess).collect()
    }

    /// Replaces starting guesses that were not configured explicitly
    pub fn with_default_init(mut self, name: ParameterName, init: f64) -> Self {
        if let Some(i) = self.names.iter().position(|&n| n == name) {
            let free_parameter = &mut self.free[i];
            if free_parameter.init.is_none() && init.is_finite() {
                free_parameter.init = Some(init.clamp(free_parameter.lower, free_parameter.upper));
            }
        }
        self
    }

    /// Natural logarithm of the joint prior, -inf outside the bounds
    pub fn ln_prior(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.free.len());
        let mut ln_prior = 0.0;
        for (&value, free_parameter) in x.iter().zip(self.free.iter()) {
            if !free_parameter.contains(value) {
                return f64::NEG_INFINITY;
            }
            ln_prior += free_parameter.prior.ln_prior(value, free_parameter.lower, free_parameter.upper);
        }
        ln_prior
    }

    /// Full parameter assignment for a free-parameter vector
    pub fn assign(&self, x: &[f64]) -> ParameterValues {
        debug_assert_eq!(x.len(), self.free.len());
        let mut values = self.fixed.clone();
        values.extend(self.names.iter().copied().zip(x.iter().copied()));
        ParameterValues(values)
    }
}

/// Complete assignment of parameter values
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterValues(BTreeMap<ParameterName, f64>);

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: ParameterName, value: f64) -> Self {
        self.0.insert(name, value);
        self
    }

    pub fn get(&self, name: ParameterName) -> Option<f64> {
        self.0.get(&name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterName, &f64)> {
        self.0.iter()
    }
}

impl FromIterator<(ParameterName, f64)> for ParameterValues {
    fn from_iter<I: IntoIterator<Item = (ParameterName, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ParameterName::*;

    fn requirements() -> ParameterRequirements {
        ParameterRequirements::new()
            .require(Inclination)
            .require(SystemicVelocity)
            .optional(CenterX, 0.0)
    }

    #[test]
    fn missing_required_parameter() {
        let params = FitParameters::new().free(Inclination, 0.1, 1.0);
        assert_eq!(
            params.resolve(&requirements()),
            Err(ConfigError::MissingParameter(SystemicVelocity))
        );
    }

    #[test]
    fn inverted_bounds() {
        let params = FitParameters::new()
            .free(Inclination, 1.0, 0.1)
            .fixed(SystemicVelocity, 5.0);
        assert!(matches!(
            params.resolve(&requirements()),
            Err(ConfigError::InvalidBounds {
                name: Inclination,
                ..
            })
        ));
    }

    #[test]
    fn equal_bounds_are_invalid() {
        let params = FitParameters::new()
            .free(Inclination, 0.5, 0.5)
            .fixed(SystemicVelocity, 5.0);
        assert!(matches!(
            params.resolve(&requirements()),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn unused_parameter() {
        let params = FitParameters::new()
            .free(Inclination, 0.1, 1.0)
            .fixed(SystemicVelocity, 5.0)
            .fixed(FlaringIndex, 0.25);
        assert_eq!(
            params.resolve(&requirements()),
            Err(ConfigError::UnusedParameter(FlaringIndex))
        );
    }

    #[test]
    fn init_outside_bounds() {
        let params = FitParameters::new()
            .with(Inclination, FreeParameter::new(0.1, 1.0).with_init(2.0))
            .fixed(SystemicVelocity, 5.0);
        assert!(matches!(
            params.resolve(&requirements()),
            Err(ConfigError::InitOutOfBounds { .. })
        ));
    }

    #[test]
    fn fixed_only_parameter() {
        let reqs = requirements().fixed_only(SystemicVelocity);
        let params = FitParameters::new()
            .free(Inclination, 0.1, 1.0)
            .free(SystemicVelocity, 4.0, 6.0);
        assert_eq!(
            params.resolve(&reqs),
            Err(ConfigError::MustBeFixed(SystemicVelocity))
        );
    }

    #[test]
    fn nothing_to_fit() {
        let params = FitParameters::new()
            .fixed(Inclination, 0.5)
            .fixed(SystemicVelocity, 5.0);
        assert_eq!(
            params.resolve(&requirements()),
            Err(ConfigError::NothingToFit)
        );
    }

    #[test]
    fn resolved_assignment_merges_fixed_free_and_defaults() {
        let params = FitParameters::new()
            .free(Inclination, 0.1, 1.0)
            .fixed(SystemicVelocity, 5.0);
        let resolved = params.resolve(&requirements()).unwrap();
        assert_eq!(resolved.names(), &[Inclination]);
        assert_eq!(resolved.initial_guess(), vec![0.55]);

        let values = resolved.assign(&[0.3]);
        assert_eq!(values.get(Inclination), Some(0.3));
        assert_eq!(values.get(SystemicVelocity), Some(5.0));
        assert_eq!(values.get(CenterX), Some(0.0));
        assert_eq!(values.get(CenterY), None);
    }

    #[test]
    fn ln_prior_rejects_out_of_bounds() {
        let params = FitParameters::new()
            .free(Inclination, 0.1, 1.0)
            .fixed(SystemicVelocity, 5.0);
        let resolved = params.resolve(&requirements()).unwrap();
        assert!(resolved.ln_prior(&[0.5]).is_finite());
        assert_eq!(resolved.ln_prior(&[1.5]), f64::NEG_INFINITY);
        assert_eq!(resolved.ln_prior(&[f64::NAN]), f64::NEG_INFINITY);
    }

    #[test]
    fn from_json() {
        let json = r#"{
            "inclination": {"free": {"lower": 0.1, "upper": 1.0, "init": 0.5}},
            "systemic_velocity": {"fixed": 5.0}
        }"#;
        let params: FitParameters = serde_json::from_str(json).unwrap();
        let resolved = params.resolve(&requirements()).unwrap();
        assert_eq!(resolved.initial_guess(), vec![0.5]);
        assert_eq!(resolved.free()[0].prior, Prior::uniform());
    }
}

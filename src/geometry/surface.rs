use crate::error::ConfigError;
use crate::geometry::GeometryError;
use crate::params::{ParameterName, ParameterRequirements, ParameterValues};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shape of the emitting surface used by the rotation-map model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// Emission from the midplane
    #[default]
    Flat,
    /// Emission from the flared surface h(r) = r h_ref (r / r_ref)^ψ
    Flared,
}

impl SurfaceKind {
    pub fn requirements(&self, requirements: ParameterRequirements) -> ParameterRequirements {
        match self {
            Self::Flat => requirements,
            Self::Flared => requirements
                .require(ParameterName::AspectRatio)
                .require(ParameterName::FlaringIndex)
                .require(ParameterName::ReferenceRadius),
        }
    }
}

/// Flared emitting surface, its height is `r h_ref (r / r_ref)^ψ`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlaredSurface {
    aspect_ratio: f64,
    flaring_index: f64,
    reference_radius: f64,
}

impl FlaredSurface {
    pub fn new(
        aspect_ratio: f64,
        flaring_index: f64,
        reference_radius: f64,
    ) -> Result<Self, GeometryError> {
        for (name, value) in [
            (ParameterName::AspectRatio, aspect_ratio),
            (ParameterName::FlaringIndex, flaring_index),
            (ParameterName::ReferenceRadius, reference_radius),
        ] {
            if !value.is_finite() {
                return Err(GeometryError::NonFinite { name, value });
            }
        }
        if aspect_ratio < 0.0 {
            return Err(GeometryError::Negative {
                name: ParameterName::AspectRatio,
                value: aspect_ratio,
            });
        }
        if reference_radius <= 0.0 {
            return Err(GeometryError::NonPositive {
                name: ParameterName::ReferenceRadius,
                value: reference_radius,
            });
        }
        Ok(Self {
            aspect_ratio,
            flaring_index,
            reference_radius,
        })
    }

    pub(super) fn from_values(values: &ParameterValues) -> Result<Self, GeometryError> {
        let get = |name| values.get(name).ok_or(GeometryError::Missing(name));
        Self::new(
            get(ParameterName::AspectRatio)?,
            get(ParameterName::FlaringIndex)?,
            get(ParameterName::ReferenceRadius)?,
        )
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn flaring_index(&self) -> f64 {
        self.flaring_index
    }

    pub fn reference_radius(&self) -> f64 {
        self.reference_radius
    }

    #[inline]
    pub fn height(&self, r: f64) -> f64 {
        if self.aspect_ratio == 0.0 {
            return 0.0;
        }
        r * self.aspect_ratio * (r / self.reference_radius).powf(self.flaring_index)
    }
}

/// Settings of the fixed-point iteration that inverts the flared-surface projection
///
/// Starting from the flat-disk solution, the radius is updated as
/// `r = hypot(x_maj, (y_min + h(r) sin i) / cos i)` until two successive radii differ by less
/// than `tolerance` relative to the radius. Not converging within `max_iterations` is reported
/// as [NoSolution::NotConverged](crate::geometry::NoSolution::NotConverged).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurfaceSolver {
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl SurfaceSolver {
    pub fn new(tolerance: f64, max_iterations: u32) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    #[inline]
    pub fn default_tolerance() -> f64 {
        1e-10
    }

    #[inline]
    pub fn default_max_iterations() -> u32 {
        100
    }

    pub(crate) fn check(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::InvalidSetting {
                name: "tolerance",
                reason: "must be positive and finite",
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max_iterations",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for SurfaceSolver {
    fn default() -> Self {
        Self::new(Self::default_tolerance(), Self::default_max_iterations())
    }
}

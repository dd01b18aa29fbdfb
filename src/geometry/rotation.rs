use crate::geometry::GeometryError;
use crate::params::{ParameterName, ParameterRequirements, ParameterValues};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Heliocentric gravitational constant, m^3 s^-2
pub const GM_SUN: f64 = 1.327_124_400_18e20;

/// Astronomical unit, m
pub const AU: f64 = 1.495_978_707e11;

/// Keplerian circular velocity in m/s at midplane radius `r` (au) around `stellar_mass` (solar
/// masses)
pub fn keplerian_velocity(stellar_mass: f64, r: f64) -> f64 {
    f64::sqrt(GM_SUN * stellar_mass / (r * AU))
}

/// Rotation law used by the rotation-map model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RotationLaw {
    /// v = sqrt(G M r^2 / (r^2 + z^2)^(3/2)), radii in au, velocities in m/s
    #[default]
    Keplerian,
    /// v = v_ref (r / r_ref)^q, unit-agnostic, q defaults to -1/2
    PowerLaw,
}

impl RotationLaw {
    pub fn requirements(&self, requirements: ParameterRequirements) -> ParameterRequirements {
        match self {
            Self::Keplerian => requirements.require(ParameterName::StellarMass),
            Self::PowerLaw => requirements
                .require(ParameterName::ReferenceVelocity)
                .require(ParameterName::ReferenceRadius)
                .optional(ParameterName::RotationIndex, -0.5),
        }
    }
}

/// Rotation law with its parameter values
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rotation {
    Keplerian {
        stellar_mass: f64,
    },
    PowerLaw {
        reference_velocity: f64,
        reference_radius: f64,
        index: f64,
    },
}

impl Rotation {
    pub fn keplerian(stellar_mass: f64) -> Result<Self, GeometryError> {
        if !stellar_mass.is_finite() {
            return Err(GeometryError::NonFinite {
                name: ParameterName::StellarMass,
                value: stellar_mass,
            });
        }
        if stellar_mass < 0.0 {
            return Err(GeometryError::Negative {
                name: ParameterName::StellarMass,
                value: stellar_mass,
            });
        }
        Ok(Self::Keplerian { stellar_mass })
    }

    pub fn power_law(
        reference_velocity: f64,
        reference_radius: f64,
        index: f64,
    ) -> Result<Self, GeometryError> {
        for (name, value) in [
            (ParameterName::ReferenceVelocity, reference_velocity),
            (ParameterName::ReferenceRadius, reference_radius),
            (ParameterName::RotationIndex, index),
        ] {
            if !value.is_finite() {
                return Err(GeometryError::NonFinite { name, value });
            }
        }
        if reference_radius <= 0.0 {
            return Err(GeometryError::NonPositive {
                name: ParameterName::ReferenceRadius,
                value: reference_radius,
            });
        }
        Ok(Self::PowerLaw {
            reference_velocity,
            reference_radius,
            index,
        })
    }

    pub(super) fn from_values(
        law: RotationLaw,
        values: &ParameterValues,
    ) -> Result<Self, GeometryError> {
        let get = |name| values.get(name).ok_or(GeometryError::Missing(name));
        match law {
            RotationLaw::Keplerian => Self::keplerian(get(ParameterName::StellarMass)?),
            RotationLaw::PowerLaw => Self::power_law(
                get(ParameterName::ReferenceVelocity)?,
                get(ParameterName::ReferenceRadius)?,
                values.get(ParameterName::RotationIndex).unwrap_or(-0.5),
            ),
        }
    }

    /// Rotation velocity at cylindrical radius `r` of a surface at height `z`
    ///
    /// The Keplerian law accounts for the height, the power law depends on `r` only.
    pub fn velocity(&self, r: f64, z: f64) -> f64 {
        match *self {
            Self::Keplerian { stellar_mass } => {
                let r2 = r * r;
                f64::sqrt(GM_SUN * stellar_mass / AU) * r * (r2 + z * z).powf(-0.75)
            }
            Self::PowerLaw {
                reference_velocity,
                reference_radius,
                index,
            } => reference_velocity * (r / reference_radius).powf(index),
        }
    }
}

mod evaluator;
pub use evaluator::{MapEvaluation, RotationMapObjective};

use crate::data::FirstMomentMap;
use crate::error::{ConfigError, FitError};
use crate::geometry::{DiskGeometry, GeometryError, RotationLaw, SurfaceKind, SurfaceSolver};
use crate::params::{FitParameters, ParameterName, ParameterRequirements, ParameterValues};
use crate::result::{FitResult, ResultPackager};
use crate::sampler::{FitAlgorithm, FitAlgorithmTrait, McmcSampler, Objective, StopSignal};

use macro_const::macro_const;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

macro_const! {
    const DOC: &str = r#"
Parametric rotation model fit to a first-moment map

Every usable pixel of the [FirstMomentMap] is deprojected onto the emitting surface of the disk,
and the model line-of-sight velocity

$$
v_\mathrm{los} = v(r, h(r)) \sin i \cos\varphi + v_\mathrm{sys}
$$

is compared with the observed one:

$$
\ln\mathcal{L} = -\frac12 \sum_k \left(\frac{v_k - v_{\mathrm{los},k}}{\sigma_k}\right)^2
    - \sum_k \ln\sigma_k.
$$

Pixels without a disk-frame solution are excluded from the sum; parameter vectors for which the
excluded fraction is larger than `max_excluded_fraction`, or where no pixel is left, are rejected.

- Parameters: **inclination**, **position_angle**, **systemic_velocity**, rotation law parameters
  (**stellar_mass** for the Keplerian law, **reference_velocity**, **reference_radius** and
  optional **rotation_index** for the power law), flared surface parameters (**aspect_ratio**,
  **flaring_index**, **reference_radius**), optional **center_x** and **center_y**
- Default algorithm: ensemble MCMC

"#;
}

/// Radial window in the disk frame, pixels deprojecting outside `[r_min, r_max]` are ignored
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RadialMask {
    pub r_min: f64,
    pub r_max: f64,
}

impl RadialMask {
    pub fn new(r_min: f64, r_max: f64) -> Self {
        Self { r_min, r_max }
    }

    #[inline]
    pub fn contains(&self, r: f64) -> bool {
        r >= self.r_min && r <= self.r_max
    }
}

/// Forward model of a first-moment map
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RotationMapModel {
    #[serde(default)]
    pub law: RotationLaw,
    #[serde(default)]
    pub surface: SurfaceKind,
    #[serde(default)]
    pub solver: SurfaceSolver,
    #[serde(default)]
    pub radial_mask: Option<RadialMask>,
    #[serde(default = "RotationMapModel::default_max_excluded_fraction")]
    pub max_excluded_fraction: f64,
}

impl RotationMapModel {
    pub fn new(law: RotationLaw, surface: SurfaceKind) -> Self {
        Self {
            law,
            surface,
            solver: SurfaceSolver::default(),
            radial_mask: None,
            max_excluded_fraction: Self::default_max_excluded_fraction(),
        }
    }

    pub fn with_solver(mut self, solver: SurfaceSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_radial_mask(mut self, radial_mask: RadialMask) -> Self {
        self.radial_mask = Some(radial_mask);
        self
    }

    #[inline]
    pub fn default_max_excluded_fraction() -> f64 {
        0.5
    }

    pub fn requirements(&self) -> ParameterRequirements {
        let requirements = ParameterRequirements::new()
            .require(ParameterName::Inclination)
            .require(ParameterName::PositionAngle)
            .require(ParameterName::SystemicVelocity)
            .optional(ParameterName::CenterX, 0.0)
            .optional(ParameterName::CenterY, 0.0);
        let requirements = self.law.requirements(requirements);
        self.surface.requirements(requirements)
    }

    pub fn geometry(&self, values: &ParameterValues) -> Result<DiskGeometry, GeometryError> {
        DiskGeometry::from_values(self.law, self.surface, values)
    }

    /// Model and residual maps for a complete parameter assignment
    pub fn evaluate(
        &self,
        map: &FirstMomentMap,
        values: &ParameterValues,
    ) -> Result<MapEvaluation, GeometryError> {
        evaluator::evaluate(self, map, values)
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.solver.check()?;
        if !(self.max_excluded_fraction >= 0.0 && self.max_excluded_fraction <= 1.0) {
            return Err(ConfigError::InvalidSetting {
                name: "max_excluded_fraction",
                reason: "must be within [0, 1]",
            });
        }
        if let Some(mask) = self.radial_mask {
            if !(mask.r_min >= 0.0 && mask.r_min < mask.r_max) {
                return Err(ConfigError::InvalidSetting {
                    name: "radial_mask",
                    reason: "0 <= r_min < r_max is required",
                });
            }
        }
        Ok(())
    }
}

impl Default for RotationMapModel {
    fn default() -> Self {
        Self::new(RotationLaw::default(), SurfaceKind::default())
    }
}

#[doc = DOC!()]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RotationMapFit {
    pub model: RotationMapModel,
    pub algorithm: FitAlgorithm,
    #[serde(default)]
    pub packager: ResultPackager,
}

impl RotationMapFit {
    pub fn new(model: RotationMapModel, algorithm: FitAlgorithm) -> Self {
        Self {
            model,
            algorithm,
            packager: ResultPackager::default(),
        }
    }

    pub fn with_packager(mut self, packager: ResultPackager) -> Self {
        self.packager = packager;
        self
    }

    #[inline]
    pub fn default_algorithm() -> FitAlgorithm {
        McmcSampler::default().into()
    }

    pub fn doc() -> &'static str {
        DOC
    }

    pub fn fit(
        &self,
        map: &FirstMomentMap,
        parameters: &FitParameters,
    ) -> Result<FitResult, FitError> {
        self.fit_with_stop(map, parameters, &StopSignal::new())
    }

    pub fn fit_with_stop(
        &self,
        map: &FirstMomentMap,
        parameters: &FitParameters,
        stop: &StopSignal,
    ) -> Result<FitResult, FitError> {
        self.model.check()?;
        self.packager.check()?;
        let parameters = parameters.resolve(&self.model.requirements())?;
        self.algorithm.check(parameters.ndim())?;

        let objective = RotationMapObjective::new(&self.model, map, &parameters);
        if !objective.ln_prob(&parameters.initial_guess()).is_finite() {
            warn!("log-probability is not finite at the initial guess");
        }
        let output = self.algorithm.run(&objective, &parameters, stop)?;
        let result = self.packager.package(&output, &parameters)?;
        info!(
            status = ?result.diagnostics.status,
            n_pixels = map.n_pixels(),
            "rotation map fit finished"
        );
        Ok(result)
    }
}

impl Default for RotationMapFit {
    fn default() -> Self {
        Self::new(RotationMapModel::default(), Self::default_algorithm())
    }
}

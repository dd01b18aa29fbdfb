//! Non-parametric rotation velocity of a single annulus.
//!
//! Spectra extracted along an annulus are centred on `v_sys + v_rot sin i cos φ`. The
//! [AnnulusAligner] removes this shift for a trial `v_rot`, and a [MeritStrategy] scores how well
//! the deshifted spectra line up. The rotation velocity is the one that maximizes the merit,
//! explored by a [FitAlgorithm](crate::FitAlgorithm) over `ln p = ln prior + merit / T`.

mod aligner;
pub use aligner::AnnulusAligner;

mod guess;
pub use guess::{HarmonicGuess, PeakMethod, harmonic_guess};

mod interpolation;
pub use interpolation::Interpolation;

mod merit;
pub use merit::{MeritStrategy, WidthMethod, binned_spectrum, stacked_spectrum};

use crate::data::AnnulusSpectra;
use crate::error::{ConfigError, FitError};
use crate::geometry::GeometryError;
use crate::params::{FitParameters, ParameterName, ParameterRequirements, ResolvedParameters};
use crate::result::{FitResult, ResultPackager};
use crate::sampler::{
    CobylaOptimizer, FitAlgorithm, FitAlgorithmTrait, Objective, StopSignal,
};

use macro_const::macro_const;
use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use tracing::{debug, info};

macro_const! {
    const DOC: &str = r#"
Rotation velocity of an annulus from the alignment of its spectra

The spectrum at azimuth $\varphi_k$ is shifted back by the expected line-of-sight offset,

$$
I'_k(u) = I_k\left(u + v_\mathrm{sys} + v_\mathrm{rot} \sin i \cos\varphi_k\right),
$$

and the merit of the trial $v_\mathrm{rot}$ measures how coherent the deshifted spectra are:
either the negative width of their average, or their mean cross-correlation. The objective is
$\ln p = \ln\pi(v_\mathrm{rot}) + \mathrm{merit} / T$.

Without an inclination the disk is treated as edge-on, $\sin i = 1$, and
$v_\mathrm{rot}$ is the projected rotation velocity. Both merits are invariant to a common
velocity shift, so the systemic velocity and the inclination may only be fixed.

- Parameters: **rotation_velocity**, optional fixed **systemic_velocity** and **inclination**
- Default algorithm: COBYLA started from the harmonic fit of the line peaks

"#;
}

/// Deshifting and scoring settings of the annulus fit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnnulusModel {
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub merit: MeritStrategy,
    /// Merit scale `T`, 1 for cross-correlation and the channel width for width merits if not
    /// specified
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Bin the deprojected samples to this many times the number of channels instead of
    /// interpolating them onto the channel axis, width merits only
    #[serde(default)]
    pub resample: Option<f64>,
    #[serde(default)]
    pub peak_method: PeakMethod,
    /// Fit an azimuth offset in the harmonic guess of the starting rotation velocity
    #[serde(default)]
    pub fit_phase_offset: bool,
    /// Drop spectra with non-positive integrated intensity
    #[serde(default = "AnnulusModel::default_remove_empty")]
    pub remove_empty: bool,
    #[serde(default = "AnnulusModel::default_sort_by_azimuth")]
    pub sort_by_azimuth: bool,
}

impl AnnulusModel {
    pub fn new(interpolation: Interpolation, merit: MeritStrategy) -> Self {
        Self {
            interpolation,
            merit,
            temperature: None,
            resample: None,
            peak_method: PeakMethod::default(),
            fit_phase_offset: false,
            remove_empty: Self::default_remove_empty(),
            sort_by_azimuth: Self::default_sort_by_azimuth(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_resample(mut self, factor: f64) -> Self {
        self.resample = Some(factor);
        self
    }

    pub fn with_peak_method(mut self, peak_method: PeakMethod, fit_phase_offset: bool) -> Self {
        self.peak_method = peak_method;
        self.fit_phase_offset = fit_phase_offset;
        self
    }

    #[inline]
    pub fn default_remove_empty() -> bool {
        true
    }

    #[inline]
    pub fn default_sort_by_azimuth() -> bool {
        true
    }

    pub fn requirements(&self) -> ParameterRequirements {
        ParameterRequirements::new()
            .require(ParameterName::RotationVelocity)
            .optional(ParameterName::SystemicVelocity, 0.0)
            .optional(ParameterName::Inclination, FRAC_PI_2)
            .fixed_only(ParameterName::SystemicVelocity)
            .fixed_only(ParameterName::Inclination)
    }

    pub fn temperature_for(&self, spectra: &AnnulusSpectra) -> f64 {
        self.temperature.unwrap_or_else(|| match self.merit {
            MeritStrategy::Width(_) => spectra.channel_width(),
            MeritStrategy::CrossCorrelation => 1.0,
        })
    }

    /// Applies the configured preprocessing to the spectra
    pub fn prepare(&self, spectra: &AnnulusSpectra) -> Result<AnnulusSpectra, ConfigError> {
        let mut spectra = spectra.clone();
        if self.remove_empty {
            spectra = spectra.without_empty()?;
        }
        if self.sort_by_azimuth {
            spectra = spectra.sorted_by_azimuth();
        }
        Ok(spectra)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if let Some(temperature) = self.temperature {
            if !(temperature.is_finite() && temperature > 0.0) {
                return Err(ConfigError::InvalidSetting {
                    name: "temperature",
                    reason: "must be positive and finite",
                });
            }
        }
        if let Some(factor) = self.resample {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(ConfigError::InvalidSetting {
                    name: "resample",
                    reason: "must be positive and finite",
                });
            }
            if self.merit == MeritStrategy::CrossCorrelation {
                return Err(ConfigError::InvalidSetting {
                    name: "resample",
                    reason: "applies to width merits only",
                });
            }
        }
        Ok(())
    }
}

impl Default for AnnulusModel {
    fn default() -> Self {
        Self::new(Interpolation::default(), MeritStrategy::default())
    }
}

/// Log-posterior of the annulus rotation velocity
pub struct AnnulusObjective<'a> {
    aligner: AnnulusAligner,
    axis: Array1<f64>,
    merit: MeritStrategy,
    /// Number of bins of the resampled stacked spectrum
    n_bins: Option<usize>,
    systemic_velocity: f64,
    temperature: f64,
    sin_inclination: f64,
    parameters: &'a ResolvedParameters,
}

impl<'a> AnnulusObjective<'a> {
    pub fn new(
        model: &AnnulusModel,
        spectra: &AnnulusSpectra,
        parameters: &'a ResolvedParameters,
    ) -> Result<Self, ConfigError> {
        let systemic_velocity = parameters
            .fixed()
            .get(&ParameterName::SystemicVelocity)
            .copied()
            .unwrap_or(0.0);
        let inclination = parameters
            .fixed()
            .get(&ParameterName::Inclination)
            .copied()
            .unwrap_or(FRAC_PI_2);
        if !(inclination > 0.0 && inclination < PI) {
            return Err(GeometryError::Inclination(inclination).into());
        }
        let n_bins = match model.resample {
            Some(factor) => {
                let n_bins = ((spectra.n_channels() - 1) as f64 * factor).round() as usize;
                if n_bins < 3 {
                    return Err(ConfigError::InvalidSetting {
                        name: "resample",
                        reason: "leaves fewer than 3 bins",
                    });
                }
                Some(n_bins)
            }
            None => None,
        };
        let aligner = AnnulusAligner::new(spectra, model.interpolation);
        Ok(Self {
            axis: aligner.output_axis(systemic_velocity),
            aligner,
            merit: model.merit,
            n_bins,
            systemic_velocity,
            temperature: model.temperature_for(spectra),
            sin_inclination: inclination.sin(),
            parameters,
        })
    }

    /// Merit of a trial rotation velocity, `None` where it is undefined
    pub fn merit(&self, rotation_velocity: f64) -> Option<f64> {
        let projected_velocity = rotation_velocity * self.sin_inclination;
        match (self.merit, self.n_bins) {
            (MeritStrategy::Width(method), Some(n_bins)) => {
                let (velocities, intensities) = self
                    .aligner
                    .deprojected_samples(projected_velocity, self.systemic_velocity);
                let (axis, stacked) = binned_spectrum(
                    &velocities,
                    &intensities,
                    self.axis[0],
                    self.axis[self.axis.len() - 1],
                    n_bins,
                );
                method.width(stacked.view(), axis.view()).map(|width| -width)
            }
            _ => {
                let deshifted = self.aligner.deshift(projected_velocity);
                self.merit.merit(deshifted.view(), self.axis.view())
            }
        }
    }
}

impl Objective for AnnulusObjective<'_> {
    fn ndim(&self) -> usize {
        self.parameters.ndim()
    }

    fn ln_prob(&self, x: &[f64]) -> f64 {
        let ln_prior = self.parameters.ln_prior(x);
        if !ln_prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let Some(rotation_velocity) = self
            .parameters
            .assign(x)
            .get(ParameterName::RotationVelocity)
        else {
            return f64::NEG_INFINITY;
        };
        match self.merit(rotation_velocity) {
            Some(merit) if merit.is_finite() => ln_prior + merit / self.temperature,
            _ => f64::NEG_INFINITY,
        }
    }
}

#[doc = DOC!()]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnnulusFit {
    #[serde(default)]
    pub model: AnnulusModel,
    #[serde(default = "AnnulusFit::default_algorithm")]
    pub algorithm: FitAlgorithm,
    #[serde(default)]
    pub packager: ResultPackager,
}

impl AnnulusFit {
    pub fn new(model: AnnulusModel, algorithm: FitAlgorithm) -> Self {
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
        CobylaOptimizer::default().into()
    }

    pub fn doc() -> &'static str {
        DOC
    }

    pub fn fit(
        &self,
        spectra: &AnnulusSpectra,
        parameters: &FitParameters,
    ) -> Result<FitResult, FitError> {
        self.fit_with_stop(spectra, parameters, &StopSignal::new())
    }

    pub fn fit_with_stop(
        &self,
        spectra: &AnnulusSpectra,
        parameters: &FitParameters,
        stop: &StopSignal,
    ) -> Result<FitResult, FitError> {
        self.model.check()?;
        self.packager.check()?;
        let spectra = self.model.prepare(spectra)?;
        let mut parameters = parameters.resolve(&self.model.requirements())?;
        self.algorithm.check(parameters.ndim())?;

        if let Some(guess) =
            harmonic_guess(&spectra, self.model.peak_method, self.model.fit_phase_offset)
        {
            let sin_inclination = parameters
                .fixed()
                .get(&ParameterName::Inclination)
                .map_or(1.0, |i| i.sin());
            let rotation_velocity = guess.projected_velocity / sin_inclination;
            debug!(
                rotation_velocity,
                systemic_velocity = guess.systemic_velocity,
                phase_offset = guess.phase_offset,
                "harmonic guess"
            );
            parameters = parameters.with_default_init(ParameterName::RotationVelocity, rotation_velocity);
        }

        let objective = AnnulusObjective::new(&self.model, &spectra, &parameters)?;
        let output = self.algorithm.run(&objective, &parameters, stop)?;
        let result = self.packager.package(&output, &parameters)?;
        info!(
            status = ?result.diagnostics.status,
            n_spectra = spectra.n_spectra(),
            "annulus fit finished"
        );
        Ok(result)
    }
}

impl Default for AnnulusFit {
    fn default() -> Self {
        Self::new(AnnulusModel::default(), Self::default_algorithm())
    }
}

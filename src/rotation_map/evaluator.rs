use crate::data::{FirstMomentMap, Pixel};
use crate::geometry::{DiskGeometry, GeometryError, SkyPoint};
use crate::params::{ParameterValues, ResolvedParameters};
use crate::rotation_map::RotationMapModel;
use crate::sampler::Objective;

use ndarray::Array2;

/// Outcome of the model at a single usable pixel
#[derive(Clone, Copy, Debug, PartialEq)]
enum PixelModel {
    Velocity(f64),
    /// Deprojects outside the radial window
    OutsideWindow,
    /// No disk-frame solution or non-finite model velocity
    Excluded,
}

fn pixel_model(model: &RotationMapModel, geometry: &DiskGeometry, pixel: &Pixel) -> PixelModel {
    let Ok(point) = geometry.deproject(SkyPoint::new(pixel.x, pixel.y), &model.solver) else {
        return PixelModel::Excluded;
    };
    if let Some(mask) = model.radial_mask {
        if !mask.contains(point.r) {
            return PixelModel::OutsideWindow;
        }
    }
    let velocity = geometry.los_velocity(point);
    if velocity.is_finite() {
        PixelModel::Velocity(velocity)
    } else {
        PixelModel::Excluded
    }
}

/// Model and residual maps for a full parameter assignment
#[derive(Clone, Debug)]
pub struct MapEvaluation {
    /// Model line-of-sight velocity, NaN where the pixel does not take part in the fit
    pub model: Array2<f64>,
    /// Standardized residual `(observed - model) / σ`, NaN where the pixel does not take part
    pub residual: Array2<f64>,
    pub n_included: usize,
    /// Usable pixels without a disk-frame solution
    pub n_excluded: usize,
    /// Usable pixels outside the radial window
    pub n_outside_window: usize,
    /// `-½ Σ residual² - Σ ln σ` over the included pixels
    pub ln_likelihood: f64,
}

impl MapEvaluation {
    pub fn excluded_fraction(&self) -> f64 {
        let usable = self.n_included + self.n_excluded + self.n_outside_window;
        self.n_excluded as f64 / usable as f64
    }
}

pub(super) fn evaluate(
    model: &RotationMapModel,
    map: &FirstMomentMap,
    values: &ParameterValues,
) -> Result<MapEvaluation, GeometryError> {
    let geometry = model.geometry(values)?;
    let mut evaluation = MapEvaluation {
        model: Array2::from_elem(map.dim(), f64::NAN),
        residual: Array2::from_elem(map.dim(), f64::NAN),
        n_included: 0,
        n_excluded: 0,
        n_outside_window: 0,
        ln_likelihood: 0.0,
    };
    for pixel in map.pixels() {
        match pixel_model(model, &geometry, pixel) {
            PixelModel::Velocity(velocity) => {
                let residual = (pixel.velocity - velocity) / pixel.uncertainty;
                evaluation.model[pixel.index] = velocity;
                evaluation.residual[pixel.index] = residual;
                evaluation.n_included += 1;
                evaluation.ln_likelihood -= 0.5 * residual * residual + pixel.uncertainty.ln();
            }
            PixelModel::OutsideWindow => evaluation.n_outside_window += 1,
            PixelModel::Excluded => evaluation.n_excluded += 1,
        }
    }
    Ok(evaluation)
}

/// Log-posterior of the rotation-map model for the free-parameter vector
pub struct RotationMapObjective<'a> {
    model: &'a RotationMapModel,
    map: &'a FirstMomentMap,
    parameters: &'a ResolvedParameters,
}

impl<'a> RotationMapObjective<'a> {
    pub fn new(
        model: &'a RotationMapModel,
        map: &'a FirstMomentMap,
        parameters: &'a ResolvedParameters,
    ) -> Self {
        Self {
            model,
            map,
            parameters,
        }
    }

    fn ln_likelihood(&self, values: &ParameterValues) -> f64 {
        let Ok(geometry) = self.model.geometry(values) else {
            return f64::NEG_INFINITY;
        };
        let max_excluded = self.model.max_excluded_fraction * self.map.n_pixels() as f64;
        let mut n_included = 0usize;
        let mut n_excluded = 0usize;
        let mut ln_likelihood = 0.0;
        for pixel in self.map.pixels() {
            match pixel_model(self.model, &geometry, pixel) {
                PixelModel::Velocity(velocity) => {
                    let residual = (pixel.velocity - velocity) / pixel.uncertainty;
                    ln_likelihood -= 0.5 * residual * residual + pixel.uncertainty.ln();
                    n_included += 1;
                }
                PixelModel::OutsideWindow => {}
                PixelModel::Excluded => {
                    n_excluded += 1;
                    if n_excluded as f64 > max_excluded {
                        return f64::NEG_INFINITY;
                    }
                }
            }
        }
        if n_included == 0 {
            return f64::NEG_INFINITY;
        }
        ln_likelihood
    }
}

impl Objective for RotationMapObjective<'_> {
    fn ndim(&self) -> usize {
        self.parameters.ndim()
    }

    fn ln_prob(&self, x: &[f64]) -> f64 {
        let ln_prior = self.parameters.ln_prior(x);
        if !ln_prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let ln_prob = ln_prior + self.ln_likelihood(&self.parameters.assign(x));
        if ln_prob.is_nan() {
            f64::NEG_INFINITY
        } else {
            ln_prob
        }
    }
}

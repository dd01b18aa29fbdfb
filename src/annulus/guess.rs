use crate::annulus::merit::fit_gaussian;
use crate::data::AnnulusSpectra;

use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Estimator of the line-centre velocity of a single spectrum
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeakMethod {
    /// Velocity of the brightest channel
    Max,
    /// Vertex of the parabola through the brightest channel and its two neighbours
    #[default]
    Quadratic,
    /// Centre of a Gaussian fitted to the line, the brightest channel if the fit fails
    Gaussian,
}

impl PeakMethod {
    /// Line-centre velocity, `None` if the spectrum has no finite sample
    pub fn peak_velocity(&self, spectrum: ArrayView1<f64>, axis: ArrayView1<f64>) -> Option<f64> {
        let (i, _) = spectrum
            .iter()
            .enumerate()
            .filter(|(_, x)| x.is_finite())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
        match self {
            Self::Max => Some(axis[i]),
            Self::Quadratic => {
                if i == 0 || i + 1 == spectrum.len() {
                    return Some(axis[i]);
                }
                let (x0, x1, x2) = (axis[i - 1], axis[i], axis[i + 1]);
                let (y0, y1, y2) = (spectrum[i - 1], spectrum[i], spectrum[i + 1]);
                if !(y0.is_finite() && y2.is_finite()) {
                    return Some(x1);
                }
                let numerator = (x1 - x0).powi(2) * (y1 - y2) - (x1 - x2).powi(2) * (y1 - y0);
                let denominator = (x1 - x0) * (y1 - y2) - (x1 - x2) * (y1 - y0);
                if denominator == 0.0 {
                    return Some(x1);
                }
                let vertex = x1 - 0.5 * numerator / denominator;
                Some(vertex.clamp(x0, x2))
            }
            Self::Gaussian => Some(
                fit_gaussian(spectrum, axis)
                    .map(|profile| profile.centre)
                    .filter(|&centre| centre >= axis[0] && centre <= axis[axis.len() - 1])
                    .unwrap_or(axis[i]),
            ),
        }
    }
}

/// Starting values from the harmonic fit of the line-centre velocities
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HarmonicGuess {
    /// Amplitude `A` of `v_peak(φ) = A cos(φ + δφ) + B`
    pub projected_velocity: f64,
    /// Offset `B`
    pub systemic_velocity: f64,
    /// Azimuth offset `δφ`, zero unless it is fitted
    pub phase_offset: f64,
}

/// Fits the line-centre velocities with a harmonic of the azimuth by linear least squares
///
/// Without `fit_phase_offset` the model is `A cos φ + B`. With it the model is
/// `A cos(φ + δφ) + B`, fitted as `a cos φ + b sin φ + B`, which absorbs a misaligned azimuth
/// origin. Returns `None` if there are fewer spectra with a peak than coefficients, or their
/// azimuths do not constrain the harmonic.
pub fn harmonic_guess(
    spectra: &AnnulusSpectra,
    method: PeakMethod,
    fit_phase_offset: bool,
) -> Option<HarmonicGuess> {
    let axis = spectra.velocity_axis();
    let points: Vec<(f64, f64)> = spectra
        .spectra()
        .outer_iter()
        .zip(spectra.azimuths().iter())
        .filter_map(|(spectrum, &phi)| {
            method
                .peak_velocity(spectrum, axis)
                .map(|velocity| (phi, velocity))
        })
        .collect();
    let n_coefficients = if fit_phase_offset { 3 } else { 2 };
    if points.len() < n_coefficients {
        return None;
    }
    let design = DMatrix::from_fn(points.len(), n_coefficients, |i, j| {
        let phi = points[i].0;
        match (j, fit_phase_offset) {
            (0, _) => phi.cos(),
            (1, true) => phi.sin(),
            _ => 1.0,
        }
    });
    let rhs = DVector::from_iterator(points.len(), points.iter().map(|&(_, v)| v));
    let svd = design.svd(true, true);
    // A rank-deficient design means the azimuths cannot separate the harmonic terms
    if svd.rank(1e-8) < n_coefficients {
        return None;
    }
    let solution = svd.solve(&rhs, 1e-10).ok()?;
    let guess = if fit_phase_offset {
        let (a, b) = (solution[0], solution[1]);
        HarmonicGuess {
            projected_velocity: a.hypot(b),
            systemic_velocity: solution[2],
            phase_offset: f64::atan2(-b, a),
        }
    } else {
        HarmonicGuess {
            projected_velocity: solution[0],
            systemic_velocity: solution[1],
            phase_offset: 0.0,
        }
    };
    (guess.projected_velocity.is_finite() && guess.systemic_velocity.is_finite()).then_some(guess)
}

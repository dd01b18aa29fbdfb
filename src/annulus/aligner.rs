use crate::annulus::interpolation::{Interpolant, Interpolation};
use crate::data::AnnulusSpectra;

use ndarray::{Array1, Array2};

/// Moves every spectrum of an annulus onto the disk-frame velocity axis
///
/// The spectrum observed at azimuth `φ_k` is centred on `v_sys + v_proj cos φ_k`. Deshifting
/// resamples it as `I'_k(u) = I_k(u + v_sys + v_proj cos φ_k)` on the axis `u_j = v_j - v_sys`,
/// so that with the right projected velocity all the lines are centred on `u = 0`. The
/// interpolants are prepared once and reused for every trial velocity.
#[derive(Clone, Debug)]
pub struct AnnulusAligner {
    spectra: Array2<f64>,
    interpolants: Vec<Interpolant>,
    cos_azimuths: Vec<f64>,
    velocity_axis: Array1<f64>,
}

impl AnnulusAligner {
    pub fn new(spectra: &AnnulusSpectra, interpolation: Interpolation) -> Self {
        let velocity_axis = spectra.velocity_axis().to_owned();
        let interpolants = spectra
            .spectra()
            .outer_iter()
            .map(|spectrum| Interpolant::new(interpolation, velocity_axis.view(), spectrum))
            .collect();
        Self {
            spectra: spectra.spectra().to_owned(),
            interpolants,
            cos_azimuths: spectra.azimuths().iter().map(|phi| phi.cos()).collect(),
            velocity_axis,
        }
    }

    pub fn n_spectra(&self) -> usize {
        self.interpolants.len()
    }

    pub fn n_channels(&self) -> usize {
        self.velocity_axis.len()
    }

    /// Disk-frame velocity axis `u_j = v_j - v_sys`
    pub fn output_axis(&self, systemic_velocity: f64) -> Array1<f64> {
        &self.velocity_axis - systemic_velocity
    }

    /// Deshifted spectra, one row per spectrum, columns follow [Self::output_axis]
    ///
    /// `u_j + v_sys = v_j`, so the resampled values do not depend on the systemic velocity,
    /// only their axis does.
    pub fn deshift(&self, projected_velocity: f64) -> Array2<f64> {
        let mut deshifted = Array2::zeros((self.n_spectra(), self.n_channels()));
        for ((mut row, interpolant), &cos_phi) in deshifted
            .outer_iter_mut()
            .zip(self.interpolants.iter())
            .zip(self.cos_azimuths.iter())
        {
            let shift = projected_velocity * cos_phi;
            for (value, &v) in row.iter_mut().zip(self.velocity_axis.iter()) {
                *value = interpolant.eval(v + shift);
            }
        }
        deshifted
    }

    /// Every observed sample moved to the disk frame without resampling
    ///
    /// Channel `j` of spectrum `k` lands at `u = v_j - v_sys - v_proj cos φ_k`. Returns the
    /// velocities and the intensities of all samples.
    pub fn deprojected_samples(
        &self,
        projected_velocity: f64,
        systemic_velocity: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        let n_samples = self.spectra.len();
        let mut velocities = Vec::with_capacity(n_samples);
        let mut intensities = Vec::with_capacity(n_samples);
        for (spectrum, &cos_phi) in self.spectra.outer_iter().zip(self.cos_azimuths.iter()) {
            let shift = systemic_velocity + projected_velocity * cos_phi;
            for (&intensity, &v) in spectrum.iter().zip(self.velocity_axis.iter()) {
                velocities.push(v - shift);
                intensities.push(intensity);
            }
        }
        (velocities, intensities)
    }
}

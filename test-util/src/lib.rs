//! Synthetic observations of thin rotating disks

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Geometrically thin disk with a power-law rotation curve, angles in radians
#[derive(Clone, Debug)]
pub struct FlatDisk {
    pub inclination: f64,
    pub position_angle: f64,
    pub systemic_velocity: f64,
    pub reference_velocity: f64,
    pub reference_radius: f64,
    pub rotation_index: f64,
}

impl Default for FlatDisk {
    fn default() -> Self {
        Self {
            inclination: 30.0_f64.to_radians(),
            position_angle: 45.0_f64.to_radians(),
            systemic_velocity: 5.0,
            reference_velocity: 3.0,
            reference_radius: 100.0,
            rotation_index: -0.5,
        }
    }
}

impl FlatDisk {
    /// Line-of-sight velocity at sky offset `(x, y)` from the disk centre
    pub fn los_velocity(&self, x: f64, y: f64) -> f64 {
        let (sin_pa, cos_pa) = self.position_angle.sin_cos();
        let x_maj = x * sin_pa + y * cos_pa;
        let y_disk = (-x * cos_pa + y * sin_pa) / self.inclination.cos();
        let r = x_maj.hypot(y_disk);
        let cos_phi = x_maj / r;
        let v_rot = self.reference_velocity * (r / self.reference_radius).powf(self.rotation_index);
        v_rot * self.inclination.sin() * cos_phi + self.systemic_velocity
    }
}

/// Square first-moment map, rows follow `y_axis` and columns follow `x_axis`
#[derive(Clone, Debug)]
pub struct SyntheticMap {
    pub x_axis: Array1<f64>,
    pub y_axis: Array1<f64>,
    pub velocity: Array2<f64>,
    pub uncertainty: Array2<f64>,
}

/// Samples `disk` on a `size × size` grid spanning `[-extent, extent]` on both axes
///
/// Every pixel has uncertainty `sigma`. With `noise_seed` the velocities are perturbed by
/// Gaussian noise of that standard deviation, otherwise they are exact.
pub fn synthetic_rotation_map(
    disk: &FlatDisk,
    size: usize,
    extent: f64,
    sigma: f64,
    noise_seed: Option<u64>,
) -> SyntheticMap {
    let x_axis = Array1::linspace(-extent, extent, size);
    let y_axis = x_axis.clone();
    let mut velocity =
        Array2::from_shape_fn((size, size), |(i, j)| disk.los_velocity(x_axis[j], y_axis[i]));
    if let Some(seed) = noise_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        velocity.mapv_inplace(|v| v + sigma * rng.sample::<f64, _>(StandardNormal));
    }
    SyntheticMap {
        x_axis,
        y_axis,
        velocity,
        uncertainty: Array2::from_elem((size, size), sigma),
    }
}

/// Spectra of a single annulus, Gaussian lines centred on `v_sys + v_rot sin i cos φ`
#[derive(Clone, Debug)]
pub struct AnnulusConfig {
    pub n_spectra: usize,
    pub rotation_velocity: f64,
    pub systemic_velocity: f64,
    /// `None` for the projected velocity, `sin i = 1`
    pub inclination: Option<f64>,
    /// Standard deviation of the line profile
    pub line_width: f64,
    pub channel_width: f64,
    /// Half-width of the velocity axis around the systemic velocity
    pub velocity_range: f64,
    /// Standard deviation of the Gaussian noise added to every channel, the line peak is 1
    pub noise: f64,
    pub seed: u64,
}

impl Default for AnnulusConfig {
    fn default() -> Self {
        Self {
            n_spectra: 16,
            rotation_velocity: 4.0,
            systemic_velocity: 0.0,
            inclination: None,
            line_width: 0.5,
            channel_width: 0.1,
            velocity_range: 8.0,
            noise: 0.0,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticAnnulus {
    /// One row per azimuth
    pub spectra: Array2<f64>,
    /// Evenly spaced, `2πk / n_spectra`
    pub azimuths: Array1<f64>,
    pub velocity_axis: Array1<f64>,
}

pub fn synthetic_annulus(config: &AnnulusConfig) -> SyntheticAnnulus {
    let n_channels = (2.0 * config.velocity_range / config.channel_width).round() as usize + 1;
    let velocity_axis = Array1::linspace(
        config.systemic_velocity - config.velocity_range,
        config.systemic_velocity + config.velocity_range,
        n_channels,
    );
    let azimuths = Array1::from_shape_fn(config.n_spectra, |k| {
        2.0 * PI * k as f64 / config.n_spectra as f64
    });
    let projected_velocity = config.rotation_velocity * config.inclination.map_or(1.0, f64::sin);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let spectra = Array2::from_shape_fn((config.n_spectra, n_channels), |(k, j)| {
        let centre = config.systemic_velocity + projected_velocity * azimuths[k].cos();
        let line = f64::exp(-0.5 * ((velocity_axis[j] - centre) / config.line_width).powi(2));
        if config.noise > 0.0 {
            line + config.noise * rng.sample::<f64, _>(StandardNormal)
        } else {
            line
        }
    });
    SyntheticAnnulus {
        spectra,
        azimuths,
        velocity_axis,
    }
}

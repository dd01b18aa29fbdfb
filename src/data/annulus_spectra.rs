use crate::error::ConfigError;

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Spectra extracted along a single annulus of the disk
///
/// Row `k` of `spectra` is the spectrum observed at azimuth `azimuths[k]`, columns follow the
/// shared channel velocity axis. Individual channels may be NaN, such samples are ignored by the
/// merit functions.
#[derive(Clone, Debug)]
pub struct AnnulusSpectra {
    spectra: Array2<f64>,
    azimuths: Array1<f64>,
    velocity_axis: Array1<f64>,
}

impl AnnulusSpectra {
    pub fn new(
        spectra: Array2<f64>,
        azimuths: Array1<f64>,
        velocity_axis: Array1<f64>,
    ) -> Result<Self, ConfigError> {
        let (n_spectra, n_channels) = spectra.dim();
        if azimuths.len() != n_spectra {
            return Err(ConfigError::LengthMismatch {
                what: "azimuths",
                expected: n_spectra,
                actual: azimuths.len(),
            });
        }
        if velocity_axis.len() != n_channels {
            return Err(ConfigError::LengthMismatch {
                what: "velocity axis",
                expected: n_channels,
                actual: velocity_axis.len(),
            });
        }
        if n_channels < 2 {
            return Err(ConfigError::TooFewChannels(n_channels));
        }
        if velocity_axis.iter().any(|v| !v.is_finite())
            || velocity_axis.iter().tuple_windows().any(|(a, b)| b <= a)
        {
            return Err(ConfigError::NonMonotonicVelocityAxis);
        }
        if azimuths.iter().any(|phi| !phi.is_finite()) {
            return Err(ConfigError::InvalidSetting {
                name: "azimuths",
                reason: "must be finite",
            });
        }
        if n_spectra == 0 {
            return Err(ConfigError::NoSpectra);
        }
        Ok(Self {
            spectra,
            azimuths,
            velocity_axis,
        })
    }

    /// Drops spectra whose finite channels have a non-positive integrated intensity
    pub fn without_empty(self) -> Result<Self, ConfigError> {
        let keep = self
            .spectra
            .outer_iter()
            .positions(|spectrum| {
                let total: f64 = spectrum.iter().filter(|x| x.is_finite()).sum();
                total > 0.0
            })
            .collect_vec();
        if keep.is_empty() {
            return Err(ConfigError::NoSpectra);
        }
        Ok(self.select(&keep))
    }

    /// Reorders spectra by increasing azimuth
    pub fn sorted_by_azimuth(self) -> Self {
        let order = (0..self.azimuths.len())
            .sorted_by(|&a, &b| self.azimuths[a].total_cmp(&self.azimuths[b]))
            .collect_vec();
        self.select(&order)
    }

    fn select(self, rows: &[usize]) -> Self {
        Self {
            spectra: self.spectra.select(Axis(0), rows),
            azimuths: self.azimuths.select(Axis(0), rows),
            velocity_axis: self.velocity_axis,
        }
    }

    pub fn n_spectra(&self) -> usize {
        self.spectra.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.spectra.ncols()
    }

    pub fn spectra(&self) -> ArrayView2<'_, f64> {
        self.spectra.view()
    }

    pub fn spectrum(&self, k: usize) -> ArrayView1<'_, f64> {
        self.spectra.row(k)
    }

    pub fn azimuths(&self) -> ArrayView1<'_, f64> {
        self.azimuths.view()
    }

    pub fn velocity_axis(&self) -> ArrayView1<'_, f64> {
        self.velocity_axis.view()
    }

    /// Mean channel spacing
    pub fn channel_width(&self) -> f64 {
        let n = self.velocity_axis.len();
        (self.velocity_axis[n - 1] - self.velocity_axis[0]) / (n - 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{arr1, arr2};

    fn spectra() -> AnnulusSpectra {
        AnnulusSpectra::new(
            arr2(&[[0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]]),
            arr1(&[2.0, 1.0, -1.0]),
            arr1(&[-1.0, 0.0, 1.0]),
        )
        .unwrap()
    }

    #[test]
    fn channel_width() {
        assert_eq!(spectra().channel_width(), 1.0);
    }

    #[test]
    fn remove_empty() {
        let spectra = spectra().without_empty().unwrap();
        assert_eq!(spectra.n_spectra(), 2);
        assert_eq!(spectra.azimuths(), arr1(&[2.0, -1.0]));
    }

    #[test]
    fn remove_all_empty() {
        let spectra = AnnulusSpectra::new(
            Array2::zeros((2, 3)),
            arr1(&[0.0, 1.0]),
            arr1(&[0.0, 1.0, 2.0]),
        )
        .unwrap();
        assert_eq!(spectra.without_empty().unwrap_err(), ConfigError::NoSpectra);
    }

    #[test]
    fn sort_by_azimuth() {
        let spectra = spectra().sorted_by_azimuth();
        assert_eq!(spectra.azimuths(), arr1(&[-1.0, 1.0, 2.0]));
        assert_eq!(spectra.spectrum(0), arr1(&[1.0, 2.0, 1.0]));
        assert_eq!(spectra.spectrum(2), arr1(&[0.0, 1.0, 0.0]));
    }

    #[test]
    fn invalid_axes() {
        assert_eq!(
            AnnulusSpectra::new(Array2::zeros((2, 3)), arr1(&[0.0, 1.0]), arr1(&[0.0, 2.0, 1.0]))
                .unwrap_err(),
            ConfigError::NonMonotonicVelocityAxis
        );
        assert_eq!(
            AnnulusSpectra::new(Array2::zeros((2, 1)), arr1(&[0.0, 1.0]), arr1(&[0.0])).unwrap_err(),
            ConfigError::TooFewChannels(1)
        );
        assert!(matches!(
            AnnulusSpectra::new(Array2::zeros((2, 3)), arr1(&[0.0]), arr1(&[0.0, 1.0, 2.0])),
            Err(ConfigError::LengthMismatch { what: "azimuths", .. })
        ));
    }
}

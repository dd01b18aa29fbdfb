use crate::error::ConfigError;

use ndarray::{Array1, Array2, ArrayView2, Zip};

/// Usable pixel of a [FirstMomentMap]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pixel {
    /// Row and column of the pixel in the map
    pub index: (usize, usize),
    pub x: f64,
    pub y: f64,
    pub velocity: f64,
    pub uncertainty: f64,
}

/// Map of line-of-sight velocities with per-pixel uncertainties and sky offsets
///
/// All four arrays share the same shape. A pixel takes part in a fit only if its velocity is
/// finite and its uncertainty is finite and positive, other pixels are masked out.
#[derive(Clone, Debug)]
pub struct FirstMomentMap {
    velocity: Array2<f64>,
    uncertainty: Array2<f64>,
    x: Array2<f64>,
    y: Array2<f64>,
    pixels: Vec<Pixel>,
}

impl FirstMomentMap {
    pub fn new(
        velocity: Array2<f64>,
        uncertainty: Array2<f64>,
        x: Array2<f64>,
        y: Array2<f64>,
    ) -> Result<Self, ConfigError> {
        let expected = velocity.dim();
        for (what, array) in [("uncertainty", &uncertainty), ("x", &x), ("y", &y)] {
            if array.dim() != expected {
                return Err(ConfigError::ShapeMismatch {
                    what,
                    expected,
                    actual: array.dim(),
                });
            }
        }

        let mut pixels = vec![];
        Zip::indexed(&velocity)
            .and(&uncertainty)
            .and(&x)
            .and(&y)
            .for_each(|index, &v, &sigma, &x, &y| {
                if v.is_finite() && sigma.is_finite() && sigma > 0.0 && x.is_finite() && y.is_finite()
                {
                    pixels.push(Pixel {
                        index,
                        x,
                        y,
                        velocity: v,
                        uncertainty: sigma,
                    });
                }
            });
        if pixels.is_empty() {
            return Err(ConfigError::NoValidPixels);
        }

        Ok(Self {
            velocity,
            uncertainty,
            x,
            y,
            pixels,
        })
    }

    /// Builds sky offsets from 1D axes, rows follow `y_axis` and columns follow `x_axis`
    pub fn from_axes(
        velocity: Array2<f64>,
        uncertainty: Array2<f64>,
        x_axis: &Array1<f64>,
        y_axis: &Array1<f64>,
    ) -> Result<Self, ConfigError> {
        let shape = (y_axis.len(), x_axis.len());
        if velocity.dim() != shape {
            return Err(ConfigError::ShapeMismatch {
                what: "velocity",
                expected: shape,
                actual: velocity.dim(),
            });
        }
        let x = Array2::from_shape_fn(shape, |(_, j)| x_axis[j]);
        let y = Array2::from_shape_fn(shape, |(i, _)| y_axis[i]);
        Self::new(velocity, uncertainty, x, y)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.velocity.dim()
    }

    pub fn velocity(&self) -> ArrayView2<'_, f64> {
        self.velocity.view()
    }

    pub fn uncertainty(&self) -> ArrayView2<'_, f64> {
        self.uncertainty.view()
    }

    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f64> {
        self.y.view()
    }

    /// Usable pixels in row-major order
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn n_pixels(&self) -> usize {
        self.pixels.len()
    }

    /// Same map with every uncertainty multiplied by `factor`
    pub fn with_scaled_uncertainty(&self, factor: f64) -> Result<Self, ConfigError> {
        Self::new(
            self.velocity.clone(),
            &self.uncertainty * factor,
            self.x.clone(),
            self.y.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{arr1, arr2};

    #[test]
    fn masks_invalid_pixels() {
        let velocity = arr2(&[[1.0, f64::NAN], [3.0, 4.0]]);
        let uncertainty = arr2(&[[0.1, 0.1], [0.0, f64::INFINITY]]);
        let map = FirstMomentMap::from_axes(
            velocity,
            uncertainty,
            &arr1(&[0.0, 1.0]),
            &arr1(&[10.0, 20.0]),
        )
        .unwrap();
        assert_eq!(map.n_pixels(), 1);
        assert_eq!(map.pixels()[0].index, (0, 0));
    }

    #[test]
    fn axes_orientation() {
        let map = FirstMomentMap::from_axes(
            Array2::zeros((2, 3)),
            Array2::ones((2, 3)),
            &arr1(&[-1.0, 0.0, 1.0]),
            &arr1(&[5.0, 6.0]),
        )
        .unwrap();
        assert_eq!(map.x()[(1, 2)], 1.0);
        assert_eq!(map.y()[(1, 2)], 6.0);
        let last = map.pixels().last().unwrap();
        assert_eq!((last.x, last.y), (1.0, 6.0));
    }

    #[test]
    fn shape_mismatch() {
        let result = FirstMomentMap::new(
            Array2::zeros((2, 2)),
            Array2::ones((2, 3)),
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
        );
        assert!(matches!(
            result,
            Err(ConfigError::ShapeMismatch {
                what: "uncertainty",
                ..
            })
        ));
    }

    #[test]
    fn no_valid_pixels() {
        let result = FirstMomentMap::from_axes(
            Array2::from_elem((2, 2), f64::NAN),
            Array2::ones((2, 2)),
            &arr1(&[0.0, 1.0]),
            &arr1(&[0.0, 1.0]),
        );
        assert_eq!(result.unwrap_err(), ConfigError::NoValidPixels);
    }
}

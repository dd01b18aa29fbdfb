use crate::sampler::Objective;

use nalgebra::{Cholesky, DMatrix};

/// Hessian of the log-probability by central differences with per-parameter `steps`
pub(super) fn ln_prob_hessian<O: Objective>(objective: &O, x: &[f64], steps: &[f64]) -> DMatrix<f64> {
    let n = x.len();
    let f0 = objective.ln_prob(x);
    let eval = |shifts: &[(usize, f64)]| {
        let mut point = x.to_vec();
        for &(i, shift) in shifts {
            point[i] += shift;
        }
        objective.ln_prob(&point)
    };

    let mut hessian = DMatrix::zeros(n, n);
    for i in 0..n {
        let hi = steps[i];
        hessian[(i, i)] = (eval(&[(i, hi)]) - 2.0 * f0 + eval(&[(i, -hi)])) / (hi * hi);
        for j in 0..i {
            let hj = steps[j];
            let value = (eval(&[(i, hi), (j, hj)]) - eval(&[(i, hi), (j, -hj)])
                - eval(&[(i, -hi), (j, hj)])
                + eval(&[(i, -hi), (j, -hj)]))
                / (4.0 * hi * hj);
            hessian[(i, j)] = value;
            hessian[(j, i)] = value;
        }
    }
    hessian
}

/// Covariance as the inverse of the negative Hessian, `None` unless it is negative-definite
pub(super) fn covariance_from_hessian(hessian: DMatrix<f64>) -> Option<DMatrix<f64>> {
    if hessian.iter().any(|h| !h.is_finite()) {
        return None;
    }
    let covariance = Cholesky::new(-hessian)?.inverse();
    covariance
        .iter()
        .all(|c| c.is_finite())
        .then_some(covariance)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    struct Gaussian2D;

    impl Objective for Gaussian2D {
        fn ndim(&self) -> usize {
            2
        }

        fn ln_prob(&self, x: &[f64]) -> f64 {
            // sigma_0 = 2, sigma_1 = 0.5, correlation 0.5
            let (a, b) = (x[0] / 2.0, x[1] / 0.5);
            let rho: f64 = 0.5;
            -0.5 * (a * a - 2.0 * rho * a * b + b * b) / (1.0 - rho * rho)
        }
    }

    #[test]
    fn gaussian_covariance() {
        let hessian = ln_prob_hessian(&Gaussian2D, &[0.3, -0.1], &[1e-3, 1e-3]);
        let covariance = covariance_from_hessian(hessian).unwrap();
        assert_relative_eq!(covariance[(0, 0)], 4.0, max_relative = 1e-5);
        assert_relative_eq!(covariance[(1, 1)], 0.25, max_relative = 1e-5);
        assert_relative_eq!(covariance[(0, 1)], 0.5, max_relative = 1e-5);
    }

    #[test]
    fn saddle_has_no_covariance() {
        let hessian = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, 1.0]);
        assert!(covariance_from_hessian(hessian).is_none());
        let hessian = DMatrix::from_row_slice(1, 1, &[f64::NEG_INFINITY]);
        assert!(covariance_from_hessian(hessian).is_none());
    }
}

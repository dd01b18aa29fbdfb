use ndarray::ArrayView1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Resampling scheme of the deshifted spectra
///
/// Samples outside the observed velocity axis are missing (NaN), they are never extrapolated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    /// Natural cubic spline through every run of consecutive finite samples
    CubicSpline,
}

/// Interpolant of a single spectrum, prepared once and evaluated for every trial velocity
#[derive(Clone, Debug)]
pub(super) struct Interpolant {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives of the spline, `None` for linear interpolation
    second_derivatives: Option<Vec<f64>>,
}

impl Interpolant {
    /// `x` must be finite and strictly increasing, `y` may contain NaN for missing samples
    pub(super) fn new(kind: Interpolation, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Self {
        let x = x.to_vec();
        let y = y.to_vec();
        let second_derivatives = match kind {
            Interpolation::Linear => None,
            Interpolation::CubicSpline => Some(natural_spline(&x, &y)),
        };
        Self {
            x,
            y,
            second_derivatives,
        }
    }

    pub(super) fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        if !(t >= self.x[0] && t <= self.x[n - 1]) {
            return f64::NAN;
        }
        // Index of the left node of the segment containing t
        let j = (self.x.partition_point(|&x| x <= t).max(1) - 1).min(n - 2);
        let (x0, x1) = (self.x[j], self.x[j + 1]);
        let (y0, y1) = (self.y[j], self.y[j + 1]);
        let h = x1 - x0;
        let a = (x1 - t) / h;
        let b = (t - x0) / h;
        match &self.second_derivatives {
            None => a * y0 + b * y1,
            Some(m) => {
                a * y0
                    + b * y1
                    + ((a * a * a - a) * m[j] + (b * b * b - b) * m[j + 1]) * h * h / 6.0
            }
        }
    }
}

/// Second derivatives of the natural cubic spline, computed separately for every run of
/// consecutive finite `y`, NaN at the missing samples
fn natural_spline(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut m = vec![f64::NAN; n];
    let mut begin = 0;
    while begin < n {
        if !y[begin].is_finite() {
            begin += 1;
            continue;
        }
        let mut end = begin + 1;
        while end < n && y[end].is_finite() {
            end += 1;
        }
        natural_spline_run(&x[begin..end], &y[begin..end], &mut m[begin..end]);
        begin = end;
    }
    m
}

/// Thomas algorithm for the tridiagonal system of a natural spline, `m` has zero ends
fn natural_spline_run(x: &[f64], y: &[f64], m: &mut [f64]) {
    let n = x.len();
    m.fill(0.0);
    if n < 3 {
        return;
    }
    // Interior unknowns m[1..n-1]
    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];
    for i in 1..n - 1 {
        let h0 = x[i] - x[i - 1];
        let h1 = x[i + 1] - x[i];
        let lower = h0 / 6.0;
        let diag = (h0 + h1) / 3.0;
        let upper = h1 / 6.0;
        let rhs = (y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0;
        let denom = diag - lower * c_prime[i - 1];
        c_prime[i] = upper / denom;
        d_prime[i] = (rhs - lower * d_prime[i - 1]) / denom;
    }
    for i in (1..n - 1).rev() {
        m[i] = d_prime[i] - c_prime[i] * m[i + 1];
    }
}

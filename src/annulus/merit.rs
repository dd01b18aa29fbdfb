use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fraction of the peak intensity below which channels do not contribute to a width
const PEAK_FRACTION_THRESHOLD: f64 = 0.1;

/// Measure of the stacked line width
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WidthMethod {
    /// Square root of the second central moment weighted by the intensity in excess of 10 % of
    /// the peak, so the noise of line-free channels does not contribute
    SecondMoment,
    /// Standard deviation of a Gaussian fitted as a weighted parabola to `ln I` over the channels
    /// above 10 % of the peak
    #[default]
    GaussianFit,
}

impl WidthMethod {
    /// Width of a stacked spectrum, `None` if it is undefined
    pub fn width(&self, stacked: ArrayView1<f64>, axis: ArrayView1<f64>) -> Option<f64> {
        match self {
            Self::SecondMoment => second_moment_width(stacked, axis),
            Self::GaussianFit => fit_gaussian(stacked, axis).map(|profile| profile.sigma),
        }
    }
}

/// How well a set of deshifted spectra is aligned, larger is better
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MeritStrategy {
    /// Negative width of the channel-by-channel average of the spectra
    Width(WidthMethod),
    /// Mean zero-lag Pearson coefficient of every spectrum with the average of the others
    CrossCorrelation,
}

impl Default for MeritStrategy {
    fn default() -> Self {
        Self::Width(WidthMethod::default())
    }
}

impl MeritStrategy {
    /// Merit of deshifted spectra (one per row) sampled on `axis`, `None` if it is undefined
    pub fn merit(&self, deshifted: ArrayView2<f64>, axis: ArrayView1<f64>) -> Option<f64> {
        match self {
            Self::Width(method) => {
                let stacked = stacked_spectrum(deshifted);
                method.width(stacked.view(), axis).map(|width| -width)
            }
            Self::CrossCorrelation => mean_cross_correlation(deshifted),
        }
    }
}

/// Channel-by-channel mean ignoring missing samples, NaN where every sample is missing
pub fn stacked_spectrum(deshifted: ArrayView2<f64>) -> Array1<f64> {
    deshifted
        .axis_iter(Axis(1))
        .map(|channel| {
            let (sum, count) = channel
                .iter()
                .filter(|x| x.is_finite())
                .fold((0.0, 0usize), |(sum, count), &x| (sum + x, count + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Mean intensity of scattered samples in `n_bins` equal bins spanning `[lower, upper]`
///
/// Returns the bin centres and the means, NaN for bins without a finite sample. Samples outside
/// the range are ignored.
pub fn binned_spectrum(
    velocities: &[f64],
    intensities: &[f64],
    lower: f64,
    upper: f64,
    n_bins: usize,
) -> (Array1<f64>, Array1<f64>) {
    if n_bins == 0 {
        return (Array1::zeros(0), Array1::zeros(0));
    }
    let bin_width = (upper - lower) / n_bins as f64;
    let mut sum = vec![0.0; n_bins];
    let mut count = vec![0usize; n_bins];
    for (&v, &intensity) in velocities.iter().zip(intensities.iter()) {
        if !(intensity.is_finite() && v >= lower && v <= upper) {
            continue;
        }
        let bin = usize::min(((v - lower) / bin_width) as usize, n_bins - 1);
        sum[bin] += intensity;
        count[bin] += 1;
    }
    let centres = Array1::from_shape_fn(n_bins, |i| lower + (i as f64 + 0.5) * bin_width);
    let means = sum
        .iter()
        .zip(count.iter())
        .map(|(&sum, &count)| if count == 0 { f64::NAN } else { sum / count as f64 })
        .collect();
    (centres, means)
}

fn finite_peak(spectrum: ArrayView1<f64>) -> Option<f64> {
    let peak = spectrum
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    (peak > 0.0).then_some(peak)
}

fn second_moment_width(stacked: ArrayView1<f64>, axis: ArrayView1<f64>) -> Option<f64> {
    let threshold = PEAK_FRACTION_THRESHOLD * finite_peak(stacked)?;
    let weights = || {
        stacked
            .iter()
            .zip(axis.iter())
            .filter(move |(intensity, _)| intensity.is_finite() && **intensity > threshold)
            .map(move |(&intensity, &u)| (intensity - threshold, u))
    };
    let (w_sum, wu_sum) = weights().fold((0.0, 0.0), |(w_sum, wu_sum), (w, u)| {
        (w_sum + w, wu_sum + w * u)
    });
    if !(w_sum > 0.0) {
        return None;
    }
    let mean = wu_sum / w_sum;
    let variance = weights().map(|(w, u)| w * (u - mean).powi(2)).sum::<f64>() / w_sum;
    Some(variance.sqrt())
}

/// Centre and standard deviation of a Gaussian line profile
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct GaussianProfile {
    pub centre: f64,
    pub sigma: f64,
}

/// Caruana's algorithm: weighted least squares of `ln I = a + b u + c u²` with weights `I²` over
/// the channels above 10 % of the peak
pub(super) fn fit_gaussian(
    spectrum: ArrayView1<f64>,
    axis: ArrayView1<f64>,
) -> Option<GaussianProfile> {
    let threshold = PEAK_FRACTION_THRESHOLD * finite_peak(spectrum)?;
    let points: Vec<(f64, f64)> = spectrum
        .iter()
        .zip(axis.iter())
        .filter(|&(&intensity, _)| intensity.is_finite() && intensity > threshold)
        .map(|(&intensity, &u)| (u, intensity))
        .collect();
    if points.len() < 3 {
        return None;
    }

    // Centre the axis to keep the normal equations well conditioned
    let u_mean = points.iter().map(|(u, _)| u).sum::<f64>() / points.len() as f64;
    let design = DMatrix::from_fn(points.len(), 3, |i, j| {
        let (u, intensity) = points[i];
        intensity * (u - u_mean).powi(j as i32)
    });
    let rhs = DVector::from_iterator(
        points.len(),
        points.iter().map(|&(_, intensity)| intensity * intensity.ln()),
    );
    let svd = design.svd(true, true);
    let coefficients = svd.solve(&rhs, 1e-12).ok()?;
    let (b, c) = (coefficients[1], coefficients[2]);
    if !(c < 0.0) {
        return None;
    }
    let profile = GaussianProfile {
        centre: u_mean - 0.5 * b / c,
        sigma: (-0.5 / c).sqrt(),
    };
    (profile.centre.is_finite() && profile.sigma.is_finite()).then_some(profile)
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y.iter()) {
        let dx = a - x_mean;
        let dy = b - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if !(sxx > 0.0 && syy > 0.0) {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

fn mean_cross_correlation(deshifted: ArrayView2<f64>) -> Option<f64> {
    let n_channels = deshifted.ncols();
    let mut sum = vec![0.0; n_channels];
    let mut count = vec![0usize; n_channels];
    for spectrum in deshifted.outer_iter() {
        for (j, &x) in spectrum.iter().enumerate() {
            if x.is_finite() {
                sum[j] += x;
                count[j] += 1;
            }
        }
    }

    let mut total = 0.0;
    let mut n_defined = 0usize;
    let mut own = Vec::with_capacity(n_channels);
    let mut others = Vec::with_capacity(n_channels);
    for spectrum in deshifted.outer_iter() {
        own.clear();
        others.clear();
        for (j, &x) in spectrum.iter().enumerate() {
            if x.is_finite() && count[j] > 1 {
                own.push(x);
                others.push((sum[j] - x) / (count[j] - 1) as f64);
            }
        }
        if own.len() < 3 {
            continue;
        }
        if let Some(r) = pearson(&own, &others) {
            total += r;
            n_defined += 1;
        }
    }
    (n_defined > 0).then(|| total / n_defined as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, arr1, arr2};

    fn gaussian(axis: &Array1<f64>, mu: f64, sigma: f64) -> Array1<f64> {
        axis.mapv(|u| f64::exp(-0.5 * ((u - mu) / sigma).powi(2)))
    }

    #[test]
    fn stacked_ignores_missing_samples() {
        let deshifted = arr2(&[[1.0, f64::NAN, f64::NAN], [3.0, 2.0, f64::NAN]]);
        let stacked = stacked_spectrum(deshifted.view());
        assert_eq!(stacked[0], 2.0);
        assert_eq!(stacked[1], 2.0);
        assert!(stacked[2].is_nan());
    }

    #[test]
    fn gaussian_fit_recovers_profile() {
        let axis = Array1::linspace(-5.0, 5.0, 201);
        let line = 2.0 * gaussian(&axis, 0.3, 0.7);
        let profile = fit_gaussian(line.view(), axis.view()).unwrap();
        assert_abs_diff_eq!(profile.sigma, 0.7, epsilon = 1e-8);
        assert_abs_diff_eq!(profile.centre, 0.3, epsilon = 1e-8);
    }

    #[test]
    fn second_moment_scales_with_line_width() {
        let axis = Array1::linspace(-10.0, 10.0, 2001);
        let narrow = second_moment_width(gaussian(&axis, 0.3, 0.4).view(), axis.view()).unwrap();
        let wide = second_moment_width(gaussian(&axis, -0.2, 0.8).view(), axis.view()).unwrap();
        assert!(narrow < 0.4);
        assert_abs_diff_eq!(wide / narrow, 2.0, epsilon = 1e-3);
    }

    #[test]
    fn faint_channels_do_not_contribute() {
        let axis = arr1(&[-1.0, 0.0, 1.0, 2.0, 3.0]);
        let stacked = arr1(&[1.0, 2.0, 1.0, -100.0, 0.15]);
        // Threshold is 0.2: weights are 0.8, 1.8, 0.8 around u = 0
        assert_abs_diff_eq!(
            second_moment_width(stacked.view(), axis.view()).unwrap(),
            (1.6_f64 / 3.4).sqrt(),
            epsilon = 1e-12
        );

        let line = gaussian(&Array1::linspace(-8.0, 8.0, 161), 0.0, 0.5);
        let axis = Array1::linspace(-8.0, 8.0, 161);
        let mut noisy = line.clone();
        noisy[10] = 0.05;
        noisy[150] = 0.08;
        assert_eq!(
            second_moment_width(noisy.view(), axis.view()),
            second_moment_width(line.view(), axis.view())
        );
    }

    #[test]
    fn binned_spectrum_averages_samples() {
        let velocities = [-0.9, -0.6, 0.1, 0.2, 0.99, 1.0, 5.0];
        let intensities = [1.0, 3.0, 2.0, f64::NAN, 4.0, 6.0, 100.0];
        let (centres, means) = binned_spectrum(&velocities, &intensities, -1.0, 1.0, 4);
        assert_eq!(centres, arr1(&[-0.75, -0.25, 0.25, 0.75]));
        assert_eq!(means[0], 2.0);
        assert!(means[1].is_nan());
        assert_eq!(means[2], 2.0);
        assert_eq!(means[3], 5.0);
    }

    #[test]
    fn undefined_merits() {
        let axis = arr1(&[-1.0, 0.0, 1.0]);
        let empty = Array2::from_elem((2, 3), -1.0);
        for strategy in [
            MeritStrategy::Width(WidthMethod::SecondMoment),
            MeritStrategy::Width(WidthMethod::GaussianFit),
        ] {
            assert_eq!(strategy.merit(empty.view(), axis.view()), None);
        }
        // Flat spectra have no variance to correlate
        let flat = Array2::ones((3, 3));
        assert_eq!(
            MeritStrategy::CrossCorrelation.merit(flat.view(), axis.view()),
            None
        );
    }

    #[test]
    fn aligned_spectra_correlate_better() {
        let axis = Array1::linspace(-5.0, 5.0, 101);
        let mut aligned = Array2::zeros((4, 101));
        let mut misaligned = Array2::zeros((4, 101));
        for (k, shift) in [-0.8, -0.3, 0.4, 0.9].into_iter().enumerate() {
            aligned.row_mut(k).assign(&gaussian(&axis, 0.0, 0.5));
            misaligned.row_mut(k).assign(&gaussian(&axis, shift, 0.5));
        }
        let strategy = MeritStrategy::CrossCorrelation;
        let aligned_merit = strategy.merit(aligned.view(), axis.view()).unwrap();
        let misaligned_merit = strategy.merit(misaligned.view(), axis.view()).unwrap();
        assert_abs_diff_eq!(aligned_merit, 1.0, epsilon = 1e-12);
        assert!(misaligned_merit < aligned_merit);

        for method in [WidthMethod::SecondMoment, WidthMethod::GaussianFit] {
            let strategy = MeritStrategy::Width(method);
            assert!(
                strategy.merit(aligned.view(), axis.view()).unwrap()
                    > strategy.merit(misaligned.view(), axis.view()).unwrap()
            );
        }
    }
}

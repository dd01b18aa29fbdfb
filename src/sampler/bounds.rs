pub(super) fn within_bounds<T>(x: &[T], lower: &[T], upper: &[T]) -> bool
where
    T: PartialOrd,
{
    for i in 0..x.len() {
        if !(x[i] >= lower[i] && x[i] <= upper[i]) {
            return false;
        }
    }
    true
}

/// Maps a point of the box `[lower, upper]` to the unit box
pub(super) fn to_unit_box(x: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    itertools::izip!(x, lower, upper)
        .map(|(&x, &lower, &upper)| (x - lower) / (upper - lower))
        .collect()
}

/// Maps a point of the unit box back to `[lower, upper]`, clamping round-off excursions
pub(super) fn from_unit_box(u: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    itertools::izip!(u, lower, upper)
        .map(|(&u, &lower, &upper)| (lower + u * (upper - lower)).clamp(lower, upper))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn nan_is_out_of_bounds() {
        assert!(within_bounds(&[0.5, 1.0], &[0.0, 1.0], &[1.0, 2.0]));
        assert!(!within_bounds(&[f64::NAN, 1.0], &[0.0, 1.0], &[1.0, 2.0]));
        assert!(!within_bounds(&[0.5, 2.5], &[0.0, 1.0], &[1.0, 2.0]));
    }

    #[test]
    fn unit_box_round_trip() {
        let lower = [-2.0, 10.0];
        let upper = [2.0, 30.0];
        let u = to_unit_box(&[1.0, 15.0], &lower, &upper);
        assert_relative_eq!(&u[..], &[0.75, 0.25][..]);
        let x = from_unit_box(&u, &lower, &upper);
        assert_relative_eq!(&x[..], &[1.0, 15.0][..]);
        assert_eq!(from_unit_box(&[1.5], &[0.0], &[1.0]), vec![1.0]);
    }
}

use crate::annulus::AnnulusFit;
use crate::data::AnnulusSpectra;
use crate::error::FitError;
use crate::params::FitParameters;
use crate::result::FitResult;

use rayon::prelude::*;
use tracing::{debug, warn};

/// Annulus fit at a single radius of a rotation curve
#[derive(Clone, Debug, PartialEq)]
pub struct RotationCurvePoint {
    pub radius: f64,
    pub result: Result<FitResult, FitError>,
}

/// Fits every annulus independently and in parallel
///
/// `parameters_for_radius` gives the parameter configuration of each annulus, for example bounds
/// scaled with the Keplerian velocity at that radius. Points are returned in the order of `annuli`,
/// a failed annulus does not affect the others.
pub fn fit_rotation_curve<F>(
    fit: &AnnulusFit,
    annuli: &[(f64, AnnulusSpectra)],
    parameters_for_radius: F,
) -> Vec<RotationCurvePoint>
where
    F: Fn(f64) -> FitParameters + Sync,
{
    annuli
        .par_iter()
        .map(|(radius, spectra)| {
            let radius = *radius;
            let result = fit.fit(spectra, &parameters_for_radius(radius));
            match &result {
                Ok(_) => debug!(radius, "annulus fitted"),
                Err(error) => warn!(radius, %error, "annulus fit failed"),
            }
            RotationCurvePoint { radius, result }
        })
        .collect()
}

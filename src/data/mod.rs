mod annulus_spectra;
pub use annulus_spectra::AnnulusSpectra;

mod first_moment_map;
pub use first_moment_map::{FirstMomentMap, Pixel};

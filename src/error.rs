use crate::geometry::GeometryError;
use crate::params::ParameterName;

/// Error raised while validating fit inputs, before any sampling starts
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("parameter {0} is required by the model but missing")]
    MissingParameter(ParameterName),

    #[error("parameter {0} is not used by the model")]
    UnusedParameter(ParameterName),

    #[error("parameter {name} has invalid bounds [{lower}, {upper}], finite lower < upper required")]
    InvalidBounds {
        name: ParameterName,
        lower: f64,
        upper: f64,
    },

    #[error("parameter {name} has non-finite value {value}")]
    NonFiniteValue { name: ParameterName, value: f64 },

    #[error("starting guess {init} of parameter {name} is outside its bounds")]
    InitOutOfBounds { name: ParameterName, init: f64 },

    #[error("parameter {0} must be fixed for this model")]
    MustBeFixed(ParameterName),

    #[error("model has no free parameters")]
    NothingToFit,

    #[error("invalid prior for parameter {name}: {reason}")]
    InvalidPrior {
        name: ParameterName,
        reason: &'static str,
    },

    #[error("{what} has shape {actual:?}, but {expected:?} is expected")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("{what} has length {actual}, but {expected} is expected")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("velocity axis must be finite and strictly increasing")]
    NonMonotonicVelocityAxis,

    #[error("velocity axis has {0} channels, at least 2 are required")]
    TooFewChannels(usize),

    #[error("first-moment map has no pixel with finite velocity and positive uncertainty")]
    NoValidPixels,

    #[error("annulus has no usable spectra")]
    NoSpectra,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    #[error("invalid sampler settings: {0}")]
    InvalidSampler(String),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting {
        name: &'static str,
        reason: &'static str,
    },
}

/// Reason of a fit that ran but produced nothing trustworthy
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum FailureReason {
    #[error("objective is -inf or NaN over the explored region")]
    NonFiniteObjective,

    #[error("walkers never moved, prior may be degenerate")]
    NoAcceptedProposals,

    #[error("no finite samples remain after burn-in")]
    EmptyChain,

    /// The wrapped sampler or optimizer reported an error
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error returned from the fitting entry points
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum FitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fit failed: {0}")]
    Failed(FailureReason),
}

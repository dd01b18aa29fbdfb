#![doc = include_str!("../README.md")]


pub mod annulus;
pub use annulus::{AnnulusFit, AnnulusModel, Interpolation, MeritStrategy, PeakMethod, WidthMethod};

mod data;
pub use data::{AnnulusSpectra, FirstMomentMap, Pixel};

mod error;
pub use error::{ConfigError, FailureReason, FitError};

pub mod geometry;
pub use geometry::{DiskGeometry, DiskPoint, GeometryError, RotationLaw, SkyPoint, SurfaceKind};

mod params;
pub use params::{
    FitParameters, FreeParameter, Parameter, ParameterName, ParameterRequirements,
    ParameterValues, Prior, PriorTrait, ResolvedParameters,
};

mod result;
pub use result::{CredibleInterval, FitDiagnostics, FitResult, ParameterEstimate, ResultPackager};

pub mod rotation_map;
pub use rotation_map::{RadialMask, RotationMapFit, RotationMapModel};

mod rotation_curve;
pub use rotation_curve::{RotationCurvePoint, fit_rotation_curve};

pub mod sampler;
pub use sampler::{
    CobylaOptimizer, FitAlgorithm, FitAlgorithmTrait, McmcSampler, Objective, SamplerStatus,
    StopSignal, WalkerInit,
};

pub use ndarray;

//! # lensrate-core
//!
//! **Detectable rates of strongly lensed gravitational-wave events.**
//!
//! `lensrate-core` draws Monte-Carlo populations of compact-binary mergers,
//! both unlensed and strongly lensed by intervening galaxies, hands each round
//! to external image-solving and SNR collaborators, applies multi-image
//! detection criteria and turns the detectable fraction into a rate per year.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lensrate_core::{
//!     NormalizationConstant, PopulationConfig, RatePopulation, SelectionSpec,
//!     SnrCalculator, SourcePopulation,
//! };
//! # fn run(source: Arc<dyn SourcePopulation>, snr: Arc<dyn SnrCalculator>) -> lensrate_core::Result<()> {
//! let mut population = RatePopulation::builder(PopulationConfig::default(), source)
//!     .snr_calculator(snr)
//!     .normalization(NormalizationConstant::new(1e5)?, NormalizationConstant::new(1e2)?)
//!     .build()?;
//!
//! population.unlensed_statistics(100_000)?;
//! population.lensed_statistics(100_000)?;
//!
//! // Strongest image above 8, second above 8.
//! let spec = SelectionSpec::new([(8.0, 2)])?;
//! let cmp = population.rate_comparison(&spec)?;
//! println!("unlensed/lensed = {:.1}", cmp.ratio_step);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Quota sampler → lensed pipeline → batch accumulator (+ enrichment) →
//! detection selector → rate estimator
//!
//! Every stochastic stage is built on [`QuotaRejectionSampler`]: draw a full
//! candidate batch, keep what an acceptance rule accepts, top up, trim.
//! Stages exchange [`RecordBatch`]es, columnar maps of equal-length arrays.
//! Every quota loop is bounded and reports
//! [`LensRateError::NonConvergence`] instead of looping forever.

pub mod accumulate;
pub mod batch;
pub mod config;
pub mod cosmology;
pub mod detection;
pub mod enrich;
pub mod error;
pub mod fields;
pub mod geometry;
pub mod normalization;
pub mod optical_depth;
pub mod persist;
pub mod pipeline;
pub mod population;
pub mod priors;
pub mod quota;
pub mod rate;
pub mod source;

pub use accumulate::BatchAccumulator;
pub use batch::{AcceptanceMask, Column, RecordBatch};
pub use config::PopulationConfig;
pub use cosmology::{Cosmology, CosmologyParams, FlatLambdaCdm};
pub use detection::{
    Detection, DetectionSelector, ImageTypeWindow, MissingValuePolicy, SelectionSpec,
    ThresholdRequirement, std_normal_cdf,
};
pub use enrich::{ImageCountBounds, ImageSolver, SnrCalculator};
pub use error::{LensRateError, Result};
pub use geometry::{LensingCondition, einstein_radii, phi_cut_sie, phi_q_to_ellipticity};
pub use normalization::NormalizationConstant;
pub use optical_depth::{OpticalDepth, SisOpticalDepth, StrongLensingRedshiftSampler};
pub use pipeline::LensedSystemPipeline;
pub use population::{RatePopulation, RatePopulationBuilder, SampleKind};
pub use priors::{
    AxisRatioSampler, LensModelKind, LensPriorParams, LensPriors, LensRedshiftSampler,
    ScalarSampler, ShearSampler, VelocityDispersionParams, VelocityDispersionSampler,
};
pub use quota::{AcceptanceRule, DEFAULT_MAX_ROUNDS, QuotaRejectionSampler};
pub use rate::{RateComparison, RateEstimate, RateEstimator};
pub use source::SourcePopulation;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

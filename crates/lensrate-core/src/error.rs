//! Error taxonomy shared by every sampling stage.
//!
//! Contract violations ([`LensRateError::SchemaMismatch`]) indicate a caller
//! bug and are never retried. Statistical failures
//! ([`LensRateError::NonConvergence`], [`LensRateError::DegenerateDistribution`])
//! are returned to the caller so that no rate is ever computed from a
//! truncated or corrupted sample.

use thiserror::Error;

/// Errors produced by the sampling, selection and rate pipeline.
#[derive(Debug, Error)]
pub enum LensRateError {
    /// Field set, row count or column width disagreement between batches.
    #[error("schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    /// A quota loop exhausted its round budget before filling the quota.
    #[error(
        "{stage} did not converge: {accepted}/{target} rows accepted after {rounds} rounds"
    )]
    NonConvergence {
        stage: &'static str,
        rounds: usize,
        accepted: usize,
        target: usize,
    },

    /// Acceptance weights or candidate draws cannot support a rejection step.
    #[error("degenerate distribution in {stage}: {detail}")]
    DegenerateDistribution { stage: &'static str, detail: String },

    /// The optical depth exceeded its assumed supremum `tau(z_max)`.
    #[error("optical depth is not monotone: tau({z}) = {tau} exceeds tau_max = {tau_max}")]
    NonMonotoneOpticalDepth { z: f64, tau: f64, tau_max: f64 },

    /// Malformed threshold/image-count selection.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// Inconsistent configuration or sampler capability.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LensRateError {
    pub(crate) fn schema(detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            detail: detail.into(),
        }
    }

    pub(crate) fn degenerate(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::DegenerateDistribution {
            stage,
            detail: detail.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LensRateError>;

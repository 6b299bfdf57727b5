//! Normalization constant `C0`: the integrated intrinsic event rate that
//! turns a detectable fraction into a rate per year.

use serde::{Deserialize, Serialize};

use crate::error::{LensRateError, Result};

/// Finite, non-negative rate normalization.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct NormalizationConstant(f64);

impl NormalizationConstant {
    /// Wrap an externally computed value.
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(LensRateError::InvalidConfig(format!(
                "normalization constant {value} must be finite and non-negative"
            )));
        }
        Ok(Self(value))
    }

    /// Composite Simpson integral of a rate density over `[z_min, z_max]`.
    ///
    /// For unlensed events `f(z) = R(z) / (1 + z) · dVc/dz`; for lensed events
    /// the density is additionally multiplied by the optical depth. `n` is
    /// rounded up to the next even number of intervals.
    pub fn integrate<F>(f: F, z_min: f64, z_max: f64, n: usize) -> Result<Self>
    where
        F: Fn(f64) -> f64,
    {
        if !(z_min < z_max) {
            return Err(LensRateError::InvalidConfig(format!(
                "integration range [{z_min}, {z_max}] is empty"
            )));
        }
        let n = (n.max(2) + 1) & !1;
        let h = (z_max - z_min) / n as f64;
        let mut sum = f(z_min) + f(z_max);
        for i in 1..n {
            let w = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += w * f(z_min + i as f64 * h);
        }
        Self::new(sum * h / 3.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for NormalizationConstant {
    type Error = LensRateError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NormalizationConstant> for f64 {
    fn from(c0: NormalizationConstant) -> Self {
        c0.0
    }
}

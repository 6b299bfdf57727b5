//! Monte-Carlo rate estimation.
//!
//! `rate = C0 · mean(x · w)` where `x` is either the step-function hit
//! indicator or the detection probability and `w` a per-system importance
//! weight (unity for unlensed samples).

use log::info;
use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::error::{LensRateError, Result};
use crate::normalization::NormalizationConstant;

/// Rate under both detection conventions, in events per year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    /// Rate from the hit indicator.
    pub step: f64,
    /// Rate from the detection probability.
    pub pdet: f64,
    /// Monte-Carlo standard error of `step`.
    pub step_error: f64,
    /// Monte-Carlo standard error of `pdet`.
    pub pdet_error: f64,
    pub samples: usize,
    pub detected: usize,
}

/// Unlensed over lensed rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateComparison {
    pub unlensed: RateEstimate,
    pub lensed: RateEstimate,
    /// `unlensed.step / lensed.step`; infinite when no lensed event is detected.
    pub ratio_step: f64,
    pub ratio_pdet: f64,
}

impl RateComparison {
    pub fn new(unlensed: RateEstimate, lensed: RateEstimate) -> Self {
        Self {
            unlensed,
            lensed,
            ratio_step: unlensed.step / lensed.step,
            ratio_pdet: unlensed.pdet / lensed.pdet,
        }
    }
}

/// `C0 · mean` with its standard error.
fn scaled_mean(c0: f64, values: impl Iterator<Item = f64> + Clone, n: usize) -> (f64, f64) {
    let mean = values.clone().sum::<f64>() / n as f64;
    if n < 2 {
        return (c0 * mean, 0.0);
    }
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (c0 * mean, c0 * (var / n as f64).sqrt())
}

/// Scales detection outcomes by a normalization constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimator {
    normalization: NormalizationConstant,
}

impl RateEstimator {
    pub fn new(normalization: NormalizationConstant) -> Self {
        Self { normalization }
    }

    pub fn normalization(&self) -> NormalizationConstant {
        self.normalization
    }

    /// Rate from a detection over the full (undetected systems included)
    /// sample. `weights` defaults to one per system.
    pub fn estimate(&self, detection: &Detection, weights: Option<&[f64]>) -> Result<RateEstimate> {
        let n = detection.len();
        if n == 0 {
            return Err(LensRateError::degenerate(
                "rate estimation",
                "cannot average over an empty sample",
            ));
        }
        if let Some(w) = weights {
            if w.len() != n {
                return Err(LensRateError::schema(format!(
                    "{} weights for {n} systems",
                    w.len()
                )));
            }
        }
        let weight = |i: usize| weights.map_or(1.0, |w| w[i]);
        let c0 = self.normalization.value();

        let (step, step_error) = scaled_mean(
            c0,
            detection
                .hits
                .iter()
                .enumerate()
                .map(|(i, &h)| if h { weight(i) } else { 0.0 }),
            n,
        );
        let (pdet, pdet_error) = scaled_mean(
            c0,
            detection.pdet.iter().enumerate().map(|(i, &p)| p * weight(i)),
            n,
        );

        let estimate = RateEstimate {
            step,
            pdet,
            step_error,
            pdet_error,
            samples: n,
            detected: detection.hit_count(),
        };
        info!(
            "rate: {:.4e} (step) {:.4e} (pdet) per year from {}/{n} detected",
            estimate.step, estimate.pdet, estimate.detected
        );
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn detection(hits: usize, total: usize, pdet: f64) -> Detection {
        Detection {
            hits: (0..total).map(|i| i < hits).collect(),
            pdet: vec![pdet; total],
        }
    }

    #[test]
    fn test_step_and_pdet_rates() {
        let estimator = RateEstimator::new(NormalizationConstant::new(2.0).unwrap());
        let rate = estimator.estimate(&detection(3, 10, 0.4), None).unwrap();
        assert_relative_eq!(rate.step, 0.6, max_relative = 1e-12);
        assert_relative_eq!(rate.pdet, 0.8, max_relative = 1e-12);
        assert!(rate.pdet_error < 1e-12);
        assert!(rate.step_error > 0.0);
        assert_eq!(rate.detected, 3);
    }

    #[test]
    fn test_weights_scale_contributions() {
        let estimator = RateEstimator::new(NormalizationConstant::new(1.0).unwrap());
        let det = detection(2, 4, 1.0);
        let rate = estimator
            .estimate(&det, Some(&[0.5, 1.5, 10.0, 10.0]))
            .unwrap();
        assert_relative_eq!(rate.step, 0.5);
        assert_relative_eq!(rate.pdet, 5.5);
    }

    #[test]
    fn test_empty_and_mismatched_inputs() {
        let estimator = RateEstimator::new(NormalizationConstant::new(1.0).unwrap());
        assert!(estimator.estimate(&detection(0, 0, 0.0), None).is_err());
        assert!(estimator.estimate(&detection(1, 2, 0.0), Some(&[1.0])).is_err());
    }

    #[test]
    fn test_comparison_ratio() {
        let estimator = RateEstimator::new(NormalizationConstant::new(1.0).unwrap());
        let unlensed = estimator.estimate(&detection(5, 10, 0.5), None).unwrap();
        let lensed = estimator.estimate(&detection(1, 10, 0.1), None).unwrap();
        let cmp = RateComparison::new(unlensed, lensed);
        assert_relative_eq!(cmp.ratio_step, 5.0, max_relative = 1e-12);
        assert_relative_eq!(cmp.ratio_pdet, 5.0, max_relative = 1e-12);
    }
}

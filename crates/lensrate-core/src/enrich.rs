//! Enrichment collaborators applied to each accumulator round.
//!
//! Lens-equation solving and SNR evaluation are external, blocking and
//! possibly internally parallel. The core only sees these two traits.

use serde::{Deserialize, Serialize};

use crate::batch::RecordBatch;
use crate::error::{LensRateError, Result};

/// Inclusive bounds on the number of images a lensed system must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCountBounds {
    pub min: usize,
    pub max: usize,
}

impl ImageCountBounds {
    pub fn new(min: usize, max: usize) -> Result<Self> {
        if min == 0 || min > max {
            return Err(LensRateError::InvalidConfig(format!(
                "image count bounds [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, n: usize) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

impl Default for ImageCountBounds {
    /// Multiply-imaged systems with up to four images.
    fn default() -> Self {
        Self { min: 2, max: 4 }
    }
}

/// Solves the lens equation for every system of a batch.
///
/// Returns the input fields plus per-image fields (magnifications, time
/// delays, image types). Systems whose image count falls outside `bounds` may
/// be dropped, so the result can be shorter than the input.
pub trait ImageSolver: Send + Sync {
    fn solve(&self, batch: RecordBatch, bounds: ImageCountBounds) -> Result<RecordBatch>;
}

/// Adds detection-statistic fields to a batch without changing its length.
pub trait SnrCalculator: Send + Sync {
    fn evaluate(&self, batch: RecordBatch) -> Result<RecordBatch>;
}

/// Run the optional image solver, then the optional SNR calculator.
pub fn enrich(
    batch: RecordBatch,
    solver: Option<&dyn ImageSolver>,
    snr: Option<&dyn SnrCalculator>,
    bounds: ImageCountBounds,
) -> Result<RecordBatch> {
    let batch = match solver {
        Some(solver) => solver.solve(batch, bounds)?,
        None => batch,
    };
    match snr {
        Some(snr) => {
            let rows = batch.len();
            let out = snr.evaluate(batch)?;
            if out.len() != rows {
                return Err(LensRateError::schema(format!(
                    "snr calculator returned {} rows for {rows}",
                    out.len()
                )));
            }
            Ok(out)
        }
        None => Ok(batch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropFirst;

    impl ImageSolver for DropFirst {
        fn solve(&self, batch: RecordBatch, _bounds: ImageCountBounds) -> Result<RecordBatch> {
            let mask: Vec<bool> = (0..batch.len()).map(|i| i > 0).collect();
            batch.filter(&mask)
        }
    }

    struct ConstantSnr(f64);

    impl SnrCalculator for ConstantSnr {
        fn evaluate(&self, batch: RecordBatch) -> Result<RecordBatch> {
            let n = batch.len();
            batch.with_column("snr", vec![self.0; n])
        }
    }

    struct Truncating;

    impl SnrCalculator for Truncating {
        fn evaluate(&self, batch: RecordBatch) -> Result<RecordBatch> {
            batch.trim(0)
        }
    }

    #[test]
    fn test_bounds_validation() {
        assert!(ImageCountBounds::new(0, 4).is_err());
        assert!(ImageCountBounds::new(3, 2).is_err());
        let b = ImageCountBounds::new(2, 4).unwrap();
        assert!(b.contains(2) && b.contains(4) && !b.contains(5));
    }

    #[test]
    fn test_enrich_order() {
        let batch = RecordBatch::from_columns([("zs", vec![1.0, 2.0, 3.0])]).unwrap();
        let out = enrich(
            batch,
            Some(&DropFirst),
            Some(&ConstantSnr(9.0)),
            ImageCountBounds::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.scalar("snr").unwrap().to_vec(), vec![9.0, 9.0]);
    }

    #[test]
    fn test_snr_calculator_must_keep_rows() {
        let batch = RecordBatch::from_columns([("zs", vec![1.0])]).unwrap();
        assert!(enrich(batch, None, Some(&Truncating), ImageCountBounds::default()).is_err());
    }
}

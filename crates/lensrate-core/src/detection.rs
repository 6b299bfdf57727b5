//! Ranked multi-threshold detection.
//!
//! A [`SelectionSpec`] lists `(threshold, images)` requirements. Requirements
//! are ranked by descending threshold and each system's image signals by
//! descending value; the strictest requirement consumes the loudest images.
//! A system is detected only if every consumed image exceeds the threshold of
//! the requirement that consumed it.
//!
//! Missing images carry NaN. They rank after every real signal, never pass a
//! threshold and enter the detection probability as a zero signal.

use std::cmp::Ordering;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::batch::{AcceptanceMask, Column, RecordBatch};
use crate::error::{LensRateError, Result};
use crate::fields;

/// `images` images must each exceed `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRequirement {
    pub threshold: f64,
    pub images: usize,
}

/// Ordered list of requirements, strictest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, usize)>", into = "Vec<(f64, usize)>")]
pub struct SelectionSpec {
    requirements: Vec<ThresholdRequirement>,
}

impl SelectionSpec {
    /// Validate and sort `(threshold, images)` pairs by descending threshold.
    /// Equal thresholds keep their given order.
    pub fn new(pairs: impl IntoIterator<Item = (f64, usize)>) -> Result<Self> {
        let mut requirements: Vec<ThresholdRequirement> = pairs
            .into_iter()
            .map(|(threshold, images)| ThresholdRequirement { threshold, images })
            .collect();
        if requirements.is_empty() {
            return Err(LensRateError::InvalidSelection(
                "at least one threshold requirement is needed".into(),
            ));
        }
        for r in &requirements {
            if !r.threshold.is_finite() {
                return Err(LensRateError::InvalidSelection(format!(
                    "threshold {} is not finite",
                    r.threshold
                )));
            }
            if r.images == 0 {
                return Err(LensRateError::InvalidSelection(format!(
                    "threshold {} requires zero images",
                    r.threshold
                )));
            }
        }
        requirements.sort_by(|a, b| b.threshold.total_cmp(&a.threshold));
        Ok(Self { requirements })
    }

    /// One image above `threshold`: the unlensed selection.
    pub fn single(threshold: f64) -> Result<Self> {
        Self::new([(threshold, 1)])
    }

    pub fn requirements(&self) -> &[ThresholdRequirement] {
        &self.requirements
    }

    /// Images consumed by the whole spec.
    pub fn total_images(&self) -> usize {
        self.requirements.iter().map(|r| r.images).sum()
    }

    /// Strictest threshold.
    pub fn max_threshold(&self) -> f64 {
        self.requirements[0].threshold
    }
}

impl TryFrom<Vec<(f64, usize)>> for SelectionSpec {
    type Error = LensRateError;

    fn try_from(pairs: Vec<(f64, usize)>) -> Result<Self> {
        Self::new(pairs)
    }
}

impl From<SelectionSpec> for Vec<(f64, usize)> {
    fn from(spec: SelectionSpec) -> Self {
        spec.requirements
            .into_iter()
            .map(|r| (r.threshold, r.images))
            .collect()
    }
}

/// Which image columns of a per-image signal field take part in selection.
///
/// Image solvers order images by type: columns 0–1 hold type-I (minimum)
/// images and columns 2–3 type-II (saddle) images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageTypeWindow {
    #[default]
    Any,
    TypeI,
    TypeII,
}

impl ImageTypeWindow {
    fn columns(&self, width: usize) -> Result<std::ops::Range<usize>> {
        let range = match self {
            Self::Any => 0..width,
            Self::TypeI => 0..2,
            Self::TypeII => 2..4,
        };
        if range.end > width {
            return Err(LensRateError::InvalidSelection(format!(
                "{self:?} images need {} columns, signal field has {width}",
                range.end
            )));
        }
        Ok(range)
    }
}

/// What happens to NaN values in a selected detectable batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    #[default]
    Keep,
    Zero,
}

/// Per-system outcome of a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub hits: AcceptanceMask,
    /// Joint detection probability `Π Φ(signal − threshold)`.
    pub pdet: Vec<f64>,
}

impl Detection {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.iter().filter(|&&h| h).count()
    }
}

/// Standard normal CDF.
pub fn std_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Descending with NaN last.
fn rank_desc(a: &f64, b: &f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(a),
    }
}

/// Applies a [`SelectionSpec`] to signal fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSelector {
    spec: SelectionSpec,
    window: ImageTypeWindow,
}

impl DetectionSelector {
    pub fn new(spec: SelectionSpec) -> Self {
        Self {
            spec,
            window: ImageTypeWindow::Any,
        }
    }

    pub fn with_window(mut self, window: ImageTypeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn spec(&self) -> &SelectionSpec {
        &self.spec
    }

    /// Evaluate a `systems × images` signal matrix.
    pub fn evaluate_signals(&self, signals: ArrayView2<'_, f64>) -> Result<Detection> {
        let columns = self.window.columns(signals.ncols())?;
        let width = columns.len();
        if self.spec.total_images() > width {
            return Err(LensRateError::InvalidSelection(format!(
                "selection needs {} images, only {width} signal columns",
                self.spec.total_images()
            )));
        }

        let mut hits = Vec::with_capacity(signals.nrows());
        let mut pdet = Vec::with_capacity(signals.nrows());
        let mut ranked = Vec::with_capacity(width);
        for row in signals.axis_iter(Axis(0)) {
            ranked.clear();
            ranked.extend(row.iter().skip(columns.start).take(width).copied());
            ranked.sort_by(rank_desc);

            let mut hit = true;
            let mut p = 1.0;
            let mut consumed = ranked.iter();
            for req in self.spec.requirements() {
                for &signal in consumed.by_ref().take(req.images) {
                    hit &= signal > req.threshold;
                    let s = if signal.is_nan() { 0.0 } else { signal };
                    p *= std_normal_cdf(s - req.threshold);
                }
            }
            hits.push(hit);
            pdet.push(p);
        }
        Ok(Detection { hits, pdet })
    }

    /// Evaluate the signal field `field` of `batch`. A per-system field is a
    /// single image column.
    pub fn evaluate(&self, batch: &RecordBatch, field: &str) -> Result<Detection> {
        match batch.get(field) {
            Some(Column::Matrix(m)) => self.evaluate_signals(m.view()),
            Some(Column::Scalar(a)) => {
                let m: Array2<f64> = a.clone().insert_axis(Axis(1));
                self.evaluate_signals(m.view())
            }
            None => Err(LensRateError::schema(format!("missing signal field '{field}'"))),
        }
    }

    /// Detected rows of `batch` with their detection probability stored in
    /// [`fields::PDET_NET`].
    pub fn select(
        &self,
        batch: &RecordBatch,
        field: &str,
        policy: MissingValuePolicy,
    ) -> Result<RecordBatch> {
        let detection = self.evaluate(batch, field)?;
        let mut selected = batch.clone();
        selected.insert(fields::PDET_NET, detection.pdet)?;
        let selected = selected.filter(&detection.hits)?;
        Ok(match policy {
            MissingValuePolicy::Keep => selected,
            MissingValuePolicy::Zero => selected.nan_to_zero(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn signals() -> Array2<f64> {
        array![[10.0, 7.0], [9.0, 2.0], [3.0, 1.0]]
    }

    #[test]
    fn test_single_threshold() {
        let selector = DetectionSelector::new(SelectionSpec::new([(8.0, 1)]).unwrap());
        let det = selector.evaluate_signals(signals().view()).unwrap();
        assert_eq!(det.hits, vec![true, true, false]);
    }

    #[test]
    fn test_two_thresholds() {
        let selector = DetectionSelector::new(SelectionSpec::new([(8.0, 1), (5.0, 1)]).unwrap());
        let det = selector.evaluate_signals(signals().view()).unwrap();
        assert_eq!(det.hits, vec![true, false, false]);
    }

    #[test]
    fn test_requirement_order_is_irrelevant() {
        let a = DetectionSelector::new(SelectionSpec::new([(5.0, 1), (8.0, 1)]).unwrap());
        let b = DetectionSelector::new(SelectionSpec::new([(8.0, 1), (5.0, 1)]).unwrap());
        assert_eq!(
            a.evaluate_signals(signals().view()).unwrap(),
            b.evaluate_signals(signals().view()).unwrap()
        );
    }

    #[test]
    fn test_image_order_is_irrelevant() {
        let selector = DetectionSelector::new(SelectionSpec::new([(8.0, 1), (5.0, 1)]).unwrap());
        let swapped = array![[7.0, 10.0]];
        assert_eq!(selector.evaluate_signals(swapped.view()).unwrap().hits, vec![true]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let selector = DetectionSelector::new(SelectionSpec::single(8.0).unwrap());
        let det = selector.evaluate_signals(array![[8.0]].view()).unwrap();
        assert_eq!(det.hits, vec![false]);
        assert_relative_eq!(det.pdet[0], 0.5);
    }

    #[test]
    fn test_pdet_product() {
        let selector = DetectionSelector::new(SelectionSpec::new([(8.0, 1), (5.0, 1)]).unwrap());
        let det = selector.evaluate_signals(array![[9.0, 5.0]].view()).unwrap();
        assert_relative_eq!(det.pdet[0], std_normal_cdf(1.0) * 0.5, max_relative = 1e-12);
        assert_relative_eq!(std_normal_cdf(1.0), 0.841_344_746, max_relative = 1e-8);
    }

    #[test]
    fn test_nan_ranks_last_and_fails() {
        let selector = DetectionSelector::new(SelectionSpec::new([(8.0, 1), (5.0, 1)]).unwrap());
        let det = selector
            .evaluate_signals(array![[f64::NAN, 9.0, 6.0], [9.0, f64::NAN, f64::NAN]].view())
            .unwrap();
        assert_eq!(det.hits, vec![true, false]);
        assert_relative_eq!(
            det.pdet[1],
            std_normal_cdf(1.0) * std_normal_cdf(-5.0),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_too_many_images_requested() {
        let selector = DetectionSelector::new(SelectionSpec::new([(8.0, 3)]).unwrap());
        let err = selector.evaluate_signals(signals().view()).unwrap_err();
        assert!(matches!(err, LensRateError::InvalidSelection(_)));
    }

    #[test]
    fn test_invalid_specs() {
        assert!(SelectionSpec::new(Vec::<(f64, usize)>::new()).is_err());
        assert!(SelectionSpec::new([(8.0, 0)]).is_err());
        assert!(SelectionSpec::new([(f64::NAN, 1)]).is_err());
    }

    #[test]
    fn test_image_type_window() {
        let m = array![[1.0, 2.0, 20.0, 30.0]];
        let spec = SelectionSpec::new([(10.0, 2)]).unwrap();
        let type_i = DetectionSelector::new(spec.clone()).with_window(ImageTypeWindow::TypeI);
        let type_ii = DetectionSelector::new(spec).with_window(ImageTypeWindow::TypeII);
        assert_eq!(type_i.evaluate_signals(m.view()).unwrap().hits, vec![false]);
        assert_eq!(type_ii.evaluate_signals(m.view()).unwrap().hits, vec![true]);
        assert!(type_ii.evaluate_signals(array![[1.0, 2.0]].view()).is_err());
    }

    #[test]
    fn test_scalar_field_is_single_image() {
        let batch = RecordBatch::from_columns([(fields::SNR_NET, vec![9.0, 7.0, 12.0])]).unwrap();
        let selector = DetectionSelector::new(SelectionSpec::single(8.0).unwrap());
        let det = selector.evaluate(&batch, fields::SNR_NET).unwrap();
        assert_eq!(det.hits, vec![true, false, true]);
        assert_eq!(det.hit_count(), 2);
    }

    #[test]
    fn test_select_writes_pdet_and_applies_policy() {
        let batch = RecordBatch::from_columns([(fields::SNR_NET, array![[10.0, f64::NAN], [1.0, 1.0]])])
            .unwrap()
            .with_column(fields::ZS, vec![1.0, 2.0])
            .unwrap();
        let selector = DetectionSelector::new(SelectionSpec::single(8.0).unwrap());
        let kept = selector
            .select(&batch, fields::SNR_NET, MissingValuePolicy::Keep)
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept.matrix(fields::SNR_NET).unwrap()[[0, 1]].is_nan());
        assert!(kept.has_field(fields::PDET_NET));
        let zeroed = selector
            .select(&batch, fields::SNR_NET, MissingValuePolicy::Zero)
            .unwrap();
        assert_eq!(zeroed.matrix(fields::SNR_NET).unwrap()[[0, 1]], 0.0);
    }

    #[test]
    fn test_spec_serde_as_pairs() {
        let spec: SelectionSpec = serde_json::from_str("[[5.0, 1], [8.0, 1]]").unwrap();
        assert_eq!(spec.max_threshold(), 8.0);
        assert!(serde_json::from_str::<SelectionSpec>("[]").is_err());
    }
}

//! Columnar record store shared by every sampling stage.
//!
//! A [`RecordBatch`] maps field names to parallel arrays of equal row count.
//! Per-system values live in [`Column::Scalar`]; per-system-per-image values
//! (SNRs, magnifications, time delays) live in [`Column::Matrix`] with one row
//! per system.
//!
//! `concat`, `filter` and `trim` never mutate their inputs. Every field is
//! filtered with the same row selection, so row `i` of one field always
//! describes the same system as row `i` of every other field.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis, s};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{LensRateError, Result};

/// Boolean row selector, one entry per row of the batch it was computed from.
pub type AcceptanceMask = Vec<bool>;

/// A single named field of a [`RecordBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per system.
    Scalar(Array1<f64>),
    /// One fixed-width row per system.
    Matrix(Array2<f64>),
}

impl Column {
    /// Number of systems (rows) in this column.
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(a) => a.len(),
            Self::Matrix(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row width: `None` for scalar columns.
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) => None,
            Self::Matrix(m) => Some(m.ncols()),
        }
    }

    fn concat(&self, other: &Column, name: &str) -> Result<Column> {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => {
                let joined = ndarray::concatenate(Axis(0), &[a.view(), b.view()])
                    .map_err(|e| LensRateError::schema(format!("field '{name}': {e}")))?;
                Ok(Self::Scalar(joined))
            }
            (Self::Matrix(a), Self::Matrix(b)) => {
                if a.ncols() != b.ncols() {
                    return Err(LensRateError::schema(format!(
                        "field '{name}' has width {} vs {}",
                        a.ncols(),
                        b.ncols()
                    )));
                }
                let joined = ndarray::concatenate(Axis(0), &[a.view(), b.view()])
                    .map_err(|e| LensRateError::schema(format!("field '{name}': {e}")))?;
                Ok(Self::Matrix(joined))
            }
            _ => Err(LensRateError::schema(format!(
                "field '{name}' is scalar in one batch and per-image in the other"
            ))),
        }
    }

    fn select_rows(&self, rows: &[usize]) -> Column {
        match self {
            Self::Scalar(a) => Self::Scalar(a.select(Axis(0), rows)),
            Self::Matrix(m) => Self::Matrix(m.select(Axis(0), rows)),
        }
    }

    fn head(&self, n: usize) -> Column {
        match self {
            Self::Scalar(a) => Self::Scalar(a.slice(s![..n]).to_owned()),
            Self::Matrix(m) => Self::Matrix(m.slice(s![..n, ..]).to_owned()),
        }
    }

    fn nan_to_zero(&self) -> Column {
        let fix = |x: f64| if x.is_nan() { 0.0 } else { x };
        match self {
            Self::Scalar(a) => Self::Scalar(a.mapv(fix)),
            Self::Matrix(m) => Self::Matrix(m.mapv(fix)),
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Self::Scalar(Array1::from(values))
    }
}

impl From<Array1<f64>> for Column {
    fn from(values: Array1<f64>) -> Self {
        Self::Scalar(values)
    }
}

impl From<Array2<f64>> for Column {
    fn from(values: Array2<f64>) -> Self {
        Self::Matrix(values)
    }
}

/// Named parallel arrays of identical row count.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, RawColumn>")]
pub struct RecordBatch {
    columns: BTreeMap<String, Column>,
    rows: usize,
}

impl RecordBatch {
    /// Empty batch with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from `(name, column)` pairs, checking row counts.
    pub fn from_columns<I, N, C>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<Column>,
    {
        let mut batch = Self::new();
        for (name, column) in columns {
            batch.insert(name, column)?;
        }
        Ok(batch)
    }

    /// Number of systems.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Typed lookup of a per-system field.
    pub fn scalar(&self, name: &str) -> Result<&Array1<f64>> {
        match self.columns.get(name) {
            Some(Column::Scalar(a)) => Ok(a),
            Some(Column::Matrix(_)) => Err(LensRateError::schema(format!(
                "field '{name}' is per-image, expected per-system"
            ))),
            None => Err(LensRateError::schema(format!("missing field '{name}'"))),
        }
    }

    /// Typed lookup of a per-image field.
    pub fn matrix(&self, name: &str) -> Result<&Array2<f64>> {
        match self.columns.get(name) {
            Some(Column::Matrix(m)) => Ok(m),
            Some(Column::Scalar(_)) => Err(LensRateError::schema(format!(
                "field '{name}' is per-system, expected per-image"
            ))),
            None => Err(LensRateError::schema(format!("missing field '{name}'"))),
        }
    }

    /// Column window `range` of the per-image field `name`.
    pub fn select_columns(&self, name: &str, range: std::ops::Range<usize>) -> Result<Array2<f64>> {
        let m = self.matrix(name)?;
        if range.start > range.end || range.end > m.ncols() {
            return Err(LensRateError::schema(format!(
                "columns {range:?} out of bounds for field '{name}' of width {}",
                m.ncols()
            )));
        }
        Ok(m.slice(s![.., range]).to_owned())
    }

    /// Add or replace a field. The first field of an empty batch fixes the
    /// row count.
    pub fn insert(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        let replacing_only_field = self.columns.len() == 1 && self.columns.contains_key(&name);
        if self.columns.is_empty() || replacing_only_field {
            self.rows = column.len();
        } else if column.len() != self.rows {
            return Err(LensRateError::schema(format!(
                "field '{name}' has {} rows, batch has {}",
                column.len(),
                self.rows
            )));
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Builder form of [`RecordBatch::insert`].
    pub fn with_column(mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<Self> {
        self.insert(name, column)?;
        Ok(self)
    }

    /// Remove a field, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let removed = self.columns.remove(name);
        if self.columns.is_empty() {
            self.rows = 0;
        }
        removed
    }

    /// Copy every field of `other` into `self`, overwriting shared names.
    pub fn merge(&mut self, other: RecordBatch) -> Result<()> {
        if !self.columns.is_empty() && !other.columns.is_empty() && other.rows != self.rows {
            return Err(LensRateError::schema(format!(
                "cannot merge {} rows into a batch of {}",
                other.rows, self.rows
            )));
        }
        if self.columns.is_empty() {
            self.rows = other.rows;
        }
        self.columns.extend(other.columns);
        Ok(())
    }

    fn check_same_fields(&self, other: &RecordBatch) -> Result<()> {
        if self.columns.len() != other.columns.len()
            || !self.columns.keys().all(|k| other.columns.contains_key(k))
        {
            let left: Vec<_> = self.field_names().collect();
            let right: Vec<_> = other.field_names().collect();
            return Err(LensRateError::schema(format!(
                "field sets differ: {left:?} vs {right:?}"
            )));
        }
        Ok(())
    }

    /// Rows of `self` followed by rows of `other`.
    pub fn concat(&self, other: &RecordBatch) -> Result<RecordBatch> {
        self.check_same_fields(other)?;
        let mut columns = BTreeMap::new();
        for (name, column) in &self.columns {
            let joined = column.concat(&other.columns[name], name)?;
            columns.insert(name.clone(), joined);
        }
        Ok(RecordBatch {
            columns,
            rows: self.rows + other.rows,
        })
    }

    /// Rows where `mask` is true, relative order preserved.
    pub fn filter(&self, mask: &[bool]) -> Result<RecordBatch> {
        if mask.len() != self.rows {
            return Err(LensRateError::schema(format!(
                "mask has {} entries, batch has {} rows",
                mask.len(),
                self.rows
            )));
        }
        let kept: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&kept))
    }

    /// First `n` rows of every field.
    pub fn trim(&self, n: usize) -> Result<RecordBatch> {
        if n > self.rows {
            return Err(LensRateError::schema(format!(
                "cannot trim {} rows to {n}",
                self.rows
            )));
        }
        if n == self.rows {
            return Ok(self.clone());
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.head(n)))
            .collect();
        Ok(RecordBatch { columns, rows: n })
    }

    fn take_rows(&self, rows: &[usize]) -> RecordBatch {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.select_rows(rows)))
            .collect();
        RecordBatch {
            columns,
            rows: rows.len(),
        }
    }

    /// Copy with every NaN replaced by zero.
    pub fn nan_to_zero(&self) -> RecordBatch {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.nan_to_zero()))
            .collect();
        RecordBatch {
            columns,
            rows: self.rows,
        }
    }
}

/// Concatenate an optional accumulator with a fresh round.
pub(crate) fn append(acc: Option<RecordBatch>, round: RecordBatch) -> Result<RecordBatch> {
    match acc {
        Some(acc) => acc.concat(&round),
        None => Ok(round),
    }
}

// ---------------------------------------------------------------------------
// Serialization: scalar fields as JSON arrays, per-image fields as
// `{"shape": [rows, width], "data": [...]}` in row-major order, NaN as null.
// ---------------------------------------------------------------------------

impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(a) => serializer.collect_seq(a.iter()),
            Self::Matrix(m) => RawMatrix {
                shape: [m.nrows(), m.ncols()],
                data: m.iter().map(|v| (!v.is_nan()).then_some(*v)).collect(),
            }
            .serialize(serializer),
        }
    }
}

impl Serialize for RecordBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.columns.iter())
    }
}

/// Wire form of a column as read from JSON.
#[doc(hidden)]
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RawColumn {
    Scalar(Vec<Option<f64>>),
    Matrix(RawMatrix),
}

/// Wire form of a per-image field.
#[doc(hidden)]
#[derive(Serialize, Deserialize)]
pub struct RawMatrix {
    shape: [usize; 2],
    data: Vec<Option<f64>>,
}

impl TryFrom<RawColumn> for Column {
    type Error = LensRateError;

    fn try_from(raw: RawColumn) -> Result<Self> {
        let unpack = |v: Option<f64>| v.unwrap_or(f64::NAN);
        match raw {
            RawColumn::Scalar(values) => Ok(Column::Scalar(values.into_iter().map(unpack).collect())),
            RawColumn::Matrix(RawMatrix { shape: [n, width], data }) => {
                let flat: Vec<f64> = data.into_iter().map(unpack).collect();
                let matrix = Array2::from_shape_vec((n, width), flat)
                    .map_err(|e| LensRateError::schema(format!("per-image field {n}x{width}: {e}")))?;
                Ok(Column::Matrix(matrix))
            }
        }
    }
}

impl TryFrom<BTreeMap<String, RawColumn>> for RecordBatch {
    type Error = LensRateError;

    fn try_from(raw: BTreeMap<String, RawColumn>) -> Result<Self> {
        let mut batch = RecordBatch::new();
        for (name, column) in raw {
            batch.insert(name, Column::try_from(column)?)?;
        }
        Ok(batch)
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Result, SelectionError};

/// Suffix of the per-variable weight key in the flat observation layout.
pub const WEIGHTS_SUFFIX: &str = "_weights";

/// Key of the default weight sequence in the flat observation layout.
pub const DEFAULT_WEIGHTS_KEY: &str = "weights";

// ---------------------------------------------------------------------------
// Column – one named column of an event table
// ---------------------------------------------------------------------------

/// A single column as read from a columnar file.
///
/// Flags are stored as scalars holding `1.0` / `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per event.
    Scalar(Vec<f64>),
    /// A variable-length list per event (one entry per reconstructed object).
    Jagged(Vec<Vec<f64>>),
}

impl Column {
    /// Number of events (rows) in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Jagged(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_scalar(&self) -> Option<&[f64]> {
        match self {
            Column::Scalar(v) => Some(v),
            Column::Jagged(_) => None,
        }
    }

    pub fn as_jagged(&self) -> Option<&[Vec<f64>]> {
        match self {
            Column::Jagged(v) => Some(v),
            Column::Scalar(_) => None,
        }
    }

    /// Append the rows of `other` (a later record batch of the same column).
    /// Returns `false` when the two halves disagree on the column kind.
    pub(crate) fn append(&mut self, other: Column) -> bool {
        match (self, other) {
            (Column::Scalar(a), Column::Scalar(b)) => {
                a.extend(b);
                true
            }
            (Column::Jagged(a), Column::Jagged(b)) => {
                a.extend(b);
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// EventTable – the requested columns of one opened file
// ---------------------------------------------------------------------------

/// The columns read from one source file. Every column has `n_rows` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    source: PathBuf,
    n_rows: usize,
    columns: BTreeMap<String, Column>,
}

impl EventTable {
    /// Build a table, checking that every column has the same number of rows.
    pub fn from_columns<S, I>(source: impl Into<PathBuf>, columns: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Column)>,
    {
        let source = source.into();
        let columns: BTreeMap<String, Column> =
            columns.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let mut n_rows = None;
        for (name, column) in &columns {
            match n_rows {
                None => n_rows = Some(column.len()),
                Some(n) if n != column.len() => {
                    return Err(SelectionError::file_access(
                        &source,
                        format!("column '{name}' has {} rows, expected {n}", column.len()),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(EventTable {
            source,
            n_rows: n_rows.unwrap_or(0),
            columns,
        })
    }

    /// Path (or URI) of the file this table was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// A scalar column that must be present.
    pub fn scalar(&self, name: &str) -> Result<&[f64]> {
        match self.columns.get(name) {
            Some(Column::Scalar(v)) => Ok(v),
            Some(Column::Jagged(_)) => Err(SelectionError::file_access(
                &self.source,
                format!("column '{name}' is a list column, expected one value per event"),
            )),
            None => Err(SelectionError::file_access(
                &self.source,
                format!("missing column '{name}'"),
            )),
        }
    }

    /// A list column that must be present.
    pub fn jagged(&self, name: &str) -> Result<&[Vec<f64>]> {
        match self.columns.get(name) {
            Some(Column::Jagged(v)) => Ok(v),
            Some(Column::Scalar(_)) => Err(SelectionError::file_access(
                &self.source,
                format!("column '{name}' holds one value per event, expected a list column"),
            )),
            None => Err(SelectionError::file_access(
                &self.source,
                format!("missing column '{name}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// WeightedSeries – values of one variable with their weights
// ---------------------------------------------------------------------------

/// The flat values of one variable and a weight for each of them.
/// Both vectors always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedSeries {
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl WeightedSeries {
    pub fn push(&mut self, value: f64, weight: f64) {
        self.values.push(value);
        self.weights.push(weight);
    }

    pub fn extend_from(&mut self, other: &WeightedSeries) {
        self.values.extend_from_slice(&other.values);
        self.weights.extend_from_slice(&other.weights);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of the weights: the weighted count of observations.
    pub fn weighted_sum(&self) -> f64 {
        self.weights.iter().sum()
    }
}

// ---------------------------------------------------------------------------
// ObservationSet – per (region, file) extraction output
// ---------------------------------------------------------------------------

/// Flat per-observation values and weights of every extracted variable for
/// one (region, file) pair.
///
/// The default weight sequence (the [`DEFAULT_WEIGHTS_KEY`] key) is the weight
/// sequence of the primary variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    primary: String,
    series: BTreeMap<String, WeightedSeries>,
}

impl ObservationSet {
    pub fn new(primary: impl Into<String>) -> Self {
        ObservationSet {
            primary: primary.into(),
            series: BTreeMap::new(),
        }
    }

    /// Name of the variable whose weights double as the default weights.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Record one observation of `variable`.
    pub fn push(&mut self, variable: &str, value: f64, weight: f64) {
        if let Some(series) = self.series.get_mut(variable) {
            series.push(value, weight);
        } else {
            let mut series = WeightedSeries::default();
            series.push(value, weight);
            self.series.insert(variable.to_string(), series);
        }
    }

    /// Make sure `variable` has an entry even when it received no observations.
    pub(crate) fn declare(&mut self, variable: &str) {
        self.series.entry(variable.to_string()).or_default();
    }

    pub fn series(&self, variable: &str) -> Option<&WeightedSeries> {
        self.series.get(variable)
    }

    pub fn values(&self, variable: &str) -> Option<&[f64]> {
        self.series.get(variable).map(WeightedSeries::values)
    }

    pub fn weights_of(&self, variable: &str) -> Option<&[f64]> {
        self.series.get(variable).map(WeightedSeries::weights)
    }

    /// The default weight sequence.
    pub fn weights(&self) -> &[f64] {
        self.weights_of(&self.primary).unwrap_or(&[])
    }

    /// Look up an array by its flat key: a variable name, `{variable}_weights`,
    /// or `weights`.
    pub fn get(&self, key: &str) -> Option<&[f64]> {
        if key == DEFAULT_WEIGHTS_KEY {
            return self.series.get(&self.primary).map(WeightedSeries::weights);
        }
        if let Some(series) = self.series.get(key) {
            return Some(series.values());
        }
        key.strip_suffix(WEIGHTS_SUFFIX)
            .and_then(|variable| self.weights_of(variable))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Number of observations of the primary variable.
    pub fn len(&self) -> usize {
        self.series.get(&self.primary).map_or(0, WeightedSeries::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weighted yield of `variable`, i.e. the sum of its weights.
    pub fn yield_of(&self, variable: &str) -> Option<f64> {
        self.series.get(variable).map(WeightedSeries::weighted_sum)
    }

    /// Concatenate `other` after this set, variable by variable.
    pub fn append(&mut self, other: &ObservationSet) {
        for (variable, series) in &other.series {
            self.series
                .entry(variable.clone())
                .or_default()
                .extend_from(series);
        }
    }
}

impl Serialize for ObservationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.series.len() * 2 + 1))?;
        for (variable, series) in &self.series {
            map.serialize_entry(variable, series.values())?;
            map.serialize_entry(&format!("{variable}{WEIGHTS_SUFFIX}"), series.weights())?;
        }
        map.serialize_entry(DEFAULT_WEIGHTS_KEY, self.weights())?;
        map.end()
    }
}

// ---------------------------------------------------------------------------
// PooledObservationSet – one region across all files
// ---------------------------------------------------------------------------

/// All per-file observation sets of one region, concatenated in file order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PooledObservationSet {
    contributing_files: usize,
    #[serde(flatten)]
    observations: ObservationSet,
}

impl PooledObservationSet {
    /// Start a pool from the first contributing file.
    pub fn from_first(first: &ObservationSet) -> Self {
        PooledObservationSet {
            contributing_files: 1,
            observations: first.clone(),
        }
    }

    /// Append one more file's contribution.
    pub fn append(&mut self, next: &ObservationSet) {
        self.observations.append(next);
        self.contributing_files += 1;
    }

    pub fn contributing_files(&self) -> usize {
        self.contributing_files
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn values(&self, variable: &str) -> Option<&[f64]> {
        self.observations.values(variable)
    }

    pub fn weights_of(&self, variable: &str) -> Option<&[f64]> {
        self.observations.weights_of(variable)
    }

    pub fn weights(&self) -> &[f64] {
        self.observations.weights()
    }

    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.observations.get(key)
    }

    pub fn yield_of(&self, variable: &str) -> Option<f64> {
        self.observations.yield_of(variable)
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use super::model::{Column, EventTable};
use crate::error::{Result, SelectionError};

/// Flag whose column may be missing and rebuilt from per-trigger columns.
pub const TRIGGER_OR_FLAG: &str = "hlt_flags";

/// Per-trigger columns OR-ed together when [`TRIGGER_OR_FLAG`] is absent.
pub const TRIGGER_OR_COLUMNS: &[&str] = &[
    "Trigger_PFMET120_PFMHT120_IDTight",
    "Trigger_PFMETNoMu120_PFMHTNoMu120_IDTight",
    "Trigger_PFMET120_PFMHT120_IDTight_PFHT60",
    "Trigger_PFMETNoMu120_PFMHTNoMu120_IDTight_PFHT60",
];

// ---------------------------------------------------------------------------
// CompareOp
// ---------------------------------------------------------------------------

/// Comparison operator shared by baseline cuts and custom-cut expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    /// Two-character operators come first so that prefix matching is greedy.
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Le,
        CompareOp::Ge,
        CompareOp::Lt,
        CompareOp::Gt,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// `lhs OP rhs`. Any comparison with NaN except `!=` is false.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------------
// ScalarCut / FlagFallback
// ---------------------------------------------------------------------------

/// `column OP threshold`, applied to a one-value-per-event column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarCut {
    pub column: String,
    pub op: CompareOp,
    pub threshold: f64,
}

impl ScalarCut {
    pub fn new(column: impl Into<String>, op: CompareOp, threshold: f64) -> Self {
        ScalarCut {
            column: column.into(),
            op,
            threshold,
        }
    }
}

impl fmt::Display for ScalarCut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.threshold)
    }
}

/// A required flag that is rebuilt as the OR of other flag columns when its
/// own column is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagFallback {
    pub flag: String,
    pub any_of: Vec<String>,
}

// ---------------------------------------------------------------------------
// SelectionSpec – the region-independent baseline
// ---------------------------------------------------------------------------

/// Baseline selection: every scalar cut AND every required flag `== 1`.
///
/// * A scalar cut whose column is missing fails closed (no event passes).
/// * A required flag whose column is missing is skipped with a warning,
///   unless it has a fallback, in which case the OR of whichever fallback
///   columns exist is used instead. No fallback column at all drops the flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSpec {
    pub scalar_cuts: Vec<ScalarCut>,
    pub required_flags: BTreeSet<String>,
    pub fallbacks: Vec<FlagFallback>,
}

impl Default for SelectionSpec {
    fn default() -> Self {
        SelectionSpec {
            scalar_cuts: vec![
                ScalarCut::new("selCMet", CompareOp::Gt, 150.0),
                ScalarCut::new("evtFillWgt", CompareOp::Lt, 10.0),
            ],
            required_flags: [TRIGGER_OR_FLAG, "Flag_MetFilters"]
                .into_iter()
                .map(String::from)
                .collect(),
            fallbacks: vec![FlagFallback {
                flag: TRIGGER_OR_FLAG.to_string(),
                any_of: TRIGGER_OR_COLUMNS.iter().map(|s| s.to_string()).collect(),
            }],
        }
    }
}

impl SelectionSpec {
    /// Columns the baseline may read, fallback columns included.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut cols: BTreeSet<String> =
            self.scalar_cuts.iter().map(|c| c.column.clone()).collect();
        cols.extend(self.required_flags.iter().cloned());
        for fb in &self.fallbacks {
            cols.extend(fb.any_of.iter().cloned());
        }
        cols
    }

    /// Reject selections no event could ever pass, before any file is opened.
    pub fn validate(&self) -> Result<()> {
        let mut by_column: BTreeMap<&str, Vec<&ScalarCut>> = BTreeMap::new();
        for cut in &self.scalar_cuts {
            if cut.column.is_empty() {
                return Err(SelectionError::configuration("scalar cut with empty column name"));
            }
            if !cut.threshold.is_finite() {
                return Err(SelectionError::configuration(format!(
                    "cut '{cut}' has a non-finite threshold"
                )));
            }
            by_column.entry(cut.column.as_str()).or_default().push(cut);
        }

        for (column, cuts) in by_column {
            check_satisfiable(column, &cuts)?;
        }

        if self.required_flags.iter().any(String::is_empty) {
            return Err(SelectionError::configuration("required flag with empty column name"));
        }
        for fb in &self.fallbacks {
            if fb.any_of.is_empty() {
                return Err(SelectionError::configuration(format!(
                    "fallback for flag '{}' lists no columns",
                    fb.flag
                )));
            }
        }
        Ok(())
    }

    /// Per-event baseline decision, one entry per table row.
    ///
    /// Scalar cuts are applied in declaration order, then flags in name order.
    pub fn baseline_mask(&self, table: &EventTable) -> Vec<bool> {
        let n = table.n_rows();
        let mut mask = vec![true; n];

        for cut in &self.scalar_cuts {
            match table.column(&cut.column) {
                Some(Column::Scalar(values)) => {
                    for (m, &v) in mask.iter_mut().zip(values) {
                        *m &= cut.op.apply(v, cut.threshold);
                    }
                }
                _ => {
                    warn!(
                        "  {}: no usable column for cut '{cut}', rejecting all events",
                        table.source().display()
                    );
                    mask.fill(false);
                }
            }
        }

        for flag in &self.required_flags {
            match table.column(flag) {
                Some(Column::Scalar(values)) => and_flag(&mut mask, values),
                Some(Column::Jagged(_)) => {
                    warn!(
                        "  {}: flag '{flag}' is a list column, skipped",
                        table.source().display()
                    );
                }
                None => match self.fallbacks.iter().find(|fb| &fb.flag == flag) {
                    Some(fallback) => match fallback_mask(table, fallback) {
                        Some(any) => {
                            for (m, a) in mask.iter_mut().zip(any) {
                                *m &= a;
                            }
                        }
                        None => warn!(
                            "  {}: flag '{flag}' and its fallback columns not found, skipped",
                            table.source().display()
                        ),
                    },
                    None => warn!(
                        "  {}: flag '{flag}' not found, skipped",
                        table.source().display()
                    ),
                },
            }
        }

        mask
    }

    /// Human readable baseline, e.g. `selCMet > 150, (hlt_flags == 1)`.
    pub fn describe(&self) -> String {
        self.scalar_cuts
            .iter()
            .map(ToString::to_string)
            .chain(self.required_flags.iter().map(|f| format!("({f} == 1)")))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn and_flag(mask: &mut [bool], values: &[f64]) {
    for (m, &v) in mask.iter_mut().zip(values) {
        *m &= v == 1.0;
    }
}

/// OR of the fallback columns that exist, or `None` when none of them do.
fn fallback_mask(table: &EventTable, fallback: &FlagFallback) -> Option<Vec<bool>> {
    let mut any: Option<Vec<bool>> = None;
    for name in &fallback.any_of {
        if let Some(values) = table.column(name).and_then(Column::as_scalar) {
            let acc = any.get_or_insert_with(|| vec![false; table.n_rows()]);
            for (a, &v) in acc.iter_mut().zip(values) {
                *a |= v == 1.0;
            }
        }
    }
    any
}

/// Check that some value satisfies every cut on one column.
fn check_satisfiable(column: &str, cuts: &[&ScalarCut]) -> Result<()> {
    let mut lo = (f64::NEG_INFINITY, true);
    let mut hi = (f64::INFINITY, true);
    let mut pinned: Option<f64> = None;

    for cut in cuts {
        let t = cut.threshold;
        match cut.op {
            CompareOp::Gt if t >= lo.0 => lo = (t, false),
            CompareOp::Ge if t > lo.0 => lo = (t, true),
            CompareOp::Lt if t <= hi.0 => hi = (t, false),
            CompareOp::Le if t < hi.0 => hi = (t, true),
            CompareOp::Eq => match pinned {
                Some(p) if p != t => {
                    return Err(contradiction(column, cuts));
                }
                _ => pinned = Some(t),
            },
            _ => {}
        }
    }

    let empty = lo.0 > hi.0 || (lo.0 == hi.0 && !(lo.1 && hi.1));
    if empty {
        return Err(contradiction(column, cuts));
    }
    // A closed interval of zero width admits a single value.
    if lo.0 == hi.0 {
        pinned = pinned.or(Some(lo.0));
    }
    if let Some(p) = pinned {
        if !cuts.iter().all(|c| c.op.apply(p, c.threshold)) {
            return Err(contradiction(column, cuts));
        }
    }
    Ok(())
}

fn contradiction(column: &str, cuts: &[&ScalarCut]) -> SelectionError {
    let listed: Vec<String> = cuts.iter().map(|c| c.to_string()).collect();
    SelectionError::configuration(format!(
        "contradictory cuts on column '{column}': {}",
        listed.join(" & ")
    ))
}

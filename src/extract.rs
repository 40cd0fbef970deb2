//! Per-file extraction of weighted observations.
//!
//! For one opened table and one final event mask, every catalog variable is
//! flattened into a sequence of observations, each carrying the weight of
//! the event it came from:
//!
//! ```text
//!   event i passes mask and qualifying guard
//!        │  base weight = 1.0 (data) | evtFillWgt[i] * luminosity (simulation)
//!        ▼
//!   scalar              → 1 value,            1 × weight
//!   singleton kinematic → list[0],            1 × weight
//!   per object          → every list element, k × weight (k = list length)
//! ```

use log::debug;

use crate::catalog::{VariableDescriptor, VariableKind};
use crate::config::{AnalysisConfig, SampleKind};
use crate::cut::{CutBindings, CutExpression};
use crate::data::model::{Column, EventTable, ObservationSet};
use crate::error::{Result, SelectionError};

/// A catalog variable resolved against the columns of one table.
enum Source<'t> {
    Scalar(&'t [f64]),
    Lists(&'t [Vec<f64>]),
}

struct Resolved<'c, 't> {
    descriptor: &'c VariableDescriptor,
    source: Source<'t>,
}

/// Applies masks to a table and extracts the catalog variables.
pub struct ExtractionEngine<'c> {
    config: &'c AnalysisConfig,
}

impl<'c> ExtractionEngine<'c> {
    pub fn new(config: &'c AnalysisConfig) -> Self {
        ExtractionEngine { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        self.config
    }

    /// Baseline selection of the table.
    pub fn baseline_mask(&self, table: &EventTable) -> Vec<bool> {
        self.config.selection.baseline_mask(table)
    }

    /// Events whose flag column equals 1, or `None` when the table has no
    /// such column.
    pub fn flag_mask(&self, table: &EventTable, column: &str) -> Option<Vec<bool>> {
        table
            .column(column)
            .and_then(Column::as_scalar)
            .map(|values| values.iter().map(|&v| v == 1.0).collect())
    }

    /// Arrays custom cuts may refer to. A configured binding the table lacks
    /// is bound to zeros.
    pub fn cut_bindings(&self, table: &EventTable) -> CutBindings {
        self.config
            .cut_bindings
            .iter()
            .map(|name| {
                let values = table
                    .column(name)
                    .and_then(Column::as_scalar)
                    .map(<[f64]>::to_vec)
                    .unwrap_or_else(|| vec![0.0; table.n_rows()]);
                (name.clone(), values)
            })
            .collect()
    }

    /// Events passing a parsed custom cut.
    pub fn custom_mask(&self, table: &EventTable, cut: &CutExpression) -> Result<Vec<bool>> {
        cut.evaluate(&self.cut_bindings(table))
    }

    /// Extract every catalog variable for the events selected by `mask`.
    ///
    /// Returns `Ok(None)` when no event is selected or no qualifying event
    /// produced a value for the primary variable. Catalog variables whose
    /// column the table lacks are left out of the result.
    pub fn extract(
        &self,
        table: &EventTable,
        mask: &[bool],
        sample: SampleKind,
    ) -> Result<Option<ObservationSet>> {
        if mask.len() != table.n_rows() {
            return Err(SelectionError::configuration(format!(
                "mask has {} entries but {} has {} events",
                mask.len(),
                table.source().display(),
                table.n_rows()
            )));
        }
        if !mask.iter().any(|&m| m) {
            return Ok(None);
        }

        let event_weights = match sample {
            SampleKind::Data => None,
            SampleKind::Simulation => Some(table.scalar(&self.config.weight_column)?),
        };

        let guard = &self.config.guard;
        let kinematic = guard
            .kinematic_columns
            .iter()
            .map(|c| table.jagged(c))
            .collect::<Result<Vec<_>>>()?;
        let threshold_lists = table.jagged(&guard.threshold_column)?;

        let resolved = self.resolve_variables(table)?;

        let mut out = ObservationSet::new(&self.config.primary_variable);
        for var in &resolved {
            out.declare(&var.descriptor.logical_name);
        }

        let mut qualifying = 0usize;
        for row in (0..mask.len()).filter(|&i| mask[i]) {
            let passes_guard = kinematic.iter().all(|lists| !lists[row].is_empty())
                && threshold_lists[row]
                    .first()
                    .is_some_and(|&v| v < guard.threshold);
            if !passes_guard {
                continue;
            }
            qualifying += 1;

            let weight = match event_weights {
                Some(w) => w[row] * self.config.luminosity,
                None => 1.0,
            };

            for var in &resolved {
                push_row(&mut out, var, row, weight);
            }
        }

        debug!(
            "  {}: {} selected, {} qualifying, {} {} entries",
            table.source().display(),
            mask.iter().filter(|&&m| m).count(),
            qualifying,
            out.len(),
            self.config.primary_variable
        );

        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some(out))
    }

    fn resolve_variables<'t>(&self, table: &'t EventTable) -> Result<Vec<Resolved<'c, 't>>> {
        let mut resolved = Vec::new();
        for descriptor in self.config.variables.iter() {
            let source = match (descriptor.kind, table.column(&descriptor.source_column)) {
                (_, None) => continue,
                (VariableKind::Scalar, Some(Column::Scalar(v))) => Source::Scalar(v),
                (
                    VariableKind::SingletonKinematic | VariableKind::PerObject,
                    Some(Column::Jagged(v)),
                ) => Source::Lists(v),
                (kind, Some(_)) => {
                    return Err(SelectionError::file_access(
                        table.source(),
                        format!(
                            "column '{}' does not match the {kind:?} kind of variable '{}'",
                            descriptor.source_column, descriptor.logical_name
                        ),
                    ));
                }
            };
            resolved.push(Resolved { descriptor, source });
        }
        Ok(resolved)
    }
}

/// Append the observations of one event for one variable.
fn push_row(out: &mut ObservationSet, var: &Resolved<'_, '_>, row: usize, weight: f64) {
    let name = &var.descriptor.logical_name;
    let scale = var.descriptor.scale;
    match (&var.source, var.descriptor.kind) {
        (Source::Scalar(values), _) => out.push(name, values[row] * scale, weight),
        (Source::Lists(lists), VariableKind::SingletonKinematic) => {
            if let Some(&first) = lists[row].first() {
                out.push(name, first * scale, weight);
            }
        }
        (Source::Lists(lists), _) => {
            for &v in &lists[row] {
                out.push(name, v * scale, weight);
            }
        }
    }
}

/// Element-wise AND of two masks of equal length.
pub fn and_masks(a: &[bool], b: &[bool]) -> Vec<bool> {
    a.iter().zip(b).map(|(&x, &y)| x && y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jagged(rows: &[&[f64]]) -> Column {
        Column::Jagged(rows.iter().map(|r| r.to_vec()).collect())
    }

    fn table() -> EventTable {
        EventTable::from_columns(
            "sim.parquet",
            vec![
                ("evtFillWgt", Column::Scalar(vec![5.0, 2.0, 3.0])),
                ("selCMet", Column::Scalar(vec![200.0, 300.0, 400.0])),
                ("rjr_Ms", jagged(&[&[2000.0], &[3000.0], &[]])),
                ("rjr_Rs", jagged(&[&[0.5], &[0.6], &[0.7]])),
                ("rjrPTS", jagged(&[&[10.0], &[200.0], &[10.0]])),
                ("HadronicSV_mass", jagged(&[&[4.0, 6.0], &[1.0], &[2.0]])),
                ("nSelPhotons", Column::Scalar(vec![1.0, 0.0, 1.0])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn simulation_weights_scale_with_luminosity() {
        let config = AnalysisConfig {
            luminosity: 10.0,
            ..AnalysisConfig::default()
        };
        let engine = ExtractionEngine::new(&config);
        let out = engine
            .extract(&table(), &[true, true, true], SampleKind::Simulation)
            .unwrap()
            .unwrap();

        // Row 1 fails the threshold guard, row 2 has no kinematic entry.
        assert_eq!(out.values("rjr_Ms"), Some(&[2.0][..]));
        assert_eq!(out.values("selCMet"), Some(&[200.0][..]));
        assert_eq!(out.values("HadronicSV_mass"), Some(&[4.0, 6.0][..]));
        assert_eq!(out.weights_of("HadronicSV_mass"), Some(&[50.0, 50.0][..]));
        assert_eq!(out.weights(), &[50.0]);
    }

    #[test]
    fn data_weights_are_unity() {
        let config = AnalysisConfig::default();
        let engine = ExtractionEngine::new(&config);
        let out = engine
            .extract(&table(), &[true, false, false], SampleKind::Data)
            .unwrap()
            .unwrap();
        assert_eq!(out.weights_of("HadronicSV_mass"), Some(&[1.0, 1.0][..]));
        assert_eq!(out.weights_of("rjr_Rs"), Some(&[1.0][..]));
    }

    #[test]
    fn empty_selection_is_absent() {
        let config = AnalysisConfig::default();
        let engine = ExtractionEngine::new(&config);
        let t = table();
        assert!(engine
            .extract(&t, &[false, false, false], SampleKind::Simulation)
            .unwrap()
            .is_none());
        // Only non-qualifying rows selected.
        assert!(engine
            .extract(&t, &[false, true, true], SampleKind::Simulation)
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_guard_column_is_an_error() {
        let config = AnalysisConfig::default();
        let engine = ExtractionEngine::new(&config);
        let t = EventTable::from_columns(
            "bad.parquet",
            vec![("evtFillWgt", Column::Scalar(vec![1.0]))],
        )
        .unwrap();
        let err = engine.extract(&t, &[true], SampleKind::Data).unwrap_err();
        assert!(matches!(err, SelectionError::FileAccess { .. }));
    }

    #[test]
    fn custom_mask_binds_missing_columns_to_zero() {
        let config = AnalysisConfig::default();
        let engine = ExtractionEngine::new(&config);
        let cut = CutExpression::parse("nSelPhotons==1 & SV_nHadronic==0").unwrap();
        assert_eq!(
            engine.custom_mask(&table(), &cut).unwrap(),
            vec![true, false, true]
        );
    }

    #[test]
    fn flag_mask_absent_column() {
        let config = AnalysisConfig::default();
        let engine = ExtractionEngine::new(&config);
        assert!(engine.flag_mask(&table(), "passNHad1SelectionSRTight").is_none());
        assert_eq!(
            engine.flag_mask(&table(), "nSelPhotons"),
            Some(vec![true, false, true])
        );
    }
}

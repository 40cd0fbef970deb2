use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::catalog::VariableCatalog;
use crate::data::filter::SelectionSpec;
use crate::data::loader::expand_input_paths;
use crate::error::{Result, SelectionError};

// ---------------------------------------------------------------------------
// SampleKind
// ---------------------------------------------------------------------------

/// Whether a file list holds recorded collisions or simulated events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Data,
    Simulation,
}

impl SampleKind {
    pub fn is_data(self) -> bool {
        matches!(self, SampleKind::Data)
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Data => f.write_str("Data"),
            SampleKind::Simulation => f.write_str("MC"),
        }
    }
}

// ---------------------------------------------------------------------------
// QualifyingGuard
// ---------------------------------------------------------------------------

/// Per-event validity requirement of the kinematic reconstruction.
///
/// An event qualifies when every `kinematic_columns` list is non-empty and
/// element `[0]` of `threshold_column` is below `threshold`. Events that do
/// not qualify contribute to no variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualifyingGuard {
    pub kinematic_columns: Vec<String>,
    pub threshold_column: String,
    pub threshold: f64,
}

impl Default for QualifyingGuard {
    fn default() -> Self {
        QualifyingGuard {
            kinematic_columns: vec!["rjr_Ms".to_string(), "rjr_Rs".to_string()],
            threshold_column: "rjrPTS".to_string(),
            threshold: 150.0,
        }
    }
}

impl QualifyingGuard {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.kinematic_columns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.threshold_column.as_str()))
    }
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

/// Everything the extraction core needs besides the file list and regions.
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Integrated luminosity (fb⁻¹) scaling simulated event weights.
    pub luminosity: f64,
    /// Name of the event table inside each file.
    pub tree_name: String,
    /// Per-event weight column; mandatory in every file.
    pub weight_column: String,
    /// Variable whose weights double as the default `weights` sequence and
    /// whose emptiness marks an empty (region, file) contribution.
    pub primary_variable: String,
    pub selection: SelectionSpec,
    pub guard: QualifyingGuard,
    /// Columns custom cuts may refer to. A bound column missing from a file
    /// binds to zeros.
    pub cut_bindings: Vec<String>,
    pub variables: VariableCatalog,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            luminosity: 400.0,
            tree_name: "kuSkimTree".to_string(),
            weight_column: "evtFillWgt".to_string(),
            primary_variable: "rjr_Ms".to_string(),
            selection: SelectionSpec::default(),
            guard: QualifyingGuard::default(),
            cut_bindings: vec![
                "nSelPhotons".to_string(),
                "SV_nHadronic".to_string(),
                "selCMet".to_string(),
            ],
            variables: VariableCatalog::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Checks run before any file is opened.
    pub fn validate(&self) -> Result<()> {
        if !self.luminosity.is_finite() || self.luminosity < 0.0 {
            return Err(SelectionError::configuration(format!(
                "luminosity must be a non-negative number, got {}",
                self.luminosity
            )));
        }
        if self.weight_column.is_empty() {
            return Err(SelectionError::configuration("weight column name is empty"));
        }
        if !self.guard.threshold.is_finite() {
            return Err(SelectionError::configuration(format!(
                "qualifying threshold on '{}' must be finite",
                self.guard.threshold_column
            )));
        }
        self.variables.validate(&self.primary_variable)?;
        self.selection.validate()
    }

    /// Columns read from every file, independent of the requested regions.
    pub fn base_columns(&self) -> BTreeSet<String> {
        let mut cols = self.selection.columns();
        cols.insert(self.weight_column.clone());
        cols.extend(self.variables.source_columns().map(String::from));
        cols.extend(self.guard.columns().map(String::from));
        cols.extend(self.cut_bindings.iter().cloned());
        cols
    }
}

// ---------------------------------------------------------------------------
// RunConfig – input of the runner binary
// ---------------------------------------------------------------------------

/// One group of input files sharing a sample kind (e.g. "signal").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleGroup {
    pub label: String,
    pub kind: SampleKind,
    /// Files and/or directories of files.
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    pub samples: Vec<SampleGroup>,
    /// Flag names (`pass...`) and custom-cut expressions, in caller order.
    pub regions: Vec<String>,
    #[serde(default)]
    pub unblind: bool,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_output() -> PathBuf {
    PathBuf::from("observations.json")
}

impl RunConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading run config {}", path.display()))?;
        let run: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing run config {}", path.display()))?;
        run.validate()
            .with_context(|| format!("invalid run config {}", path.display()))?;
        Ok(run)
    }

    /// Expand the inputs of every sample group, in group order. Runs before
    /// any file is loaded, so a bad path in any group stops the run early.
    pub fn expand_inputs(&self) -> anyhow::Result<Vec<(&SampleGroup, Vec<PathBuf>)>> {
        self.samples
            .iter()
            .map(|group| {
                let files = expand_input_paths(&group.inputs)
                    .with_context(|| format!("expanding inputs of sample '{}'", group.label))?;
                Ok((group, files))
            })
            .collect()
    }

    /// Sample labels key the output document, so they must be unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for group in &self.samples {
            if !seen.insert(group.label.as_str()) {
                return Err(SelectionError::configuration(format!(
                    "sample label '{}' is used more than once",
                    group.label
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg: AnalysisConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, AnalysisConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_override() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"luminosity": 138, "guard": {"threshold": 100}}"#).unwrap();
        assert_eq!(cfg.luminosity, 138.0);
        assert_eq!(cfg.guard.threshold, 100.0);
        assert_eq!(cfg.guard.threshold_column, "rjrPTS");
        assert_eq!(cfg.tree_name, "kuSkimTree");
    }

    #[test]
    fn invalid_luminosity_is_rejected() {
        let cfg = AnalysisConfig {
            luminosity: -1.0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SelectionError::Configuration(_))));
    }

    #[test]
    fn base_columns_cover_everything_read() {
        let cols = AnalysisConfig::default().base_columns();
        for c in ["evtFillWgt", "selCMet", "rjrPTS", "rjr_Ms", "nSelPhotons", "hlt_flags"] {
            assert!(cols.contains(c), "{c} missing");
        }
        assert!(cols.contains("Trigger_PFMET120_PFMHT120_IDTight"));
    }

    #[test]
    fn run_config_parses() {
        let run: RunConfig = serde_json::from_str(
            r#"{
                "samples": [{"label": "data", "kind": "data", "inputs": ["d.parquet"]}],
                "regions": ["passNHad1SelectionCRTight", "nSelPhotons==1"]
            }"#,
        )
        .unwrap();
        assert_eq!(run.samples[0].kind, SampleKind::Data);
        assert_eq!(run.output, PathBuf::from("observations.json"));
        assert!(!run.unblind);
        run.validate().unwrap();
    }

    #[test]
    fn every_group_is_expanded_before_loading() {
        let dir = tempfile::TempDir::new().unwrap();
        let present = dir.path().join("signal.parquet");
        std::fs::write(&present, b"").unwrap();

        let group = |label: &str, kind, input: PathBuf| SampleGroup {
            label: label.to_string(),
            kind,
            inputs: vec![input],
        };
        let mut run = RunConfig {
            analysis: AnalysisConfig::default(),
            samples: vec![group("signal", SampleKind::Simulation, present.clone())],
            regions: vec!["passNHad1SelectionSRTight".to_string()],
            unblind: false,
            output: default_output(),
        };

        let expanded = run.expand_inputs().unwrap();
        assert_eq!(expanded[0].0.label, "signal");
        assert_eq!(expanded[0].1, vec![present]);

        run.samples
            .push(group("data", SampleKind::Data, dir.path().join("missing")));
        let err = run.expand_inputs().unwrap_err();
        assert!(format!("{err:#}").contains("sample 'data'"));
    }

    #[test]
    fn duplicate_sample_labels_are_rejected() {
        let run: RunConfig = serde_json::from_str(
            r#"{
                "samples": [
                    {"label": "signal", "kind": "simulation", "inputs": ["a.parquet"]},
                    {"label": "signal", "kind": "data", "inputs": ["b.parquet"]}
                ],
                "regions": ["passNHad1SelectionCRTight"]
            }"#,
        )
        .unwrap();
        let err = run.validate().unwrap_err();
        assert!(matches!(&err, SelectionError::Configuration(msg) if msg.contains("'signal'")));
    }
}

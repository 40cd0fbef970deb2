use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SelectionError};

// ---------------------------------------------------------------------------
// VariableKind / VariableDescriptor
// ---------------------------------------------------------------------------

/// How a variable's source column is turned into flat observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// One value per event.
    Scalar,
    /// A list column of which only element `[0]` is used (one per event).
    SingletonKinematic,
    /// A list column flattened to one observation per object.
    PerObject,
}

impl VariableKind {
    pub fn is_vector_valued(self) -> bool {
        !matches!(self, VariableKind::Scalar)
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Key used in every observation set.
    pub logical_name: String,
    /// Column read from the source file.
    pub source_column: String,
    /// Short handle used by plotting code (`ms`, `met`, ...).
    pub short_name: String,
    pub kind: VariableKind,
    /// Unit factor applied once, at extraction.
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl VariableDescriptor {
    fn builtin(column: &str, short_name: &str, kind: VariableKind, scale: f64) -> Self {
        VariableDescriptor {
            logical_name: column.to_string(),
            source_column: column.to_string(),
            short_name: short_name.to_string(),
            kind,
            scale,
        }
    }

    pub fn is_vector_valued(&self) -> bool {
        self.kind.is_vector_valued()
    }
}

// ---------------------------------------------------------------------------
// VariableCatalog
// ---------------------------------------------------------------------------

/// Event-level variables always shown in data/simulation comparisons.
pub const EVENT_LEVEL_VARIABLES: &[&str] = &["rjr_Ms", "rjr_Rs", "selCMet"];

/// Hadronic secondary-vertex variables used in comparisons.
pub const HADRONIC_SV_VARIABLES: &[&str] = &[
    "HadronicSV_mass",
    "HadronicSV_dxy",
    "HadronicSV_dxySig",
    "HadronicSV_pOverE",
    "HadronicSV_decayAngle",
    "HadronicSV_cosTheta",
];

/// Leptonic secondary-vertex variables used in comparisons.
pub const LEPTONIC_SV_VARIABLES: &[&str] = &[
    "LeptonicSV_mass",
    "LeptonicSV_dxy",
    "LeptonicSV_dxySig",
    "LeptonicSV_pOverE",
    "LeptonicSV_decayAngle",
    "LeptonicSV_cosTheta",
];

/// Ordered registry of extractable variables, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableCatalog {
    variables: Vec<VariableDescriptor>,
}

impl Default for VariableCatalog {
    fn default() -> Self {
        use VariableKind::*;
        let d = VariableDescriptor::builtin;
        VariableCatalog {
            variables: vec![
                // GeV -> TeV
                d("rjr_Ms", "ms", SingletonKinematic, 0.001),
                d("rjr_Rs", "rs", SingletonKinematic, 1.0),
                d("HadronicSV_mass", "had_mass", PerObject, 1.0),
                d("HadronicSV_dxy", "had_dxy", PerObject, 1.0),
                d("HadronicSV_dxySig", "had_dxysig", PerObject, 1.0),
                d("HadronicSV_pOverE", "had_povere", PerObject, 1.0),
                d("HadronicSV_decayAngle", "had_decayangle", PerObject, 1.0),
                d("HadronicSV_cosTheta", "had_costheta", PerObject, 1.0),
                d("HadronicSV_nTracks", "ntracks", PerObject, 1.0),
                d("LeptonicSV_mass", "lep_mass", PerObject, 1.0),
                d("LeptonicSV_dxy", "lep_dxy", PerObject, 1.0),
                d("LeptonicSV_dxySig", "lep_dxysig", PerObject, 1.0),
                d("LeptonicSV_pOverE", "lep_povere", PerObject, 1.0),
                d("LeptonicSV_decayAngle", "lep_decayangle", PerObject, 1.0),
                d("LeptonicSV_cosTheta", "lep_costheta", PerObject, 1.0),
                d("selCMet", "met", Scalar, 1.0),
                d("selPhoEta", "photon_eta", PerObject, 1.0),
                d("selPhoWTime", "photon_time", PerObject, 1.0),
                d("selPho_beamHaloCNNScore", "photon_bh_score", PerObject, 1.0),
            ],
        }
    }
}

impl VariableCatalog {
    pub fn new(variables: Vec<VariableDescriptor>) -> Self {
        VariableCatalog { variables }
    }

    /// Reject duplicate names, non-finite scales and a primary variable the
    /// catalog does not define.
    pub fn validate(&self, primary: &str) -> Result<()> {
        let mut seen = BTreeSet::new();
        for var in &self.variables {
            if !seen.insert(var.logical_name.as_str()) {
                return Err(SelectionError::configuration(format!(
                    "variable '{}' is defined twice",
                    var.logical_name
                )));
            }
            if !var.scale.is_finite() {
                return Err(SelectionError::configuration(format!(
                    "variable '{}' has non-finite scale {}",
                    var.logical_name, var.scale
                )));
            }
        }
        if !seen.contains(primary) {
            return Err(SelectionError::configuration(format!(
                "primary variable '{primary}' is not in the catalog"
            )));
        }
        Ok(())
    }

    pub fn get(&self, logical_name: &str) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.logical_name == logical_name)
    }

    pub fn by_short_name(&self, short_name: &str) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.short_name == short_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Source columns every file must be asked for.
    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.source_column.as_str())
    }

    /// Variables compared between data and simulation for a region.
    ///
    /// Event-level variables always; hadronic SV variables for `NHad` regions,
    /// leptonic SV variables for `NLep` regions, both when both appear.
    /// Names the catalog does not define are left out.
    pub fn comparison_variables(&self, region_name: &str) -> Vec<&VariableDescriptor> {
        let mut names: Vec<&str> = EVENT_LEVEL_VARIABLES.to_vec();
        if region_name.contains("NHad") {
            names.extend_from_slice(HADRONIC_SV_VARIABLES);
        }
        if region_name.contains("NLep") {
            names.extend_from_slice(LEPTONIC_SV_VARIABLES);
        }
        names.into_iter().filter_map(|n| self.get(n)).collect()
    }
}

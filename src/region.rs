use std::fmt;

use serde::Serialize;

/// Tokens starting with this prefix name a per-event flag column.
pub const FLAG_REGION_PREFIX: &str = "pass";

/// Prefix of the synthetic names given to custom-cut regions.
pub const CUSTOM_REGION_PREFIX: &str = "CustomRegion";

/// A region to extract: either a boolean flag column or a custom cut.
///
/// A custom cut keeps its 1-based position and its original text together
/// for the whole run, so the synthetic name and the expression can never
/// drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionRequest {
    Flag { column: String },
    CustomCut { index: usize, expression: String },
}

impl RegionRequest {
    pub fn flag(column: impl Into<String>) -> Self {
        RegionRequest::Flag {
            column: column.into(),
        }
    }

    /// Number custom cuts `CustomRegion1`, `CustomRegion2`, ... in the order given.
    pub fn custom_cuts<S: AsRef<str>>(expressions: &[S]) -> Vec<Self> {
        expressions
            .iter()
            .enumerate()
            .map(|(i, e)| RegionRequest::CustomCut {
                index: i + 1,
                expression: e.as_ref().to_string(),
            })
            .collect()
    }

    /// Split caller tokens into flag regions (`pass...`) and custom cuts,
    /// each in caller order.
    pub fn classify<S: AsRef<str>>(tokens: &[S]) -> (Vec<Self>, Vec<Self>) {
        let (flags, cuts): (Vec<&str>, Vec<&str>) = tokens
            .iter()
            .map(|t| t.as_ref())
            .partition(|t| t.starts_with(FLAG_REGION_PREFIX));
        (
            flags.into_iter().map(RegionRequest::flag).collect(),
            RegionRequest::custom_cuts(&cuts),
        )
    }

    /// Stable key of the region in every result map.
    pub fn name(&self) -> String {
        match self {
            RegionRequest::Flag { column } => column.clone(),
            RegionRequest::CustomCut { index, .. } => format!("{CUSTOM_REGION_PREFIX}{index}"),
        }
    }

    /// Original expression of a custom cut.
    pub fn expression(&self) -> Option<&str> {
        match self {
            RegionRequest::Flag { .. } => None,
            RegionRequest::CustomCut { expression, .. } => Some(expression),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, RegionRequest::CustomCut { .. })
    }

    /// Flag regions whose name contains `SR`.
    pub fn is_signal_region(&self) -> bool {
        match self {
            RegionRequest::Flag { column } => column.contains("SR"),
            RegionRequest::CustomCut { .. } => false,
        }
    }

    /// Whether observed data should be hidden for this region. Custom cuts
    /// may select signal-like events, so they are blinded like signal regions.
    pub fn should_blind(&self, unblind: bool) -> bool {
        !unblind && (self.is_signal_region() || self.is_custom())
    }
}

impl fmt::Display for RegionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionRequest::Flag { column } => write!(f, "{column}"),
            RegionRequest::CustomCut { index, expression } => {
                write!(f, "{CUSTOM_REGION_PREFIX}{index} ('{expression}')")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_keeps_caller_order() {
        let (flags, cuts) = RegionRequest::classify(&[
            "nSelPhotons==1",
            "passNHad1SelectionSRTight",
            "selCMet>300",
            "passNLep1SelectionCRLoose",
        ]);
        let flag_names: Vec<String> = flags.iter().map(RegionRequest::name).collect();
        assert_eq!(
            flag_names,
            ["passNHad1SelectionSRTight", "passNLep1SelectionCRLoose"]
        );
        assert_eq!(cuts[0].name(), "CustomRegion1");
        assert_eq!(cuts[0].expression(), Some("nSelPhotons==1"));
        assert_eq!(cuts[1].name(), "CustomRegion2");
        assert_eq!(cuts[1].expression(), Some("selCMet>300"));
    }

    #[test]
    fn blinding() {
        let sr = RegionRequest::flag("passNHad1SelectionSRTight");
        let cr = RegionRequest::flag("passNHad1SelectionCRTight");
        let custom = RegionRequest::custom_cuts(&["selCMet>150"]).remove(0);
        assert!(sr.should_blind(false));
        assert!(!cr.should_blind(false));
        assert!(custom.should_blind(false));
        assert!(!sr.should_blind(true));
        assert!(!custom.should_blind(true));
    }
}

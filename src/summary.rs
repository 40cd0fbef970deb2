use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{AnalysisConfig, SampleKind};
use crate::region::RegionRequest;

/// A file that could not be used at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub file: PathBuf,
    pub reason: String,
}

/// A (region, file) pair skipped because of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPair {
    pub region: String,
    pub file: PathBuf,
    pub reason: String,
}

/// Read-only bookkeeping of a pipeline run. Nothing in the pipeline
/// consults it to make decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    pub luminosity: f64,
    pub tree_name: String,
    pub baseline: String,
    pub sample_kinds: BTreeSet<SampleKind>,
    pub event_flags: BTreeSet<String>,
    pub custom_cuts: BTreeSet<String>,
    pub files_processed: usize,
    pub failed_files: Vec<FileFailure>,
    pub skipped_pairs: Vec<SkippedPair>,
    /// Regions that ended a load with no contributing file.
    pub empty_regions: BTreeSet<String>,
}

/// Accumulates a [`LoadSummary`] across every `load_all` call.
#[derive(Debug, Clone, Default)]
pub struct LoadSummaryTracker {
    summary: LoadSummary,
}

impl LoadSummaryTracker {
    pub fn new(config: &AnalysisConfig) -> Self {
        LoadSummaryTracker {
            summary: LoadSummary {
                luminosity: config.luminosity,
                tree_name: config.tree_name.clone(),
                baseline: config.selection.describe(),
                ..LoadSummary::default()
            },
        }
    }

    pub fn record_request(&mut self, sample: SampleKind, regions: &[RegionRequest]) {
        self.summary.sample_kinds.insert(sample);
        for region in regions {
            match region {
                RegionRequest::Flag { column } => {
                    self.summary.event_flags.insert(column.clone());
                }
                RegionRequest::CustomCut { expression, .. } => {
                    self.summary.custom_cuts.insert(expression.clone());
                }
            }
        }
    }

    pub fn record_file(&mut self) {
        self.summary.files_processed += 1;
    }

    pub fn record_failure(&mut self, file: &Path, reason: impl fmt::Display) {
        self.summary.failed_files.push(FileFailure {
            file: file.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    pub fn record_skip(&mut self, region: &str, file: &Path, reason: impl fmt::Display) {
        self.summary.skipped_pairs.push(SkippedPair {
            region: region.to_string(),
            file: file.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    pub fn record_empty_region(&mut self, region: &str) {
        self.summary.empty_regions.insert(region.to_string());
    }

    pub fn summary(&self) -> &LoadSummary {
        &self.summary
    }
}

fn joined<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DATA LOADER SUMMARY:")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "    • Luminosity: {:.1} fb⁻¹", self.luminosity)?;
        writeln!(f, "    • Tree name: {}", self.tree_name)?;
        let kinds: Vec<String> = self.sample_kinds.iter().map(ToString::to_string).collect();
        writeln!(f, "    • Data types loaded: {}", kinds.join(", "))?;
        writeln!(f, "    • Files processed: {}", self.files_processed)?;
        writeln!(f, "    • Baseline cuts: {}", self.baseline)?;
        if !self.event_flags.is_empty() {
            writeln!(f, "    • Event flags: {}", joined(&self.event_flags))?;
        }
        if !self.custom_cuts.is_empty() {
            writeln!(f, "    • Custom cuts: {}", joined(&self.custom_cuts))?;
        }
        if !self.empty_regions.is_empty() {
            writeln!(f, "    • Empty regions: {}", joined(&self.empty_regions))?;
        }
        for failure in &self.failed_files {
            writeln!(
                f,
                "    • Skipped file {}: {}",
                failure.file.display(),
                failure.reason
            )?;
        }
        for skip in &self.skipped_pairs {
            writeln!(
                f,
                "    • Skipped {} in {}: {}",
                skip.region,
                skip.file.display(),
                skip.reason
            )?;
        }
        write!(f, "{}", "=".repeat(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_requests() {
        let mut tracker = LoadSummaryTracker::new(&AnalysisConfig::default());
        let mut regions = vec![RegionRequest::flag("passNHad1SelectionSRTight")];
        regions.extend(RegionRequest::custom_cuts(&["nSelPhotons==1"]));
        tracker.record_request(SampleKind::Simulation, &regions);
        tracker.record_request(SampleKind::Data, &regions);
        tracker.record_file();
        tracker.record_file();
        tracker.record_empty_region("CustomRegion1");

        let summary = tracker.summary();
        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.sample_kinds.len(), 2);
        assert!(summary.custom_cuts.contains("nSelPhotons==1"));

        let text = summary.to_string();
        assert!(text.contains("Data, MC"));
        assert!(text.contains("Luminosity: 400.0"));
        assert!(text.contains("Empty regions: CustomRegion1"));
    }
}

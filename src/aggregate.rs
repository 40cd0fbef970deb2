use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{AnalysisConfig, SampleKind};
use crate::cut::CutExpression;
use crate::data::loader::load_table;
use crate::data::model::{EventTable, ObservationSet, PooledObservationSet};
use crate::error::{Result, SelectionError};
use crate::extract::{ExtractionEngine, and_masks};
use crate::region::RegionRequest;
use crate::summary::{LoadSummary, LoadSummaryTracker};

/// Per-file observation sets of one region, in file processing order.
pub type FileResults = IndexMap<PathBuf, ObservationSet>;

// ---------------------------------------------------------------------------
// RegionResult / LoadOutcome
// ---------------------------------------------------------------------------

/// Everything one region collected during a load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionResult {
    region: RegionRequest,
    files: FileResults,
}

impl RegionResult {
    fn new(region: RegionRequest) -> Self {
        RegionResult {
            region,
            files: FileResults::new(),
        }
    }

    pub fn name(&self) -> String {
        self.region.name()
    }

    pub fn region(&self) -> &RegionRequest {
        &self.region
    }

    /// Original text of a custom-cut region.
    pub fn expression(&self) -> Option<&str> {
        self.region.expression()
    }

    pub fn files(&self) -> &FileResults {
        &self.files
    }

    pub fn get(&self, file: &Path) -> Option<&ObservationSet> {
        self.files.get(file)
    }

    /// `true` when no file contributed.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Pool the contributions of every file.
    pub fn combine(&self) -> Result<PooledObservationSet> {
        combine(&self.name(), &self.files)
    }
}

/// Concatenate the per-file sets of region `name` in iteration order.
pub fn combine(name: &str, files: &FileResults) -> Result<PooledObservationSet> {
    let mut sets = files.values();
    let first = sets
        .next()
        .ok_or_else(|| SelectionError::EmptyRegion(name.to_string()))?;
    let mut pooled = PooledObservationSet::from_first(first);
    for set in sets {
        pooled.append(set);
    }
    Ok(pooled)
}

/// Results of one `load_all` call, keyed by region name.
///
/// Named flag regions are keyed by their flag column and custom cuts by
/// `CustomRegion{i}`; both maps keep the caller's order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub named: IndexMap<String, RegionResult>,
    pub custom: IndexMap<String, RegionResult>,
}

impl LoadOutcome {
    pub fn get(&self, name: &str) -> Option<&RegionResult> {
        self.named.get(name).or_else(|| self.custom.get(name))
    }

    /// All regions, flag regions first.
    pub fn regions(&self) -> impl Iterator<Item = &RegionResult> {
        self.named.values().chain(self.custom.values())
    }

    /// Synthetic custom-region name → original expression.
    pub fn custom_expressions(&self) -> IndexMap<String, String> {
        self.custom
            .iter()
            .filter_map(|(name, r)| r.expression().map(|e| (name.clone(), e.to_string())))
            .collect()
    }

    /// Names of regions with no contributing file.
    pub fn empty_regions(&self) -> Vec<String> {
        self.regions()
            .filter(|r| r.is_empty())
            .map(RegionResult::name)
            .collect()
    }

    fn slot_mut(&mut self, region: &RegionRequest) -> &mut RegionResult {
        let map = if region.is_custom() {
            &mut self.custom
        } else {
            &mut self.named
        };
        map.entry(region.name())
            .or_insert_with(|| RegionResult::new(region.clone()))
    }
}

// ---------------------------------------------------------------------------
// RegionAggregator
// ---------------------------------------------------------------------------

/// A region with its custom cut parsed once per load. A parse failure is
/// kept so it can be reported for each file.
enum PreparedRegion {
    Flag(RegionRequest),
    Custom {
        region: RegionRequest,
        cut: std::result::Result<CutExpression, String>,
    },
}

impl PreparedRegion {
    fn region(&self) -> &RegionRequest {
        match self {
            PreparedRegion::Flag(region) | PreparedRegion::Custom { region, .. } => region,
        }
    }
}

/// Runs the extraction over every (file, region) pair and buckets the
/// results by region, then by file.
///
/// Files are processed one at a time: each is opened once, its columns read
/// once, every region evaluated on that table, and the table dropped before
/// the next file. A failure affects only its own file or (file, region)
/// pair.
pub struct RegionAggregator<'c> {
    config: &'c AnalysisConfig,
    tracker: LoadSummaryTracker,
}

impl<'c> RegionAggregator<'c> {
    pub fn new(config: &'c AnalysisConfig) -> Self {
        RegionAggregator {
            config,
            tracker: LoadSummaryTracker::new(config),
        }
    }

    /// Load `files` for the named flag regions and the custom cuts.
    /// Custom cuts are numbered by their position in `custom_cuts`.
    pub fn load_all<P, S, C>(
        &mut self,
        files: &[P],
        named_regions: &[S],
        custom_cuts: &[C],
        sample: SampleKind,
    ) -> Result<LoadOutcome>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
        C: AsRef<str>,
    {
        let mut regions: Vec<RegionRequest> = named_regions
            .iter()
            .map(|r| RegionRequest::flag(r.as_ref()))
            .collect();
        regions.extend(RegionRequest::custom_cuts(custom_cuts));
        self.load_regions(files, &regions, sample)
    }

    /// Load `files` for an explicit list of regions.
    ///
    /// Only configuration errors found before the first file is opened are
    /// returned; everything else is logged, recorded in the summary and
    /// skipped.
    pub fn load_regions<P: AsRef<Path>>(
        &mut self,
        files: &[P],
        regions: &[RegionRequest],
        sample: SampleKind,
    ) -> Result<LoadOutcome> {
        self.config.validate()?;
        self.tracker.record_request(sample, regions);

        let engine = ExtractionEngine::new(self.config);
        let prepared = prepare(regions);

        let mut columns = self.config.base_columns();
        for region in regions {
            if let RegionRequest::Flag { column } = region {
                columns.insert(column.clone());
            }
        }

        let mut outcome = LoadOutcome::default();
        for p in &prepared {
            outcome.slot_mut(p.region());
        }

        info!(
            "Loading {} {} files for {} regions",
            files.len(),
            sample,
            prepared.len()
        );

        for file in files {
            let path = file.as_ref();
            info!("Loading {}...", path.display());
            self.tracker.record_file();

            let table = match self.open(path, &columns) {
                Ok(table) => table,
                Err(e) => {
                    warn!("  Error loading {}: {e}", path.display());
                    self.tracker.record_failure(path, &e);
                    continue;
                }
            };

            let baseline = engine.baseline_mask(&table);
            debug!(
                "  {} of {} events pass the baseline",
                baseline.iter().filter(|&&b| b).count(),
                table.n_rows()
            );

            for p in &prepared {
                let name = p.region().name();
                match self.extract_region(&engine, &table, &baseline, p, sample) {
                    Ok(Some(set)) => {
                        debug!("    [{name}] {} entries", set.len());
                        outcome
                            .slot_mut(p.region())
                            .files
                            .insert(path.to_path_buf(), set);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("  Skipping region {name} for {}: {e}", path.display());
                        self.tracker.record_skip(&name, path, &e);
                    }
                }
            }
        }

        for result in outcome.regions() {
            if result.is_empty() {
                self.tracker
                    .record_empty_region(&format!("{} ({sample})", result.name()));
            }
        }
        info!("{}", self.tracker.summary());

        Ok(outcome)
    }

    /// Summary accumulated over every load so far.
    pub fn summary(&self) -> &LoadSummary {
        self.tracker.summary()
    }

    fn open(&self, path: &Path, columns: &BTreeSet<String>) -> Result<EventTable> {
        let table = load_table(path, &self.config.tree_name, columns)?;
        // A table without events has nothing to weight.
        if table.n_rows() > 0 {
            table.scalar(&self.config.weight_column)?;
        }
        Ok(table)
    }

    /// One (file, region) pair. `Ok(None)` means no contribution.
    fn extract_region(
        &self,
        engine: &ExtractionEngine<'_>,
        table: &EventTable,
        baseline: &[bool],
        prepared: &PreparedRegion,
        sample: SampleKind,
    ) -> Result<Option<ObservationSet>> {
        let region_mask = match prepared {
            PreparedRegion::Flag(region) => {
                let column = region.name();
                match engine.flag_mask(table, &column) {
                    Some(mask) => mask,
                    None => {
                        debug!("    flag {column} not found in {}", table.source().display());
                        return Ok(None);
                    }
                }
            }
            PreparedRegion::Custom { cut: Ok(cut), .. } => engine.custom_mask(table, cut)?,
            PreparedRegion::Custom {
                region,
                cut: Err(reason),
            } => {
                let expression = region.expression().unwrap_or_default();
                return Err(SelectionError::parse(expression, reason.clone()));
            }
        };

        let mask = and_masks(baseline, &region_mask);
        engine.extract(table, &mask, sample)
    }
}

/// Parse every custom cut once.
fn prepare(regions: &[RegionRequest]) -> Vec<PreparedRegion> {
    regions
        .iter()
        .map(|region| match region {
            RegionRequest::Flag { .. } => PreparedRegion::Flag(region.clone()),
            RegionRequest::CustomCut { expression, .. } => {
                let cut = CutExpression::parse(expression).map_err(|err| match err {
                    SelectionError::Parse { reason, .. } => reason,
                    other => other.to_string(),
                });
                if let Err(reason) = &cut {
                    warn!("Custom cut '{}' is malformed: {reason}", region);
                }
                PreparedRegion::Custom {
                    region: region.clone(),
                    cut,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[f64], weight: f64) -> ObservationSet {
        let mut s = ObservationSet::new("rjr_Ms");
        for &v in values {
            s.push("rjr_Ms", v, weight);
        }
        s
    }

    #[test]
    fn combine_empty_region_fails() {
        let err = combine("CustomRegion1", &FileResults::new()).unwrap_err();
        assert!(matches!(err, SelectionError::EmptyRegion(name) if name == "CustomRegion1"));
    }

    #[test]
    fn combine_keeps_file_order() {
        let mut files = FileResults::new();
        files.insert(PathBuf::from("b.parquet"), set(&[3.0], 1.0));
        files.insert(PathBuf::from("a.parquet"), set(&[1.0, 2.0], 2.0));
        let pooled = combine("r", &files).unwrap();
        assert_eq!(pooled.values("rjr_Ms"), Some(&[3.0, 1.0, 2.0][..]));
        assert_eq!(pooled.weights(), &[1.0, 2.0, 2.0]);
    }

    #[test]
    fn custom_cuts_are_parsed_up_front() {
        let mut regions = vec![RegionRequest::flag("passNHad1SelectionSRTight")];
        regions.extend(RegionRequest::custom_cuts(&["selCMet>150", "x>>1"]));
        let prepared = prepare(&regions);

        assert!(matches!(prepared[0], PreparedRegion::Flag(_)));
        assert!(matches!(prepared[1], PreparedRegion::Custom { cut: Ok(_), .. }));
        match &prepared[2] {
            PreparedRegion::Custom { region, cut: Err(_) } => {
                assert_eq!(region.name(), "CustomRegion2");
            }
            _ => panic!("malformed cut should keep its parse error"),
        }
    }

    #[test]
    fn custom_expressions_stay_paired() {
        let mut outcome = LoadOutcome::default();
        for region in RegionRequest::custom_cuts(&["nSelPhotons==1", "selCMet>300"]) {
            outcome.slot_mut(&region);
        }
        let exprs = outcome.custom_expressions();
        assert_eq!(exprs["CustomRegion1"], "nSelPhotons==1");
        assert_eq!(exprs["CustomRegion2"], "selCMet>300");
        assert_eq!(outcome.empty_regions().len(), 2);
    }
}

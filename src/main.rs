use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;

use sv_select::aggregate::{FileResults, RegionAggregator, RegionResult};
use sv_select::config::{RunConfig, SampleGroup};
use sv_select::data::model::PooledObservationSet;
use sv_select::region::RegionRequest;

/// One region of one sample group in the output document.
#[derive(Serialize)]
struct RegionReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    expression: Option<&'a str>,
    blinded: bool,
    files: Option<&'a FileResults>,
    pooled: Option<PooledObservationSet>,
}

fn main() -> Result<()> {
    env_logger::init();

    let Some(run_path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: sv-select <run.json>");
    };
    let run = RunConfig::from_json_file(&run_path)?;

    let (flags, cuts) = RegionRequest::classify(&run.regions);
    let regions: Vec<RegionRequest> = flags.into_iter().chain(cuts).collect();
    if regions.is_empty() {
        bail!("{}: no regions requested", run_path.display());
    }

    let inputs = run.expand_inputs()?;

    let mut aggregator = RegionAggregator::new(&run.analysis);
    let mut outcomes = IndexMap::new();
    for (group, files) in &inputs {
        let outcome = load_group(&mut aggregator, group, files, &regions, run.unblind)?;
        outcomes.insert(group.label.as_str(), outcome);
    }
    info!("{}", aggregator.summary());

    let mut document: IndexMap<&str, IndexMap<String, RegionReport<'_>>> = IndexMap::new();
    for group in &run.samples {
        let outcome = &outcomes[group.label.as_str()];
        let mut reports = IndexMap::new();
        for region in &regions {
            let name = region.name();
            let blinded = group.kind.is_data() && region.should_blind(run.unblind);
            let result = outcome.get(&name);
            reports.insert(
                name,
                RegionReport {
                    expression: region.expression(),
                    blinded,
                    files: result.map(RegionResult::files),
                    pooled: result.and_then(|r| pool(&group.label, r)),
                },
            );
        }
        document.insert(group.label.as_str(), reports);
    }

    write_report(&run.output, &document)?;
    info!("Wrote observations to {}", run.output.display());
    Ok(())
}

fn load_group(
    aggregator: &mut RegionAggregator<'_>,
    group: &SampleGroup,
    files: &[PathBuf],
    regions: &[RegionRequest],
    unblind: bool,
) -> Result<sv_select::LoadOutcome> {
    info!(
        "Sample '{}' ({}): {} files",
        group.label,
        group.kind,
        files.len()
    );

    // Blinded regions are never read for observed data.
    let wanted: Vec<RegionRequest> = regions
        .iter()
        .filter(|r| !(group.kind.is_data() && r.should_blind(unblind)))
        .cloned()
        .collect();

    aggregator
        .load_regions(files, &wanted, group.kind)
        .with_context(|| format!("loading sample '{}'", group.label))
}

fn pool(label: &str, result: &RegionResult) -> Option<PooledObservationSet> {
    match result.combine() {
        Ok(pooled) => Some(pooled),
        Err(e) => {
            warn!("{label}: {e}");
            None
        }
    }
}

fn write_report<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), document)
        .with_context(|| format!("writing {}", path.display()))
}

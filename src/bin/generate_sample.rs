use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Float64Builder, Int64Array, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use parquet::arrow::ArrowWriter;

use sv_select::data::loader::TABLE_NAME_KEY;

const TREE_NAME: &str = "kuSkimTree";
const N_EVENTS: usize = 2000;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Small non-negative count, `0..=max`.
    fn count(&mut self, max: usize) -> usize {
        (self.next_u64() % (max as u64 + 1)) as usize
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        -mean * self.next_f64().max(1e-15).ln()
    }
}

// ---------------------------------------------------------------------------
// Column builders
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Columns {
    scalars: Vec<(&'static str, Vec<f64>)>,
    counts: Vec<(&'static str, Vec<i64>)>,
    flags: Vec<(&'static str, Vec<bool>)>,
    lists: Vec<(&'static str, Vec<Vec<f64>>)>,
}

impl Columns {
    fn scalar(&mut self, name: &'static str, v: f64) {
        push_named(&mut self.scalars, name, v);
    }

    fn count(&mut self, name: &'static str, v: i64) {
        push_named(&mut self.counts, name, v);
    }

    fn flag(&mut self, name: &'static str, v: bool) {
        push_named(&mut self.flags, name, v);
    }

    fn list(&mut self, name: &'static str, v: Vec<f64>) {
        push_named(&mut self.lists, name, v);
    }

    fn into_batch(self) -> Result<RecordBatch> {
        let mut fields = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();

        for (name, values) in self.scalars {
            fields.push(Field::new(name, DataType::Float64, false));
            arrays.push(Arc::new(Float64Array::from(values)));
        }
        for (name, values) in self.counts {
            fields.push(Field::new(name, DataType::Int64, false));
            arrays.push(Arc::new(Int64Array::from(values)));
        }
        for (name, values) in self.flags {
            fields.push(Field::new(name, DataType::Boolean, false));
            arrays.push(Arc::new(BooleanArray::from(values)));
        }
        for (name, rows) in self.lists {
            let mut builder = ListBuilder::new(Float64Builder::new());
            for row in &rows {
                let values = builder.values();
                for &v in row {
                    values.append_value(v);
                }
                builder.append(true);
            }
            fields.push(Field::new(
                name,
                DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
                false,
            ));
            arrays.push(Arc::new(builder.finish()));
        }

        let metadata = HashMap::from([(TABLE_NAME_KEY.to_string(), TREE_NAME.to_string())]);
        let schema = Arc::new(Schema::new_with_metadata(fields, metadata));
        RecordBatch::try_new(schema, arrays).context("building record batch")
    }
}

fn push_named<T>(cols: &mut Vec<(&'static str, Vec<T>)>, name: &'static str, v: T) {
    match cols.iter_mut().find(|(n, _)| *n == name) {
        Some((_, values)) => values.push(v),
        None => cols.push((name, vec![v])),
    }
}

// ---------------------------------------------------------------------------
// Event generation
// ---------------------------------------------------------------------------

const SV_FEATURES: &[(&str, &str)] = &[
    ("HadronicSV_mass", "LeptonicSV_mass"),
    ("HadronicSV_dxy", "LeptonicSV_dxy"),
    ("HadronicSV_dxySig", "LeptonicSV_dxySig"),
    ("HadronicSV_pOverE", "LeptonicSV_pOverE"),
    ("HadronicSV_decayAngle", "LeptonicSV_decayAngle"),
    ("HadronicSV_cosTheta", "LeptonicSV_cosTheta"),
];

fn sv_feature(rng: &mut SimpleRng, feature: &str) -> f64 {
    match feature {
        f if f.ends_with("_mass") => rng.exponential(3.0),
        f if f.ends_with("_dxySig") => rng.exponential(40.0),
        f if f.ends_with("_dxy") => rng.exponential(2.0),
        f if f.ends_with("_pOverE") => rng.uniform(0.5, 1.0),
        f if f.ends_with("_decayAngle") => rng.uniform(-1.0, 1.0),
        _ => rng.uniform(0.9, 1.0),
    }
}

fn generate_event(rng: &mut SimpleRng, cols: &mut Columns) {
    let met = rng.exponential(180.0) + 50.0;
    cols.scalar("selCMet", met);
    cols.scalar("evtFillWgt", rng.uniform(0.001, 0.05));

    let n_had = rng.count(2);
    let n_lep = if n_had == 0 { rng.count(1) } else { 0 };
    let n_pho = rng.count(2);
    cols.count("SV_nHadronic", n_had as i64);
    cols.count("SV_nLeptonic", n_lep as i64);
    cols.count("nSelPhotons", n_pho as i64);

    // Triggers: the combined flag is stored only on some files in practice.
    let trigger = met > 120.0 || rng.chance(0.05);
    cols.flag("hlt_flags", trigger);
    cols.flag("Trigger_PFMET120_PFMHT120_IDTight", trigger);
    cols.flag("Flag_MetFilters", rng.chance(0.98));

    // ~10% of events have no kinematic reconstruction.
    let reconstructed = rng.chance(0.9);
    let ms = rng.gauss(2500.0, 800.0).max(100.0);
    let rs = rng.uniform(0.0, 1.0);
    cols.list("rjr_Ms", if reconstructed { vec![ms] } else { vec![] });
    cols.list("rjr_Rs", if reconstructed { vec![rs] } else { vec![] });
    cols.list("rjrPTS", vec![rng.exponential(60.0)]);

    for &(had, lep) in SV_FEATURES {
        let values: Vec<f64> = (0..n_had).map(|_| sv_feature(rng, had)).collect();
        cols.list(had, values);
        let values: Vec<f64> = (0..n_lep).map(|_| sv_feature(rng, lep)).collect();
        cols.list(lep, values);
    }
    let tracks: Vec<f64> = (0..n_had).map(|_| (rng.count(8) + 2) as f64).collect();
    cols.list("HadronicSV_nTracks", tracks);

    let eta: Vec<f64> = (0..n_pho).map(|_| rng.uniform(-1.44, 1.44)).collect();
    let time: Vec<f64> = (0..n_pho).map(|_| rng.gauss(0.0, 1.0)).collect();
    let bh: Vec<f64> = (0..n_pho).map(|_| rng.next_f64()).collect();
    cols.list("selPhoEta", eta);
    cols.list("selPhoWTime", time);
    cols.list("selPho_beamHaloCNNScore", bh);

    let rs_high = rs > 0.4;
    let ms_high = ms > 2000.0;
    cols.flag("passNHad1SelectionSRTight", n_had == 1 && rs_high && ms_high);
    cols.flag("passNHad1SelectionCRTight", n_had == 1 && !rs_high);
    cols.flag("passNLep1SelectionSRTight", n_lep == 1 && rs_high && ms_high);
    cols.flag("passNLep1SelectionCRTight", n_lep == 1 && !rs_high);
}

fn main() -> Result<()> {
    let output_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_events.parquet".to_string());
    let mut rng = SimpleRng::new(42);

    let mut cols = Columns::default();
    for _ in 0..N_EVENTS {
        generate_event(&mut rng, &mut cols);
    }
    let batch = cols.into_batch()?;

    let file = std::fs::File::create(&output_path)
        .with_context(|| format!("creating {output_path}"))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;

    let preview = batch.project(&[0, 1, 2, 3])?.slice(0, 5);
    println!("{}", pretty_format_batches(&[preview])?);
    println!(
        "Wrote {N_EVENTS} events ({} columns) of table {TREE_NAME} to {output_path}",
        batch.num_columns()
    );
    Ok(())
}

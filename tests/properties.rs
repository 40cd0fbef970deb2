use std::path::PathBuf;

use proptest::prelude::*;

use sv_select::aggregate::{FileResults, combine};
use sv_select::config::{AnalysisConfig, SampleKind};
use sv_select::data::filter::{CompareOp, ScalarCut, SelectionSpec};
use sv_select::data::model::{Column, EventTable, ObservationSet};
use sv_select::extract::{ExtractionEngine, and_masks};

/// (MET, weight, per-object masses, qualifies) for one event.
fn event() -> impl Strategy<Value = (f64, f64, Vec<f64>, bool)> {
    (
        0.0..400.0f64,
        0.0..20.0f64,
        prop::collection::vec(0.0..50.0f64, 0..4),
        any::<bool>(),
    )
}

fn table(events: &[(f64, f64, Vec<f64>, bool)]) -> EventTable {
    let met = events.iter().map(|e| e.0).collect();
    let weight = events.iter().map(|e| e.1).collect();
    let masses = events.iter().map(|e| e.2.clone()).collect();
    let ms = events
        .iter()
        .map(|e| if e.3 { vec![1000.0] } else { vec![] })
        .collect();
    let rs = events.iter().map(|_| vec![0.5]).collect();
    let pts = events.iter().map(|_| vec![10.0]).collect();
    let flags = vec![1.0; events.len()];
    EventTable::from_columns(
        "prop.parquet",
        vec![
            ("selCMet", Column::Scalar(met)),
            ("evtFillWgt", Column::Scalar(weight)),
            ("hlt_flags", Column::Scalar(flags.clone())),
            ("Flag_MetFilters", Column::Scalar(flags)),
            ("HadronicSV_mass", Column::Jagged(masses)),
            ("rjr_Ms", Column::Jagged(ms)),
            ("rjr_Rs", Column::Jagged(rs)),
            ("rjrPTS", Column::Jagged(pts)),
        ],
    )
    .unwrap()
}

/// (MET, weight, photon count, trigger flag, MET-filter flag) for one event.
fn baseline_event() -> impl Strategy<Value = (f64, f64, f64, bool, bool)> {
    (
        0.0..400.0f64,
        0.0..20.0f64,
        (0u8..3).prop_map(f64::from),
        any::<bool>(),
        any::<bool>(),
    )
}

fn baseline_table(events: &[(f64, f64, f64, bool, bool)]) -> EventTable {
    let flag = |on: bool| if on { 1.0 } else { 0.0 };
    EventTable::from_columns(
        "baseline.parquet",
        vec![
            ("selCMet", Column::Scalar(events.iter().map(|e| e.0).collect())),
            ("evtFillWgt", Column::Scalar(events.iter().map(|e| e.1).collect())),
            ("nSelPhotons", Column::Scalar(events.iter().map(|e| e.2).collect())),
            ("hlt_flags", Column::Scalar(events.iter().map(|e| flag(e.3)).collect())),
            ("Flag_MetFilters", Column::Scalar(events.iter().map(|e| flag(e.4)).collect())),
        ],
    )
    .unwrap()
}

fn observation_set(values: &[f64]) -> ObservationSet {
    let mut set = ObservationSet::new("rjr_Ms");
    for &v in values {
        set.push("rjr_Ms", v, v * 2.0);
        set.push("HadronicSV_mass", v + 1.0, 1.0);
    }
    set
}

proptest! {
    #[test]
    fn mask_and_is_commutative(pairs in prop::collection::vec(any::<(bool, bool)>(), 0..64)) {
        let (a, b): (Vec<bool>, Vec<bool>) = pairs.into_iter().unzip();
        prop_assert_eq!(and_masks(&a, &b), and_masks(&b, &a));
        prop_assert_eq!(and_masks(&a, &a), a);
    }

    #[test]
    fn values_and_weights_stay_aligned(events in prop::collection::vec(event(), 1..32)) {
        let config = AnalysisConfig::default();
        let engine = ExtractionEngine::new(&config);
        let t = table(&events);
        let mask = engine.baseline_mask(&t);
        prop_assert_eq!(mask.len(), t.n_rows());

        if let Some(set) = engine.extract(&t, &mask, SampleKind::Simulation).unwrap() {
            for var in set.variables() {
                prop_assert_eq!(set.values(var).map(<[f64]>::len), set.weights_of(var).map(<[f64]>::len));
            }
        }
    }

    #[test]
    fn baseline_ignores_cut_order(
        events in prop::collection::vec(baseline_event(), 1..40),
        met_cut in 0.0..400.0f64,
        weight_cut in 0.0..20.0f64,
        order in Just((0..6).collect::<Vec<usize>>()).prop_shuffle(),
    ) {
        let t = baseline_table(&events);
        let flags = ["hlt_flags", "Flag_MetFilters"];
        let cuts = [
            ScalarCut::new("selCMet", CompareOp::Gt, met_cut),
            ScalarCut::new("evtFillWgt", CompareOp::Lt, weight_cut),
            ScalarCut::new("selCMet", CompareOp::Le, 380.0),
            ScalarCut::new("nSelPhotons", CompareOp::Ne, 2.0),
            ScalarCut::new(flags[0], CompareOp::Eq, 1.0),
            ScalarCut::new(flags[1], CompareOp::Eq, 1.0),
        ];

        // Scalar cuts first, flags applied afterwards as required flags.
        let declared = SelectionSpec {
            scalar_cuts: cuts[..4].to_vec(),
            required_flags: flags.iter().map(|f| f.to_string()).collect(),
            fallbacks: Vec::new(),
        };
        // The same conditions, all as scalar cuts in a shuffled order.
        let shuffled = SelectionSpec {
            scalar_cuts: order.iter().map(|&i| cuts[i].clone()).collect(),
            required_flags: Default::default(),
            fallbacks: Vec::new(),
        };

        let mask = declared.baseline_mask(&t);
        let expected: Vec<bool> = events
            .iter()
            .map(|e| e.0 > met_cut && e.0 <= 380.0 && e.1 < weight_cut && e.2 != 2.0 && e.3 && e.4)
            .collect();

        prop_assert_eq!(mask.len(), t.n_rows());
        prop_assert_eq!(&mask, &expected);
        prop_assert_eq!(&shuffled.baseline_mask(&t), &mask);
        prop_assert_eq!(&declared.baseline_mask(&t), &mask);
        prop_assert_eq!(and_masks(&mask, &mask), mask);
    }

    #[test]
    fn per_object_entries_are_flattened(
        events in prop::collection::vec(event(), 1..32),
        luminosity in 1.0..500.0f64,
    ) {
        let config = AnalysisConfig {
            luminosity,
            ..AnalysisConfig::default()
        };
        let engine = ExtractionEngine::new(&config);
        let t = table(&events);
        let mask = vec![true; events.len()];

        let qualifying: Vec<_> = events.iter().filter(|e| e.3).collect();
        let expected_values: Vec<f64> = qualifying
            .iter()
            .flat_map(|e| e.2.iter().copied())
            .collect();
        // Each event's own weight, once per object, contiguous and in object order.
        let expected_weights: Vec<f64> = qualifying
            .iter()
            .flat_map(|e| std::iter::repeat(e.1 * luminosity).take(e.2.len()))
            .collect();
        let event_weights: Vec<f64> = qualifying.iter().map(|e| e.1 * luminosity).collect();

        match engine.extract(&t, &mask, SampleKind::Simulation).unwrap() {
            Some(set) => {
                prop_assert_eq!(set.len(), qualifying.len());
                prop_assert_eq!(set.values("HadronicSV_mass").unwrap(), &expected_values[..]);
                prop_assert_eq!(set.weights_of("HadronicSV_mass").unwrap(), &expected_weights[..]);
                prop_assert_eq!(set.weights(), &event_weights[..]);
            }
            None => prop_assert!(qualifying.is_empty()),
        }

        let data = engine.extract(&t, &mask, SampleKind::Data).unwrap();
        if let Some(set) = data {
            prop_assert!(set.weights_of("HadronicSV_mass").unwrap().iter().all(|&w| w == 1.0));
        }
    }

    #[test]
    fn pooling_is_associative(
        a in prop::collection::vec(0.0..10.0f64, 1..8),
        b in prop::collection::vec(0.0..10.0f64, 1..8),
        c in prop::collection::vec(0.0..10.0f64, 1..8),
    ) {
        let mut all = FileResults::new();
        all.insert(PathBuf::from("a"), observation_set(&a));
        all.insert(PathBuf::from("b"), observation_set(&b));
        all.insert(PathBuf::from("c"), observation_set(&c));
        let at_once = combine("r", &all).unwrap();

        let mut first_two = FileResults::new();
        first_two.insert(PathBuf::from("a"), observation_set(&a));
        first_two.insert(PathBuf::from("b"), observation_set(&b));
        let mut stepwise = combine("r", &first_two).unwrap();
        stepwise.append(&observation_set(&c));

        prop_assert_eq!(at_once, stepwise);
    }
}

//! Batch-to-single-sample regression contract: posteriors written by a
//! batch run, fed back as priors to a single-sample run over the same
//! data, reproduce the calls and confidences exactly.

use std::collections::HashMap;

use luma_call::engine::{CallEngine, PriorSource};
use luma_call::io::output::MarkerResultWriter;
use luma_call::io::{MarkerSummary, SummaryData};
use luma_call::model::CallMethod;
use luma_call::{PosteriorFormat, PosteriorWriter, PriorStore};
use luma_core::Genotype;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

/// Three clean clusters per marker, 18 samples.
fn synthetic_summary(n_markers: usize, seed: u64) -> SummaryData {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = 18;
    let sample_ids = (0..n).map(|i| format!("s{i}")).collect();
    let markers = (0..n_markers)
        .map(|m| {
            let mut a = Vec::with_capacity(n);
            let mut b = Vec::with_capacity(n);
            for i in 0..n {
                let (base_a, base_b) = match i % 3 {
                    0 => (1500.0, 100.0), // AA
                    1 => (800.0, 800.0),  // AB
                    _ => (100.0, 1500.0), // BB
                };
                a.push(base_a + rng.gen::<f64>() * 60.0);
                b.push(base_b + rng.gen::<f64>() * 60.0);
            }
            MarkerSummary {
                id: format!("SNP_{m}"),
                a: Array1::from(a),
                b: Array1::from(b),
            }
        })
        .collect();
    SummaryData {
        sample_ids,
        markers,
    }
}

struct RunOutput {
    calls: Vec<Vec<Genotype>>,
    confidences: Vec<Vec<f64>>,
}

fn run_engine(
    engine: &CallEngine,
    data: &SummaryData,
    priors: PriorSource,
    posterior_path: Option<&std::path::Path>,
) -> RunOutput {
    let dir = tempdir().unwrap();
    let calls_path = dir.path().join("out.calls.tsv");
    let mut results =
        MarkerResultWriter::create(&calls_path, None, None, None, &data.sample_ids).unwrap();
    let mut posterior = posterior_path.map(|p| {
        PosteriorWriter::create(p, PosteriorFormat::Tabular, engine.params.cluster_dim).unwrap()
    });

    // Collect in-memory results alongside the file outputs.
    let mut calls = Vec::new();
    let mut confidences = Vec::new();
    let mut store_results = |marker: &luma_call::MarkerCalls| {
        calls.push(marker.calls.clone());
        confidences.push(marker.confidences.clone());
    };

    match priors {
        PriorSource::Indexed(store) => {
            for summary in &data.markers {
                let marker = engine
                    .classify_marker(summary, &data.sample_ids, |key, copy| {
                        store.lookup(key, copy).map(|d| Some(*d))
                    })
                    .unwrap();
                results.write(&marker).unwrap();
                if let Some(out) = posterior.as_mut() {
                    for (key, dist) in &marker.posteriors {
                        out.write(key, dist).unwrap();
                    }
                }
                store_results(&marker);
            }
        }
        _ => {
            for summary in &data.markers {
                let marker = engine
                    .classify_marker(summary, &data.sample_ids, |_, _| Ok(None))
                    .unwrap();
                results.write(&marker).unwrap();
                if let Some(out) = posterior.as_mut() {
                    for (key, dist) in &marker.posteriors {
                        out.write(key, dist).unwrap();
                    }
                }
                store_results(&marker);
            }
        }
    }
    if let Some(out) = posterior.as_mut() {
        out.flush().unwrap();
    }
    RunOutput { calls, confidences }
}

#[test]
fn posterior_round_trip_reproduces_calls_exactly() {
    let data = synthetic_summary(6, 42);
    let dir = tempdir().unwrap();
    let posterior_path = dir.path().join("batch.posteriors.tsv");

    // Batch phase: fit and write posteriors.
    let batch_engine = CallEngine::new(data.n_samples());
    let batch = run_engine(
        &batch_engine,
        &data,
        PriorSource::Defaults,
        Some(&posterior_path),
    );

    // Single-sample phase: same data, models from the batch phase, no fit.
    let mut single_engine = CallEngine::new(data.n_samples());
    single_engine.params.call_method = CallMethod::SingleSample;
    let store = PriorStore::from_path(&posterior_path).unwrap();
    assert_eq!(store.len(), data.n_markers());
    let single = run_engine(&single_engine, &data, PriorSource::Indexed(store), None);

    for m in 0..data.n_markers() {
        assert_eq!(batch.calls[m], single.calls[m], "marker {m} calls differ");
        for (s, (a, b)) in batch.confidences[m]
            .iter()
            .zip(&single.confidences[m])
            .enumerate()
        {
            assert_eq!(a, b, "marker {m} sample {s} confidence differs");
        }
    }
}

#[test]
fn confidences_stay_in_range_and_no_calls_are_zero() {
    let mut data = synthetic_summary(3, 7);
    // Park one sample of the last marker at the equal-cost point between
    // the default AB and AA clusters (contrast ~0.383): neither side can
    // claim it, so it must no-call under the score threshold.
    let last = data.markers.last_mut().unwrap();
    last.a[0] = 733.75;
    last.b[0] = 466.25;

    let mut engine = CallEngine::new(data.n_samples());
    engine.params.call_method = CallMethod::SingleSample;
    let out = run_engine(&engine, &data, PriorSource::Defaults, None);

    let mut saw_no_call = false;
    for (calls, confs) in out.calls.iter().zip(&out.confidences) {
        for (call, conf) in calls.iter().zip(confs) {
            assert!((0.0..=1.0).contains(conf));
            if *call == Genotype::NoCall {
                assert_eq!(*conf, 0.0);
                saw_no_call = true;
            }
        }
    }
    assert!(saw_no_call, "the boundary sample should have no-called");
    assert_eq!(out.calls[2][0], Genotype::NoCall);
}

#[test]
fn hints_do_not_move_clean_cluster_calls() {
    // A point deep inside the AA cluster keeps its call whatever the hint
    // or inbreeding settings say, when contradiction costs nothing.
    let data = synthetic_summary(1, 99);
    let baseline = CallEngine::new(data.n_samples());
    let base = run_engine(&baseline, &data, PriorSource::Defaults, None);

    let mut hinted = CallEngine::new(data.n_samples());
    hinted.params.use_hints = true;
    hinted.params.contradiction_penalty = 0.0;
    hinted.params.use_inbred_penalty = true;
    hinted.inbred = vec![0.4; data.n_samples()];
    let mut rows = HashMap::new();
    // Claim everything is BB.
    rows.insert("SNP_0".to_string(), vec![2i8; data.n_samples()]);
    hinted.hints = rows;

    let out = run_engine(&hinted, &data, PriorSource::Defaults, None);
    assert_eq!(base.calls[0], out.calls[0]);
}

//! Per-marker orchestration: transform, resolve copy-number subsets, fetch
//! priors, classify, merge, and stream results out in marker order.
//!
//! Markers fan out across threads only when priors are indexed (stateless
//! lookups); a sequential prior stream pins the whole run to the driving
//! marker order, since each read must match the marker being processed.
//! Posterior rows are always emitted from the ordered merge.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

use luma_core::{
    CopyNumber, CopyOverrideMap, Gender, Genotype, MarkerId, Result, SpecialSnpMap, TrustMap,
    UnknownGenderPolicy,
};
use rayon::prelude::*;

use crate::io::output::MarkerResultWriter;
use crate::io::{MarkerSummary, SummaryData};
use crate::model::label::{label_subset, LabelRequest};
use crate::model::{SnpDistribution, SnpParam};
use crate::priors::{PosteriorWriter, PriorStore, SequentialPriorReader};
use crate::resolver::{subsets, CopyNumberResolver};
use crate::transform::Transform;

/// Markers per parallel work unit.
const PAR_CHUNK: usize = 256;

/// Where marker models come from.
pub enum PriorSource {
    /// Run defaults for every marker.
    Defaults,
    /// Key-sorted table with generic fallbacks.
    Indexed(PriorStore),
    /// Strictly ordered stream, one record per marker (and per haploid
    /// subset). Forces serial marker processing.
    Sequential(SequentialPriorReader),
}

impl PriorSource {
    fn fetch(&mut self, key: &str, copy: u8) -> Result<Option<SnpDistribution>> {
        match self {
            PriorSource::Defaults => Ok(None),
            PriorSource::Indexed(store) => store.lookup(key, copy).map(|d| Some(*d)),
            PriorSource::Sequential(reader) => reader.next_model(key).map(Some),
        }
    }
}

/// Everything the engine produced for one marker.
#[derive(Clone, Debug)]
pub struct MarkerCalls {
    pub marker: String,
    pub calls: Vec<Genotype>,
    pub confidences: Vec<f64>,
    /// Per-sample [AA, AB, BB], when probability output is on.
    pub probabilities: Option<Vec<[f64; 3]>>,
    /// Standardized distance to [AA, AB, BB] cluster centers.
    pub distances: Vec<[f64; 3]>,
    /// Fitted posterior per processed subset, keyed for write-back.
    pub posteriors: Vec<(String, SnpDistribution)>,
}

/// Tallies reported at the end of a run.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    pub n_markers: usize,
    pub n_calls: usize,
    pub n_no_calls: usize,
}

/// The calling engine: run-wide configuration plus per-sample state.
pub struct CallEngine {
    pub params: SnpParam,
    pub transform: Transform,
    pub k: f64,
    pub genders: Vec<Gender>,
    pub policy: UnknownGenderPolicy,
    pub special: SpecialSnpMap,
    pub overrides: CopyOverrideMap,
    pub trust: TrustMap,
    pub trust_check: bool,
    pub hints: HashMap<MarkerId, Vec<i8>>,
    pub inbred: Vec<f64>,
    pub store_probabilities: bool,
    pub verbose: bool,
}

impl CallEngine {
    /// Engine with run defaults for `n_samples` samples: every gender
    /// unknown, no side tables.
    pub fn new(n_samples: usize) -> Self {
        CallEngine {
            params: SnpParam::default(),
            transform: Transform::CCS,
            k: crate::transform::DEFAULT_K,
            genders: vec![Gender::Unknown; n_samples],
            policy: UnknownGenderPolicy::MimicFemale,
            special: SpecialSnpMap::new(),
            overrides: CopyOverrideMap::new(),
            trust: TrustMap::new(),
            trust_check: false,
            hints: HashMap::new(),
            inbred: Vec::new(),
            store_probabilities: false,
            verbose: false,
        }
    }

    /// Classify one marker, pulling priors through `fetch`.
    pub fn classify_marker<F>(
        &self,
        summary: &MarkerSummary,
        sample_ids: &[String],
        mut fetch: F,
    ) -> Result<MarkerCalls>
    where
        F: FnMut(&str, u8) -> Result<Option<SnpDistribution>>,
    {
        let n = summary.a.len();
        let mut x: Vec<f64> = summary.a.to_vec();
        let mut y: Vec<f64> = summary.b.to_vec();
        self.transform.apply(&mut x, &mut y, self.k);

        let resolver = CopyNumberResolver::new(
            &self.special,
            &self.overrides,
            &self.trust,
            self.trust_check,
            self.policy,
        );
        let copies = resolver.resolve(&summary.id, &self.genders, sample_ids)?;

        // Init: everything starts as a no-call until a subset claims it.
        let mut result = MarkerCalls {
            marker: summary.id.clone(),
            calls: vec![Genotype::NoCall; n],
            confidences: vec![0.0; n],
            probabilities: if self.store_probabilities {
                Some(vec![[0.0; 3]; n])
            } else {
                None
            },
            distances: vec![[0.0; 3]; n],
            posteriors: Vec::new(),
        };

        let hint_row = self.hints.get(&summary.id);
        let inbred_all: &[f64] = if self.inbred.is_empty() {
            &[]
        } else {
            &self.inbred
        };

        for (copy, members) in subsets(&copies) {
            let mut tsp = self.params.clone();
            tsp.copy_number = copy;

            let key = match copy {
                CopyNumber::Haploid => format!("{}:1", summary.id),
                _ => summary.id.clone(),
            };
            if let Some(dist) = fetch(&key, copy.count())? {
                tsp.set_prior(&dist);
            }

            let tx: Vec<f64> = members.iter().map(|&i| x[i]).collect();
            let ty: Vec<f64> = members.iter().map(|&i| y[i]).collect();
            let thints: Vec<i8> = members
                .iter()
                .map(|&i| hint_row.map(|h| h[i]).unwrap_or(-1))
                .collect();
            let tinbred: Vec<f64> = members
                .iter()
                .map(|&i| if inbred_all.is_empty() { 0.0 } else { inbred_all[i] })
                .collect();

            let request = LabelRequest {
                x: &tx,
                y: &ty,
                hints: &thints,
                inbred: &tinbred,
            };
            let outcome = label_subset(&mut tsp, &request, self.store_probabilities);

            if !outcome.converged {
                eprintln!(
                    "Warning: fit for marker {} (copy number {}) did not stabilize; \
                     reporting no-calls for {} samples",
                    summary.id,
                    copy.count(),
                    members.len()
                );
                result.posteriors.push((key, tsp.posterior));
                continue;
            }

            for (slot, &i) in members.iter().enumerate() {
                result.calls[i] = outcome.calls[slot];
                result.confidences[i] = outcome.confidences[slot];
                result.distances[i] = [
                    tsp.posterior.aa.distance(tx[slot]),
                    tsp.posterior.ab.distance(tx[slot]),
                    tsp.posterior.bb.distance(tx[slot]),
                ];
            }
            if let (Some(store), Some(probs)) =
                (result.probabilities.as_mut(), outcome.probabilities.as_ref())
            {
                for (slot, &i) in members.iter().enumerate() {
                    store[i] = probs[slot];
                }
            }

            result.posteriors.push((key, tsp.posterior));
        }

        Ok(result)
    }

    /// Classify every marker of a summary batch, streaming rows (and
    /// posterior records) out in marker order.
    pub fn run(
        &self,
        data: &SummaryData,
        mut priors: PriorSource,
        results: &mut MarkerResultWriter,
        mut posterior_out: Option<&mut PosteriorWriter<BufWriter<File>>>,
    ) -> Result<RunStats> {
        let start = Instant::now();
        let mut last_report = Instant::now();
        let mut stats = RunStats::default();
        let sample_ids = &data.sample_ids;

        let mut emit = |marker: MarkerCalls,
                        posterior_out: &mut Option<&mut PosteriorWriter<BufWriter<File>>>,
                        stats: &mut RunStats|
         -> Result<()> {
            results.write(&marker)?;
            if let Some(out) = posterior_out.as_mut() {
                for (key, dist) in &marker.posteriors {
                    out.write(key, dist)?;
                }
            }
            stats.n_markers += 1;
            for call in &marker.calls {
                if call.is_called() {
                    stats.n_calls += 1;
                } else {
                    stats.n_no_calls += 1;
                }
            }
            Ok(())
        };

        if matches!(priors, PriorSource::Sequential(_)) {
            // The stream couples marker order to read order; stay serial.
            for summary in &data.markers {
                let marker = self.classify_marker(summary, sample_ids, |key, copy| {
                    priors.fetch(key, copy)
                })?;
                emit(marker, &mut posterior_out, &mut stats)?;
                self.maybe_report_progress(
                    stats.n_markers,
                    data.n_markers(),
                    &start,
                    &mut last_report,
                );
            }
        } else {
            // Indexed or default priors are stateless; fan out per chunk
            // and merge back in order.
            let store = match &priors {
                PriorSource::Indexed(store) => Some(store),
                _ => None,
            };
            for chunk in data.markers.chunks(PAR_CHUNK) {
                let batch: Vec<Result<MarkerCalls>> = chunk
                    .par_iter()
                    .map(|summary| {
                        self.classify_marker(summary, sample_ids, |key, copy| match store {
                            Some(store) => store.lookup(key, copy).map(|d| Some(*d)),
                            None => Ok(None),
                        })
                    })
                    .collect();
                for marker in batch {
                    emit(marker?, &mut posterior_out, &mut stats)?;
                }
                self.maybe_report_progress(
                    stats.n_markers,
                    data.n_markers(),
                    &start,
                    &mut last_report,
                );
            }
        }

        results.flush()?;
        if let Some(out) = posterior_out.as_mut() {
            out.flush()?;
        }
        Ok(stats)
    }

    fn maybe_report_progress(
        &self,
        processed: usize,
        total: usize,
        start: &Instant,
        last_report: &mut Instant,
    ) {
        if !self.verbose || last_report.elapsed().as_secs_f64() < 2.0 {
            return;
        }
        let elapsed = start.elapsed().as_secs_f64();
        let rate = processed as f64 / elapsed.max(1e-3);
        let pct = (processed as f64 / total.max(1) as f64) * 100.0;
        eprintln!(
            "Processed {}/{} markers ({:.1}%) in {:.1}s ({:.1} markers/s)",
            processed, total, pct, elapsed, rate
        );
        *last_report = Instant::now();
    }
}

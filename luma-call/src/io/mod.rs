//! Tabular inputs and outputs for the calling engine.
//!
//! Everything is tab-separated text; summary inputs may be gzipped.

pub mod output;
pub mod probes;
pub mod summary;
pub mod tables;

use ndarray::Array1;

/// Raw allele summaries for one marker: one value per sample and allele.
#[derive(Clone, Debug)]
pub struct MarkerSummary {
    pub id: String,
    pub a: Array1<f64>,
    pub b: Array1<f64>,
}

/// A whole summary file: sample order plus per-marker A/B vectors, in
/// file order (which drives the marker-processing order downstream).
#[derive(Clone, Debug)]
pub struct SummaryData {
    pub sample_ids: Vec<String>,
    pub markers: Vec<MarkerSummary>,
}

impl SummaryData {
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }
}

pub use probes::read_probe_summary;
pub use summary::read_summary;
pub use tables::{
    read_copy_overrides, read_genders, read_hints, read_inbred_penalties, read_special_snps,
    read_trust,
};

//! luma-call: Bayesian genotype calling for biallelic SNP arrays.
//!
//! The engine consumes per-sample allele-intensity summaries one marker at
//! a time, maps them into (contrast, strength) space, resolves each
//! sample's expected copy number, and assigns genotypes by blending a
//! per-marker prior with the observed cluster structure. Side analyses
//! reuse the same transformed data: probe-pair discrimination scoring and
//! EM-based gender calling from chromosome-X markers.

pub mod engine;
pub mod io;
pub mod math;
pub mod model;
pub mod priors;
pub mod resolver;
pub mod transform;

pub use engine::{CallEngine, MarkerCalls, PriorSource, RunStats};
pub use model::{CallMethod, ClusterDim, ClusterShape, SnpDistribution, SnpParam};
pub use priors::{PosteriorFormat, PosteriorWriter, PriorStore, SequentialPriorReader};
pub use transform::Transform;

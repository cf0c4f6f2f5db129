//! luma-core: shared data structures and error types for the luma toolkit.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

pub type SampleId = String;
pub type MarkerId = String;

/// Marker key used by the generic prior fallbacks.
pub const GENERIC_KEY: &str = "GENERIC";

/// One biallelic genotype call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Genotype {
    AA,
    AB,
    BB,
    NoCall,
}

impl Genotype {
    /// Integer code used in hint and call tables: 0/1/2, -1 for no-call.
    pub fn code(self) -> i8 {
        match self {
            Genotype::AA => 0,
            Genotype::AB => 1,
            Genotype::BB => 2,
            Genotype::NoCall => -1,
        }
    }

    /// Parse an integer code; any negative value means no-call.
    pub fn from_code(code: i8) -> Result<Genotype> {
        match code {
            0 => Ok(Genotype::AA),
            1 => Ok(Genotype::AB),
            2 => Ok(Genotype::BB),
            c if c < 0 => Ok(Genotype::NoCall),
            c => Err(CoreError::BadGenotypeCode { code: c }),
        }
    }

    pub fn is_called(self) -> bool {
        self != Genotype::NoCall
    }
}

/// Sample gender as used for copy-number resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    /// Parse a gender label from a sample table. Anything outside the
    /// recognized set is a fatal error naming the label.
    pub fn parse(label: &str) -> Result<Gender> {
        match label.to_ascii_lowercase().as_str() {
            "male" | "m" | "1" => Ok(Gender::Male),
            "female" | "f" | "2" => Ok(Gender::Female),
            "unknown" | "u" | "0" => Ok(Gender::Unknown),
            _ => Err(CoreError::UnknownGender {
                label: label.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

/// How samples of unknown gender are routed on markers with a
/// male/female copy-number exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownGenderPolicy {
    MimicMale,
    MimicFemale,
}

/// Expected cluster count for one sample at one marker.
///
/// `Untrusted` marks samples whose probes were rejected upstream; the
/// classifier never sees them and they are reported as no-calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyNumber {
    Diploid,
    Haploid,
    Untrusted,
}

impl CopyNumber {
    /// Numeric copy count, 0 for untrusted.
    pub fn count(self) -> u8 {
        match self {
            CopyNumber::Diploid => 2,
            CopyNumber::Haploid => 1,
            CopyNumber::Untrusted => 0,
        }
    }

    pub fn from_count(n: u8) -> Result<CopyNumber> {
        match n {
            2 => Ok(CopyNumber::Diploid),
            1 => Ok(CopyNumber::Haploid),
            0 => Ok(CopyNumber::Untrusted),
            _ => Err(CoreError::BadCopyNumber { value: n }),
        }
    }
}

/// Per-marker copy-number exception: (male copy, female copy).
#[derive(Clone, Copy, Debug)]
pub struct SpecialSnp {
    pub male_copy: u8,
    pub female_copy: u8,
}

impl Default for SpecialSnp {
    fn default() -> Self {
        SpecialSnp {
            male_copy: 2,
            female_copy: 2,
        }
    }
}

/// Marker-level copy-number exception table, typically chrX/chrY/MT markers.
pub type SpecialSnpMap = HashMap<MarkerId, SpecialSnp>;

/// Explicit per-marker, per-sample copy-number overrides (indexed by
/// sample position in the run's sample order).
pub type CopyOverrideMap = HashMap<MarkerId, Vec<u8>>;

/// Trusted-probe counts keyed by (sample, marker). Samples absent from the
/// map are trusted; a present count below one marks the pair untrusted.
#[derive(Clone, Debug, Default)]
pub struct TrustMap {
    counts: HashMap<(SampleId, MarkerId), u32>,
}

impl TrustMap {
    pub fn new() -> Self {
        TrustMap::default()
    }

    /// Record one (sample, marker) trust count. Duplicate keys are a fatal
    /// load-time error.
    pub fn insert(
        &mut self,
        sample: SampleId,
        marker: MarkerId,
        count: u32,
    ) -> Result<()> {
        let key = (sample, marker);
        if self.counts.contains_key(&key) {
            return Err(CoreError::DuplicateTrustKey {
                sample: key.0,
                marker: key.1,
            });
        }
        self.counts.insert(key, count);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether a sample has any trusted probes at a marker. Pairs not in
    /// the map are trusted by convention.
    pub fn is_trusted(&self, sample: &str, marker: &str) -> bool {
        match self
            .counts
            .get(&(sample.to_string(), marker.to_string()))
        {
            Some(&count) => count >= 1,
            None => true,
        }
    }
}

/// Errors shared across the luma crates.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No exact, copy-number fallback, or generic prior exists for a marker.
    #[error("no model for marker: {marker}")]
    ModelNotFound { marker: String },

    /// A streamed prior arrived out of order.
    #[error("sequential prior mismatch: expecting {expected} but got {found}")]
    SequentialMismatch { expected: String, found: String },

    /// The sequential prior stream ended before the marker list did.
    #[error("sequential prior stream exhausted: expecting model for {expected}")]
    SequentialExhausted { expected: String },

    /// Gender label outside {male, female, unknown}.
    #[error("unknown gender label: {label}")]
    UnknownGender { label: String },

    /// Two trust rows for the same sample+marker.
    #[error("duplicate trust entry for sample {sample}, marker {marker}")]
    DuplicateTrustKey { sample: String, marker: String },

    /// Probe discrimination needs at least two established calls.
    #[error("at least two valid calls are needed to score probes for marker {marker}")]
    InsufficientCalls { marker: String },

    #[error("genotype code {code} out of range, expected -1, 0, 1 or 2")]
    BadGenotypeCode { code: i8 },

    #[error("copy number {value} out of range, expected 0, 1 or 2")]
    BadCopyNumber { value: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        CoreError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genotype_codes_round_trip() {
        for g in [Genotype::AA, Genotype::AB, Genotype::BB, Genotype::NoCall] {
            assert_eq!(Genotype::from_code(g.code()).unwrap(), g);
        }
        assert!(Genotype::from_code(3).is_err());
        assert_eq!(Genotype::from_code(-9).unwrap(), Genotype::NoCall);
    }

    #[test]
    fn gender_parse_rejects_junk() {
        assert_eq!(Gender::parse("Male").unwrap(), Gender::Male);
        assert_eq!(Gender::parse("F").unwrap(), Gender::Female);
        let err = Gender::parse("hermaphrodite").unwrap_err();
        assert!(err.to_string().contains("hermaphrodite"));
    }

    #[test]
    fn trust_map_rejects_duplicates() {
        let mut trust = TrustMap::new();
        trust
            .insert("s1".to_string(), "SNP_1".to_string(), 3)
            .unwrap();
        let err = trust
            .insert("s1".to_string(), "SNP_1".to_string(), 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTrustKey { .. }));
        assert!(trust.is_trusted("s1", "SNP_1"));
        assert!(trust.is_trusted("s2", "SNP_1"));
    }

    #[test]
    fn zero_count_is_untrusted() {
        let mut trust = TrustMap::new();
        trust
            .insert("s1".to_string(), "SNP_1".to_string(), 0)
            .unwrap();
        assert!(!trust.is_trusted("s1", "SNP_1"));
    }
}

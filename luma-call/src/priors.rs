//! Prior/posterior model storage and streaming.
//!
//! Models travel as tab-separated rows `id  BB  AB  AA  CV`, where each
//! cluster field packs 4 (contrast-only) or 7 (contrast+strength) comma
//! separated numbers and CV packs the 3 or 12 between-cluster terms. The
//! same row shape serves the indexed store, the sequential stream, and the
//! tabular posterior output, so a posterior file can be fed straight back
//! in as a prior file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use luma_core::{CoreError, Result, GENERIC_KEY};

use crate::model::{ClusterDim, ClusterShape, SnpDistribution};

/// Pack one cluster as comma-separated text.
fn pack_cluster(c: &ClusterShape, dim: ClusterDim) -> String {
    // Normalize negative zero so rows compare cleanly.
    let m = if c.m == 0.0 { 0.0 } else { c.m };
    match dim {
        ClusterDim::One => format!("{},{},{},{}", m, c.ss, c.k, c.v),
        ClusterDim::Two => {
            let xy = if c.xyss == 0.0 { 0.0 } else { c.xyss };
            format!("{},{},{},{},{},{},{}", m, c.ss, c.k, c.v, c.ym, c.yss, xy)
        }
    }
}

fn pack_cross(d: &SnpDistribution, dim: ClusterDim) -> String {
    match dim {
        ClusterDim::One => format!("{},{},{}", d.xah, d.xab, d.xhb),
        ClusterDim::Two => format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            d.xah,
            d.xab,
            d.xhb,
            d.yah,
            d.yab,
            d.yhb,
            d.xyah,
            d.xyab,
            d.xyhb,
            d.yxah,
            d.yxab,
            d.yxhb
        ),
    }
}

fn parse_fields(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|w| {
            w.trim().parse::<f64>().map_err(|_| {
                CoreError::config(format!("bad number '{}' in model field '{}'", w, s))
            })
        })
        .collect()
}

/// Parse one packed cluster field (4 or 7 values).
fn parse_cluster(s: &str) -> Result<ClusterShape> {
    let vals = parse_fields(s)?;
    match vals.len() {
        4 => Ok(ClusterShape::new(vals[0], vals[1], vals[2], vals[3], 0.0, 0.0, 0.0)),
        7 => Ok(ClusterShape::new(
            vals[0], vals[1], vals[2], vals[3], vals[4], vals[5], vals[6],
        )),
        n => Err(CoreError::config(format!(
            "misformatted cluster field '{}': has {} values, expected 4 or 7",
            s, n
        ))),
    }
}

/// Parse the packed between-cluster field (3 or 12 values).
fn parse_cross(dist: &mut SnpDistribution, s: &str) -> Result<()> {
    let vals = parse_fields(s)?;
    match vals.len() {
        3 | 12 => {
            dist.xah = vals[0];
            dist.xab = vals[1];
            dist.xhb = vals[2];
            if vals.len() == 12 {
                dist.yah = vals[3];
                dist.yab = vals[4];
                dist.yhb = vals[5];
                dist.xyah = vals[6];
                dist.xyab = vals[7];
                dist.xyhb = vals[8];
                dist.yxah = vals[9];
                dist.yxab = vals[10];
                dist.yxhb = vals[11];
            }
            Ok(())
        }
        n => Err(CoreError::config(format!(
            "misformatted covariance field '{}': has {} values, expected 3 or 12",
            s, n
        ))),
    }
}

/// Build a distribution from the four packed row fields.
pub fn distribution_from_strings(
    bb: &str,
    ab: &str,
    aa: &str,
    cv: &str,
) -> Result<SnpDistribution> {
    let mut dist = SnpDistribution::zeroed();
    dist.bb = parse_cluster(bb)?;
    dist.ab = parse_cluster(ab)?;
    dist.aa = parse_cluster(aa)?;
    parse_cross(&mut dist, cv)?;
    Ok(dist)
}

fn open_model_reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(file))
}

const COLUMNS: [&str; 5] = ["id", "BB", "AB", "AA", "CV"];

fn row_to_entry(
    record: &csv::StringRecord,
    path: &Path,
    line: usize,
) -> Result<(String, SnpDistribution)> {
    if record.len() < 5 {
        return Err(CoreError::parse(
            path,
            line,
            format!("expected 5 columns (id, BB, AB, AA, CV), got {}", record.len()),
        ));
    }
    let dist = distribution_from_strings(&record[1], &record[2], &record[3], &record[4])?;
    Ok((record[0].to_string(), dist))
}

/// Key-sorted, read-only model table with generic fallbacks.
#[derive(Clone, Debug, Default)]
pub struct PriorStore {
    entries: Vec<(String, SnpDistribution)>,
}

impl PriorStore {
    pub fn new() -> Self {
        PriorStore::default()
    }

    /// Load and sort an indexed prior file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = open_model_reader(path)?;
        let mut entries = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
            entries.push(row_to_entry(&record, path, idx + 2)?);
        }
        Ok(PriorStore::from_entries(entries))
    }

    pub fn from_entries(mut entries: Vec<(String, SnpDistribution)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        PriorStore { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn find(&self, key: &str) -> Option<&SnpDistribution> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Look up a marker's model: exact key, then `GENERIC:<cn>` for
    /// reduced copy numbers, then `GENERIC`, then fail naming the marker.
    pub fn lookup(&self, marker_key: &str, copy_number: u8) -> Result<&SnpDistribution> {
        if let Some(dist) = self.find(marker_key) {
            return Ok(dist);
        }
        if copy_number < 2 {
            if let Some(dist) = self.find(&format!("{}:{}", GENERIC_KEY, copy_number)) {
                return Ok(dist);
            }
        }
        if let Some(dist) = self.find(GENERIC_KEY) {
            return Ok(dist);
        }
        Err(CoreError::ModelNotFound {
            marker: marker_key.to_string(),
        })
    }
}

/// Strictly ordered prior stream: one record per marker, in the caller's
/// marker order. Owns its cursor; one reader per run.
pub struct SequentialPriorReader {
    records: csv::StringRecordsIntoIter<File>,
    path: PathBuf,
    line: usize,
}

impl SequentialPriorReader {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = open_model_reader(path)?;
        Ok(SequentialPriorReader {
            records: reader.into_records(),
            path: path.to_path_buf(),
            line: 1,
        })
    }

    /// Read the next model, which must belong to `expected_key`.
    pub fn next_model(&mut self, expected_key: &str) -> Result<SnpDistribution> {
        self.line += 1;
        match self.records.next() {
            Some(record) => {
                let record =
                    record.map_err(|e| CoreError::parse(&self.path, self.line, e.to_string()))?;
                let (id, dist) = row_to_entry(&record, &self.path, self.line)?;
                if id != expected_key {
                    return Err(CoreError::SequentialMismatch {
                        expected: expected_key.to_string(),
                        found: id,
                    });
                }
                Ok(dist)
            }
            None => Err(CoreError::SequentialExhausted {
                expected: expected_key.to_string(),
            }),
        }
    }
}

/// On-disk posterior layout, fixed for the whole run at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PosteriorFormat {
    /// Same row shape as the prior input; feeds back in as a prior file.
    Tabular,
    /// One named column per model field, for copy-number-aware runs.
    Structured,
}

/// Append-only, single-writer posterior channel.
pub struct PosteriorWriter<W: Write> {
    out: W,
    format: PosteriorFormat,
    dim: ClusterDim,
}

impl PosteriorWriter<BufWriter<File>> {
    pub fn create(path: &Path, format: PosteriorFormat, dim: ClusterDim) -> Result<Self> {
        let out = BufWriter::new(File::create(path)?);
        PosteriorWriter::from_writer(out, format, dim)
    }
}

impl<W: Write> PosteriorWriter<W> {
    pub fn from_writer(mut out: W, format: PosteriorFormat, dim: ClusterDim) -> Result<Self> {
        match format {
            PosteriorFormat::Tabular => {
                writeln!(out, "{}", COLUMNS.join("\t"))?;
            }
            PosteriorFormat::Structured => {
                let mut cols = vec!["id".to_string()];
                for cluster in ["Cluster_AA", "Cluster_AB", "Cluster_BB"] {
                    let fields: &[&str] = match dim {
                        ClusterDim::One => &["m", "ss", "k", "v"],
                        ClusterDim::Two => &["m", "ss", "k", "v", "ym", "yss", "xyss"],
                    };
                    for f in fields {
                        cols.push(format!("{cluster}.{f}"));
                    }
                }
                let cross: &[&str] = match dim {
                    ClusterDim::One => &["xah", "xab", "xhb"],
                    ClusterDim::Two => &[
                        "xah", "xab", "xhb", "yah", "yab", "yhb", "xyah", "xyab", "xyhb",
                        "yxah", "yxab", "yxhb",
                    ],
                };
                for f in cross {
                    cols.push(format!("Cross.{f}"));
                }
                writeln!(out, "{}", cols.join("\t"))?;
            }
        }
        Ok(PosteriorWriter { out, format, dim })
    }

    /// Append one marker's fitted model.
    pub fn write(&mut self, marker_key: &str, dist: &SnpDistribution) -> Result<()> {
        match self.format {
            PosteriorFormat::Tabular => {
                writeln!(
                    self.out,
                    "{}\t{}\t{}\t{}\t{}",
                    marker_key,
                    pack_cluster(&dist.bb, self.dim),
                    pack_cluster(&dist.ab, self.dim),
                    pack_cluster(&dist.aa, self.dim),
                    pack_cross(dist, self.dim),
                )?;
            }
            PosteriorFormat::Structured => {
                write!(self.out, "{}", marker_key)?;
                for c in [&dist.aa, &dist.ab, &dist.bb] {
                    write!(self.out, "\t{}\t{}\t{}\t{}", c.m, c.ss, c.k, c.v)?;
                    if self.dim == ClusterDim::Two {
                        write!(self.out, "\t{}\t{}\t{}", c.ym, c.yss, c.xyss)?;
                    }
                }
                write!(self.out, "\t{}\t{}\t{}", dist.xah, dist.xab, dist.xhb)?;
                if self.dim == ClusterDim::Two {
                    write!(
                        self.out,
                        "\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                        dist.yah,
                        dist.yab,
                        dist.yhb,
                        dist.xyah,
                        dist.xyab,
                        dist.xyhb,
                        dist.yxah,
                        dist.yxab,
                        dist.yxhb
                    )?;
                }
                writeln!(self.out)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_prior_file(rows: &[(&str, &SnpDistribution)], dim: ClusterDim) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut writer =
            PosteriorWriter::from_writer(file.reopen().unwrap(), PosteriorFormat::Tabular, dim)
                .unwrap();
        for (id, dist) in rows {
            writer.write(id, dist).unwrap();
        }
        writer.flush().unwrap();
        file
    }

    #[test]
    fn lookup_falls_back_in_order() {
        let named = SnpDistribution {
            aa: ClusterShape::new(0.5, 0.01, 4.0, 10.0, 0.0, 0.0, 0.0),
            ..SnpDistribution::default()
        };
        let haploid_generic = SnpDistribution {
            aa: ClusterShape::new(0.7, 0.01, 4.0, 10.0, 0.0, 0.0, 0.0),
            ..SnpDistribution::default()
        };
        let generic = SnpDistribution::default();
        let store = PriorStore::from_entries(vec![
            ("SNP_5".to_string(), named),
            ("GENERIC:1".to_string(), haploid_generic),
            ("GENERIC".to_string(), generic),
        ]);

        assert_eq!(store.lookup("SNP_5", 2).unwrap().aa.m, 0.5);
        // Unknown haploid marker falls to GENERIC:1.
        assert_eq!(store.lookup("SNP_9:1", 1).unwrap().aa.m, 0.7);
        // Unknown diploid marker skips GENERIC:<cn> and lands on GENERIC.
        assert_eq!(store.lookup("SNP_9", 2).unwrap().aa.m, 0.66);
    }

    #[test]
    fn missing_model_names_the_marker() {
        let store = PriorStore::from_entries(vec![(
            "SNP_1".to_string(),
            SnpDistribution::default(),
        )]);
        let err = store.lookup("SNP_404", 2).unwrap_err();
        assert!(matches!(err, CoreError::ModelNotFound { .. }));
        assert!(err.to_string().contains("SNP_404"));
    }

    #[test]
    fn tabular_rows_round_trip() {
        let mut dist = SnpDistribution::default();
        dist.aa.m = 0.61234567891;
        dist.xah = -0.25;
        let file = write_prior_file(&[("SNP_7", &dist)], ClusterDim::One);
        let store = PriorStore::from_path(file.path()).unwrap();
        let back = store.lookup("SNP_7", 2).unwrap();
        assert_eq!(back.aa.m, dist.aa.m);
        assert_eq!(back.xah, -0.25);
        // 1-D rows carry no strength fields.
        assert_eq!(back.aa.ym, 0.0);
    }

    #[test]
    fn two_dim_rows_round_trip() {
        let mut dist = SnpDistribution::default();
        dist.ab.xyss = 0.0125;
        dist.yxhb = -0.5;
        let file = write_prior_file(&[("SNP_8", &dist)], ClusterDim::Two);
        let store = PriorStore::from_path(file.path()).unwrap();
        let back = store.lookup("SNP_8", 2).unwrap();
        assert_eq!(back.ab.xyss, 0.0125);
        assert_eq!(back.yxhb, -0.5);
        assert_eq!(back.aa.ym, 9.0);
    }

    #[test]
    fn sequential_reader_enforces_order() {
        let d = SnpDistribution::default();
        let file = write_prior_file(&[("SNP_1", &d), ("SNP_2", &d)], ClusterDim::One);

        let mut reader = SequentialPriorReader::open(file.path()).unwrap();
        assert!(reader.next_model("SNP_1").is_ok());
        let err = reader.next_model("SNP_9").unwrap_err();
        match err {
            CoreError::SequentialMismatch { expected, found } => {
                assert_eq!(expected, "SNP_9");
                assert_eq!(found, "SNP_2");
            }
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn exhausted_stream_is_fatal() {
        let d = SnpDistribution::default();
        let file = write_prior_file(&[("SNP_1", &d)], ClusterDim::One);
        let mut reader = SequentialPriorReader::open(file.path()).unwrap();
        reader.next_model("SNP_1").unwrap();
        let err = reader.next_model("SNP_2").unwrap_err();
        assert!(matches!(err, CoreError::SequentialExhausted { .. }));
    }

    #[test]
    fn malformed_cluster_field_is_rejected() {
        let err = distribution_from_strings("1,2", "0,0.01,0.2,10", "0.66,0.005,4,10", "0,0,0")
            .unwrap_err();
        assert!(err.to_string().contains("expected 4 or 7"));
    }
}

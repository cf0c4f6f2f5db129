//! Reader for allele-summary tables.
//!
//! Layout: a header of `probeset_id  allele  <sample...>`, then two rows
//! per marker (allele A first, then B) of per-sample summary values.
//! Gzipped files are detected by extension.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use luma_core::{CoreError, Result};
use ndarray::Array1;

use super::{MarkerSummary, SummaryData};

fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let is_gz = path
        .extension()
        .map(|e| e == "gz" || e == "bgz")
        .unwrap_or(false);
    let reader: Box<dyn Read + Send> = if is_gz {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

fn parse_values(fields: &[&str], path: &Path, line_no: usize, n: usize) -> Result<Array1<f64>> {
    if fields.len() != n {
        return Err(CoreError::parse(
            path,
            line_no,
            format!("expected {} sample values, got {}", n, fields.len()),
        ));
    }
    let mut vals = Vec::with_capacity(n);
    for f in fields {
        let v: f64 = f.trim().parse().map_err(|_| {
            CoreError::parse(path, line_no, format!("bad summary value '{}'", f))
        })?;
        vals.push(v);
    }
    Ok(Array1::from(vals))
}

/// Read a whole summary file into memory, preserving marker order.
pub fn read_summary(path: &Path) -> Result<SummaryData> {
    let reader = open_maybe_gz(path)?;
    let mut lines = reader.lines().enumerate();

    let (_, header) = lines
        .next()
        .ok_or_else(|| CoreError::parse(path, 1, "empty summary file"))?;
    let header = header?;
    let header_fields: Vec<&str> = header.trim_end().split('\t').collect();
    if header_fields.len() < 3 || header_fields[0] != "probeset_id" || header_fields[1] != "allele"
    {
        return Err(CoreError::parse(
            path,
            1,
            "summary header must start with 'probeset_id\\tallele' followed by sample ids",
        ));
    }
    let sample_ids: Vec<String> = header_fields[2..].iter().map(|s| s.to_string()).collect();
    let n = sample_ids.len();

    let mut markers = Vec::new();
    let mut pending: Option<(String, Array1<f64>, usize)> = None;

    for (idx, line) in lines {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() < 2 {
            return Err(CoreError::parse(path, line_no, "expected id, allele, values"));
        }
        let id = fields[0].to_string();
        let allele = fields[1].trim();
        let values = parse_values(&fields[2..], path, line_no, n)?;

        match allele {
            "A" => {
                if let Some((prev, _, prev_line)) = &pending {
                    return Err(CoreError::parse(
                        path,
                        *prev_line,
                        format!("marker {} has an A row but no B row", prev),
                    ));
                }
                pending = Some((id, values, line_no));
            }
            "B" => match pending.take() {
                Some((a_id, a_vals, a_line)) => {
                    if a_id != id {
                        return Err(CoreError::parse(
                            path,
                            a_line,
                            format!("allele rows interleaved: {} then {}", a_id, id),
                        ));
                    }
                    markers.push(MarkerSummary {
                        id,
                        a: a_vals,
                        b: values,
                    });
                }
                None => {
                    return Err(CoreError::parse(
                        path,
                        line_no,
                        format!("marker {} has a B row before its A row", id),
                    ));
                }
            },
            other => {
                return Err(CoreError::parse(
                    path,
                    line_no,
                    format!("allele must be A or B, got '{}'", other),
                ));
            }
        }
    }
    if let Some((id, _, line_no)) = pending {
        return Err(CoreError::parse(
            path,
            line_no,
            format!("marker {} has an A row but no B row", id),
        ));
    }

    Ok(SummaryData {
        sample_ids,
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn summary_file(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn reads_paired_rows_in_order() {
        let f = summary_file(
            "probeset_id\tallele\ts1\ts2\n\
             SNP_1\tA\t1200\t80\n\
             SNP_1\tB\t100\t1500\n\
             SNP_2\tA\t700\t650\n\
             SNP_2\tB\t720\t640\n",
        );
        let data = read_summary(f.path()).unwrap();
        assert_eq!(data.sample_ids, vec!["s1", "s2"]);
        assert_eq!(data.n_markers(), 2);
        assert_eq!(data.markers[0].id, "SNP_1");
        assert_eq!(data.markers[0].a[0], 1200.0);
        assert_eq!(data.markers[1].b[1], 640.0);
    }

    #[test]
    fn rejects_missing_b_row() {
        let f = summary_file(
            "probeset_id\tallele\ts1\n\
             SNP_1\tA\t1200\n\
             SNP_2\tA\t700\n",
        );
        let err = read_summary(f.path()).unwrap_err();
        assert!(err.to_string().contains("no B row"));
    }

    #[test]
    fn rejects_ragged_rows() {
        let f = summary_file(
            "probeset_id\tallele\ts1\ts2\n\
             SNP_1\tA\t1200\n",
        );
        let err = read_summary(f.path()).unwrap_err();
        assert!(err.to_string().contains("expected 2 sample values"));
    }
}

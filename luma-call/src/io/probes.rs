//! Reader for probe-level summary tables used by probe discrimination
//! scoring: one row per probe pair and allele.
//!
//! Layout: header `probeset_id  probe_index  allele  <sample...>`, then
//! paired A/B rows per probe index, grouped by marker.

use std::collections::HashMap;
use std::path::Path;

use luma_core::{CoreError, Result};
use ndarray::Array2;

/// All probe pairs of one marker: (probe pair x sample) matrices.
#[derive(Clone, Debug)]
pub struct MarkerProbes {
    pub id: String,
    pub a: Array2<f64>,
    pub b: Array2<f64>,
}

/// A probe-level file: sample order plus per-marker probe matrices, in
/// file order.
#[derive(Clone, Debug)]
pub struct ProbeData {
    pub sample_ids: Vec<String>,
    pub markers: Vec<MarkerProbes>,
}

pub fn read_probe_summary(path: &Path) -> Result<ProbeData> {
    let file = std::fs::File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(file);

    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    let cols: Vec<&str> = headers.iter().collect();
    if cols.len() < 4 || cols[0] != "probeset_id" || cols[1] != "probe_index" || cols[2] != "allele"
    {
        return Err(CoreError::parse(
            path,
            1,
            "probe header must start with 'probeset_id\\tprobe_index\\tallele'",
        ));
    }
    let sample_ids: Vec<String> = cols[3..].iter().map(|s| s.to_string()).collect();
    let n = sample_ids.len();

    // Gather rows per marker, keyed (probe_index, allele).
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Vec<(usize, char, Vec<f64>)>> = HashMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let marker = record[0].to_string();
        let probe_index: usize = record[1].trim().parse().map_err(|_| {
            CoreError::parse(path, idx + 2, format!("bad probe index '{}'", &record[1]))
        })?;
        let allele = match record[2].trim() {
            "A" => 'A',
            "B" => 'B',
            other => {
                return Err(CoreError::parse(
                    path,
                    idx + 2,
                    format!("allele must be A or B, got '{}'", other),
                ))
            }
        };
        let mut values = Vec::with_capacity(n);
        for f in record.iter().skip(3) {
            let v: f64 = f.trim().parse().map_err(|_| {
                CoreError::parse(path, idx + 2, format!("bad probe value '{}'", f))
            })?;
            values.push(v);
        }
        if values.len() != n {
            return Err(CoreError::parse(
                path,
                idx + 2,
                format!("expected {} sample values, got {}", n, values.len()),
            ));
        }
        if !rows.contains_key(&marker) {
            order.push(marker.clone());
        }
        rows.entry(marker).or_default().push((probe_index, allele, values));
    }

    let mut markers = Vec::with_capacity(order.len());
    for id in order {
        let Some(mut entries) = rows.remove(&id) else {
            continue;
        };
        entries.sort_by_key(|(idx, allele, _)| (*idx, *allele));
        let n_probes = entries.iter().map(|(idx, _, _)| idx + 1).max().unwrap_or(0);

        let mut a = Array2::zeros((n_probes, n));
        let mut b = Array2::zeros((n_probes, n));
        let mut seen = vec![(false, false); n_probes];
        for (idx, allele, values) in entries {
            let target = if allele == 'A' { &mut a } else { &mut b };
            for (s, v) in values.into_iter().enumerate() {
                target[(idx, s)] = v;
            }
            if allele == 'A' {
                seen[idx].0 = true;
            } else {
                seen[idx].1 = true;
            }
        }
        for (idx, (has_a, has_b)) in seen.iter().enumerate() {
            if !has_a || !has_b {
                return Err(CoreError::config(format!(
                    "marker {} probe {} is missing its {} row",
                    id,
                    idx,
                    if *has_a { "B" } else { "A" }
                )));
            }
        }
        markers.push(MarkerProbes { id, a, b });
    }

    Ok(ProbeData {
        sample_ids,
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_probe_matrices() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(
            b"probeset_id\tprobe_index\tallele\ts1\ts2\n\
              SNP_1\t0\tA\t100\t200\n\
              SNP_1\t0\tB\t300\t400\n\
              SNP_1\t1\tA\t110\t210\n\
              SNP_1\t1\tB\t310\t410\n",
        )
        .unwrap();
        f.flush().unwrap();
        let data = read_probe_summary(f.path()).unwrap();
        assert_eq!(data.sample_ids, vec!["s1", "s2"]);
        assert_eq!(data.markers.len(), 1);
        let m = &data.markers[0];
        assert_eq!(m.a.dim(), (2, 2));
        assert_eq!(m.a[(1, 0)], 110.0);
        assert_eq!(m.b[(0, 1)], 400.0);
    }

    #[test]
    fn missing_allele_row_is_fatal() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(
            b"probeset_id\tprobe_index\tallele\ts1\n\
              SNP_1\t0\tA\t100\n",
        )
        .unwrap();
        f.flush().unwrap();
        assert!(read_probe_summary(f.path()).is_err());
    }
}

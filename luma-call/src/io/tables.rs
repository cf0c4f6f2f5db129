//! Readers for the small side tables: hints, trust, special markers,
//! per-sample copy overrides, genders and inbreeding penalties.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use luma_core::{
    CopyOverrideMap, CoreError, Gender, MarkerId, Result, SpecialSnp, SpecialSnpMap, TrustMap,
};

fn tsv_reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(file))
}

fn column(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| CoreError::parse(path, 1, format!("missing required column '{}'", name)))
}

/// Hints: `probeset_id` plus one code column per sample (-1/0/1/2).
pub fn read_hints(path: &Path, n_samples: usize) -> Result<HashMap<MarkerId, Vec<i8>>> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    if headers.len() != n_samples + 1 {
        return Err(CoreError::parse(
            path,
            1,
            format!(
                "hints header has {} sample columns, run has {} samples",
                headers.len().saturating_sub(1),
                n_samples
            ),
        ));
    }
    let mut hints = HashMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let marker = record[0].to_string();
        let mut codes = Vec::with_capacity(n_samples);
        for f in record.iter().skip(1) {
            let code: i8 = f.trim().parse().map_err(|_| {
                CoreError::parse(path, idx + 2, format!("bad genotype code '{}'", f))
            })?;
            if code > 2 {
                return Err(CoreError::parse(
                    path,
                    idx + 2,
                    format!("genotype code {} out of range", code),
                ));
            }
            codes.push(code);
        }
        if codes.len() != n_samples {
            return Err(CoreError::parse(
                path,
                idx + 2,
                format!("expected {} codes, got {}", n_samples, codes.len()),
            ));
        }
        hints.insert(marker, codes);
    }
    Ok(hints)
}

/// Trust counts: rows of (sample_id, probeset_id, trust_count). Duplicate
/// keys abort the load.
pub fn read_trust(path: &Path) -> Result<TrustMap> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    let sample_col = column(&headers, "sample_id", path)?;
    let marker_col = column(&headers, "probeset_id", path)?;
    let count_col = column(&headers, "trust_count", path)?;

    let mut trust = TrustMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let count: u32 = record[count_col].trim().parse().map_err(|_| {
            CoreError::parse(
                path,
                idx + 2,
                format!("bad trust count '{}'", &record[count_col]),
            )
        })?;
        trust.insert(
            record[sample_col].to_string(),
            record[marker_col].to_string(),
            count,
        )?;
    }
    Ok(trust)
}

/// Special markers: rows of (probeset_id, chr, copy_male, copy_female).
pub fn read_special_snps(path: &Path) -> Result<SpecialSnpMap> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    let marker_col = column(&headers, "probeset_id", path)?;
    let male_col = column(&headers, "copy_male", path)?;
    let female_col = column(&headers, "copy_female", path)?;

    let mut map = SpecialSnpMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let male_copy: u8 = record[male_col].trim().parse().map_err(|_| {
            CoreError::parse(path, idx + 2, format!("bad copy '{}'", &record[male_col]))
        })?;
        let female_copy: u8 = record[female_col].trim().parse().map_err(|_| {
            CoreError::parse(path, idx + 2, format!("bad copy '{}'", &record[female_col]))
        })?;
        map.insert(
            record[marker_col].to_string(),
            SpecialSnp {
                male_copy,
                female_copy,
            },
        );
    }
    Ok(map)
}

/// Per-sample copy overrides: header `sample_id <marker...>`, one row per
/// sample. Rows are matched to the run's sample order; every run sample
/// must appear.
pub fn read_copy_overrides(path: &Path, sample_ids: &[String]) -> Result<CopyOverrideMap> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    if headers.get(0) != Some("sample_id") {
        return Err(CoreError::parse(
            path,
            1,
            "first column of the copy-number file must be sample_id",
        ));
    }
    let markers: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();

    let mut by_sample: HashMap<String, Vec<u8>> = HashMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let mut row = Vec::with_capacity(markers.len());
        for f in record.iter().skip(1) {
            let v: u8 = f.trim().parse().map_err(|_| {
                CoreError::parse(path, idx + 2, format!("bad copy number '{}'", f))
            })?;
            row.push(v);
        }
        if row.len() != markers.len() {
            return Err(CoreError::parse(
                path,
                idx + 2,
                format!("expected {} copy values, got {}", markers.len(), row.len()),
            ));
        }
        by_sample.insert(record[0].to_string(), row);
    }

    let mut map = CopyOverrideMap::new();
    for (m_idx, marker) in markers.iter().enumerate() {
        let mut per_sample = Vec::with_capacity(sample_ids.len());
        for sample in sample_ids {
            let row = by_sample.get(sample).ok_or_else(|| {
                CoreError::config(format!(
                    "copy-number file {} has no row for sample {}",
                    path.display(),
                    sample
                ))
            })?;
            per_sample.push(row[m_idx]);
        }
        map.insert(marker.clone(), per_sample);
    }
    Ok(map)
}

/// Genders: rows of (sample_id, gender). Samples missing from the file
/// stay Unknown; unrecognized labels are fatal.
pub fn read_genders(path: &Path, sample_ids: &[String]) -> Result<Vec<Gender>> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    let sample_col = column(&headers, "sample_id", path)?;
    let gender_col = column(&headers, "gender", path)?;

    let mut by_sample = HashMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let gender = Gender::parse(&record[gender_col])?;
        by_sample.insert(record[sample_col].to_string(), gender);
    }
    Ok(sample_ids
        .iter()
        .map(|s| by_sample.get(s).copied().unwrap_or(Gender::Unknown))
        .collect())
}

/// Inbreeding het penalties: rows of (sample_id, penalty); default 0.
pub fn read_inbred_penalties(path: &Path, sample_ids: &[String]) -> Result<Vec<f64>> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(std::io::Error::from)?.clone();
    let sample_col = column(&headers, "sample_id", path)?;
    let penalty_col = column(&headers, "penalty", path)?;

    let mut by_sample = HashMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CoreError::parse(path, idx + 2, e.to_string()))?;
        let penalty: f64 = record[penalty_col].trim().parse().map_err(|_| {
            CoreError::parse(
                path,
                idx + 2,
                format!("bad penalty '{}'", &record[penalty_col]),
            )
        })?;
        by_sample.insert(record[sample_col].to_string(), penalty);
    }
    Ok(sample_ids
        .iter()
        .map(|s| by_sample.get(s).copied().unwrap_or(0.0))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn trust_duplicates_abort() {
        let f = file(
            "sample_id\tprobeset_id\ttrust_count\n\
             s1\tSNP_1\t4\n\
             s1\tSNP_1\t0\n",
        );
        let err = read_trust(f.path()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTrustKey { .. }));
    }

    #[test]
    fn special_snps_parse() {
        let f = file(
            "probeset_id\tchr\tcopy_male\tcopy_female\n\
             X_SNP\tX\t1\t2\n\
             Y_SNP\tY\t1\t0\n",
        );
        let map = read_special_snps(f.path()).unwrap();
        assert_eq!(map["X_SNP"].male_copy, 1);
        assert_eq!(map["Y_SNP"].female_copy, 0);
    }

    #[test]
    fn overrides_follow_run_sample_order() {
        let f = file(
            "sample_id\tSNP_1\tSNP_2\n\
             s2\t1\t2\n\
             s1\t2\t0\n",
        );
        let samples = vec!["s1".to_string(), "s2".to_string()];
        let map = read_copy_overrides(f.path(), &samples).unwrap();
        assert_eq!(map["SNP_1"], vec![2, 1]);
        assert_eq!(map["SNP_2"], vec![0, 2]);
    }

    #[test]
    fn genders_default_unknown_and_reject_junk() {
        let f = file("sample_id\tgender\ns1\tmale\n");
        let samples = vec!["s1".to_string(), "s2".to_string()];
        let genders = read_genders(f.path(), &samples).unwrap();
        assert_eq!(genders, vec![Gender::Male, Gender::Unknown]);

        let bad = file("sample_id\tgender\ns1\tboth\n");
        assert!(matches!(
            read_genders(bad.path(), &samples).unwrap_err(),
            CoreError::UnknownGender { .. }
        ));
    }

    #[test]
    fn hints_validate_shape_and_codes() {
        let f = file("probeset_id\ts1\ts2\nSNP_1\t0\t-1\n");
        let hints = read_hints(f.path(), 2).unwrap();
        assert_eq!(hints["SNP_1"], vec![0, -1]);

        let bad = file("probeset_id\ts1\ts2\nSNP_1\t5\t0\n");
        assert!(read_hints(bad.path(), 2).is_err());
    }
}

//! Diagnostic reports: probe discrimination scores and EM gender calls.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use luma_core::{Gender, Result};

use crate::model::probe::ProbeScore;

/// One row per scored probe pair.
pub struct ProbeScoreWriter {
    out: BufWriter<File>,
}

impl ProbeScoreWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "probeset_id\tprobe_index\tintercept\tslope\taic")?;
        Ok(ProbeScoreWriter { out })
    }

    pub fn write(&mut self, marker: &str, scores: &[ProbeScore]) -> Result<()> {
        for s in scores {
            writeln!(
                self.out,
                "{}\t{}\t{:.6}\t{:.6}\t{:.6}",
                marker, s.probe_index, s.intercept, s.slope, s.aic
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// One row per sample: called gender and the observed het rate.
pub struct GenderReportWriter {
    out: BufWriter<File>,
}

impl GenderReportWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "sample_id\tgender\thet_rate")?;
        Ok(GenderReportWriter { out })
    }

    pub fn write(&mut self, sample: &str, gender: Gender, het_rate: f64) -> Result<()> {
        writeln!(self.out, "{}\t{}\t{:.4}", sample, gender.as_str(), het_rate)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

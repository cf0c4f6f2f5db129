//! Markers-by-samples result matrices, written one marker row at a time in
//! processing order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use luma_core::Result;

use crate::engine::MarkerCalls;

/// Streams the call matrix (and optional companions) row by row.
pub struct MarkerResultWriter {
    calls: BufWriter<File>,
    confidences: Option<BufWriter<File>>,
    probabilities: Option<BufWriter<File>>,
    distances: Option<BufWriter<File>>,
}

fn header(out: &mut impl Write, sample_ids: &[String]) -> Result<()> {
    write!(out, "probeset_id")?;
    for s in sample_ids {
        write!(out, "\t{}", s)?;
    }
    writeln!(out)?;
    Ok(())
}

impl MarkerResultWriter {
    pub fn create(
        calls_path: &Path,
        confidences_path: Option<&Path>,
        probabilities_path: Option<&Path>,
        distances_path: Option<&Path>,
        sample_ids: &[String],
    ) -> Result<Self> {
        let mut calls = BufWriter::new(File::create(calls_path)?);
        header(&mut calls, sample_ids)?;

        let confidences = match confidences_path {
            Some(p) => {
                let mut w = BufWriter::new(File::create(p)?);
                header(&mut w, sample_ids)?;
                Some(w)
            }
            None => None,
        };
        let probabilities = match probabilities_path {
            Some(p) => {
                let mut w = BufWriter::new(File::create(p)?);
                header(&mut w, sample_ids)?;
                Some(w)
            }
            None => None,
        };
        let distances = match distances_path {
            Some(p) => {
                let mut w = BufWriter::new(File::create(p)?);
                header(&mut w, sample_ids)?;
                Some(w)
            }
            None => None,
        };

        Ok(MarkerResultWriter {
            calls,
            confidences,
            probabilities,
            distances,
        })
    }

    /// Append one marker's results across all output files.
    pub fn write(&mut self, result: &MarkerCalls) -> Result<()> {
        write!(self.calls, "{}", result.marker)?;
        for call in &result.calls {
            write!(self.calls, "\t{}", call.code())?;
        }
        writeln!(self.calls)?;

        if let Some(out) = self.confidences.as_mut() {
            write!(out, "{}", result.marker)?;
            for conf in &result.confidences {
                write!(out, "\t{:.6}", conf)?;
            }
            writeln!(out)?;
        }

        if let Some(out) = self.probabilities.as_mut() {
            if let Some(probs) = &result.probabilities {
                write!(out, "{}", result.marker)?;
                for p in probs {
                    let residual = (1.0 - p[0] - p[1] - p[2]).max(0.0);
                    write!(out, "\t{:.6},{:.6},{:.6},{:.6}", p[0], p[1], p[2], residual)?;
                }
                writeln!(out)?;
            }
        }

        if let Some(out) = self.distances.as_mut() {
            write!(out, "{}", result.marker)?;
            for d in &result.distances {
                write!(out, "\t{:.4},{:.4},{:.4}", d[0], d[1], d[2])?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.calls.flush()?;
        if let Some(out) = self.confidences.as_mut() {
            out.flush()?;
        }
        if let Some(out) = self.probabilities.as_mut() {
            out.flush()?;
        }
        if let Some(out) = self.distances.as_mut() {
            out.flush()?;
        }
        Ok(())
    }
}

//! Contrast/strength coordinate transforms.
//!
//! Each transform reparameterizes a raw (A-signal, B-signal) pair into a
//! (contrast, strength) pair: contrast separates the genotype clusters
//! (positive toward A-allele dominance), strength carries overall
//! intensity. All four are finite for finite, non-degenerate inputs; zero
//! signals are clamped to a small floor before any logarithm.

use std::fmt;
use std::str::FromStr;

use luma_core::CoreError;

/// Floor substituted for zero signals ahead of log/ratio operations.
const SIGNAL_FLOOR: f64 = 0.001;

/// Default scale parameter for the CES and CCS stretches.
pub const DEFAULT_K: f64 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    /// Log-ratio vs average log-intensity.
    MvA,
    /// Polar angle vs log radius.
    RvT,
    /// Contrast extremes stretch: sinh-scaled relative difference.
    CES,
    /// Contrast centers stretch: asinh-scaled relative difference.
    CCS,
}

impl Transform {
    /// All recognized transforms, in code order.
    pub const ALL: [Transform; 4] = [Transform::MvA, Transform::RvT, Transform::CES, Transform::CCS];

    pub fn as_str(self) -> &'static str {
        match self {
            Transform::MvA => "MvA",
            Transform::RvT => "RvT",
            Transform::CES => "CES",
            Transform::CCS => "CCS",
        }
    }

    /// Map one raw (a, b) pair into (contrast, strength).
    pub fn contrast_strength(self, a: f64, b: f64, k: f64) -> (f64, f64) {
        let a = if a == 0.0 { SIGNAL_FLOOR } else { a };
        let b = if b == 0.0 { SIGNAL_FLOOR } else { b };
        match self {
            Transform::MvA => {
                let contrast = a.log2() - b.log2();
                let strength = (a.log2() + b.log2()) / 2.0;
                (contrast, strength)
            }
            Transform::RvT => {
                let contrast = (a / b).atan();
                let strength = (a * a + b * b + SIGNAL_FLOOR).sqrt().ln();
                (contrast, strength)
            }
            Transform::CES => {
                let denom = nonzero(a + b);
                let contrast = (k * (a - b) / denom).sinh() / k.sinh();
                (contrast, denom.log2())
            }
            Transform::CCS => {
                let denom = nonzero(a + b);
                let contrast = (k * (a - b) / denom).asinh() / k.asinh();
                (contrast, denom.log2())
            }
        }
    }

    /// Transform paired summary vectors in place: `a` becomes contrast,
    /// `b` becomes strength.
    pub fn apply(self, a: &mut [f64], b: &mut [f64], k: f64) {
        debug_assert_eq!(a.len(), b.len());
        for (av, bv) in a.iter_mut().zip(b.iter_mut()) {
            let (x, y) = self.contrast_strength(*av, *bv, k);
            *av = x;
            *bv = y;
        }
    }
}

fn nonzero(v: f64) -> f64 {
    if v == 0.0 {
        SIGNAL_FLOOR
    } else {
        v
    }
}

impl TryFrom<u8> for Transform {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, CoreError> {
        match code {
            0 => Ok(Transform::MvA),
            1 => Ok(Transform::RvT),
            2 => Ok(Transform::CES),
            3 => Ok(Transform::CCS),
            _ => Err(CoreError::config(format!(
                "transform code {} out of range, expected 0 (MvA) through 3 (CCS)",
                code
            ))),
        }
    }
}

impl FromStr for Transform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, CoreError> {
        match s.to_ascii_lowercase().as_str() {
            "mva" => Ok(Transform::MvA),
            "rvt" => Ok(Transform::RvT),
            "ces" => Ok(Transform::CES),
            "ccs" => Ok(Transform::CCS),
            _ => Err(CoreError::config(format!(
                "unrecognized transform '{}', expected one of MvA, RvT, CES, CCS",
                s
            ))),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

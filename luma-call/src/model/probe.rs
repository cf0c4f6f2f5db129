//! Probe-pair discrimination scoring.
//!
//! Rescans raw per-probe data against the established calls: each probe
//! pair's transformed contrast is regressed against allele dosage with a
//! penalized logistic fit anchored at the cluster means, and ranked by an
//! AIC-style score. Low AIC marks the probes that carry the genotype
//! signal.

use luma_core::{CoreError, Genotype, Result};
use ndarray::Array2;
use statrs::function::logistic::logistic;

use crate::transform::Transform;

const MAX_ITER: usize = 100;
const TOLERANCE: f64 = 1e-3;
/// Pseudo-weight of each cluster-mean anchor point.
pub const ANCHOR_WEIGHT: f64 = 0.01;

/// Fitted coefficients and score for one probe pair.
#[derive(Clone, Debug)]
pub struct ProbeScore {
    pub probe_index: usize,
    pub intercept: f64,
    pub slope: f64,
    pub aic: f64,
}

/// One weighted binomial observation: B-allele dosage fraction `y` out of
/// two trials at contrast `x`.
struct Obs {
    x: f64,
    y: f64,
    weight: f64,
}

/// Penalized logistic regression of dosage on contrast via IRLS. The
/// anchors act as a weak prior holding the curve to the cluster geometry
/// when a class is absent from the data.
fn logistic_dosage_fit(obs: &[Obs]) -> (f64, f64, f64) {
    let mut b0 = 0.0f64;
    let mut b1 = 0.0f64;

    for _ in 0..MAX_ITER {
        // Weighted least squares on the working response.
        let mut s_w = 0.0;
        let mut s_wx = 0.0;
        let mut s_wxx = 0.0;
        let mut s_wz = 0.0;
        let mut s_wxz = 0.0;
        for o in obs {
            let eta = (b0 + b1 * o.x).clamp(-30.0, 30.0);
            let p = logistic(eta).clamp(1e-9, 1.0 - 1e-9);
            let var = p * (1.0 - p);
            let w = o.weight * 2.0 * var;
            let z = eta + (o.y - p) / var;
            s_w += w;
            s_wx += w * o.x;
            s_wxx += w * o.x * o.x;
            s_wz += w * z;
            s_wxz += w * o.x * z;
        }
        let det = s_w * s_wxx - s_wx * s_wx;
        if det.abs() < 1e-12 {
            break;
        }
        let new_b0 = (s_wxx * s_wz - s_wx * s_wxz) / det;
        let new_b1 = (s_w * s_wxz - s_wx * s_wz) / det;
        let delta = (new_b0 - b0).abs().max((new_b1 - b1).abs());
        b0 = new_b0;
        b1 = new_b1;
        if !b0.is_finite() || !b1.is_finite() {
            return (f64::NAN, f64::NAN, f64::INFINITY);
        }
        if delta < TOLERANCE {
            break;
        }
    }

    // Binomial deviance, two trials per observation.
    let mut deviance = 0.0;
    for o in obs {
        let eta = (b0 + b1 * o.x).clamp(-30.0, 30.0);
        let p = logistic(eta).clamp(1e-9, 1.0 - 1e-9);
        let mut d = 0.0;
        if o.y > 0.0 {
            d += o.y * (o.y / p).ln();
        }
        if o.y < 1.0 {
            d += (1.0 - o.y) * ((1.0 - o.y) / (1.0 - p)).ln();
        }
        deviance += 2.0 * o.weight * 2.0 * d;
    }
    let aic = deviance + 2.0 * 2.0;
    (b0, b1, aic)
}

/// Score every probe pair of a marker against the established calls.
///
/// `pm_a`/`pm_b` are (probe pair x sample) raw summaries. `hint_override`
/// replaces calls with valid hints before scoring. `anchors` are the
/// fitted AA/AB/BB contrast means. Fails with `InsufficientCalls` when
/// fewer than two samples carry a valid genotype.
#[allow(clippy::too_many_arguments)]
pub fn score_probes(
    marker: &str,
    pm_a: &Array2<f64>,
    pm_b: &Array2<f64>,
    calls: &[Genotype],
    hints: Option<&[i8]>,
    transform: Transform,
    k: f64,
    anchors: [f64; 3],
) -> Result<Vec<ProbeScore>> {
    let n_samples = calls.len();
    debug_assert_eq!(pm_a.dim(), pm_b.dim());
    debug_assert_eq!(pm_a.ncols(), n_samples);

    let mut codes: Vec<i8> = calls.iter().map(|c| c.code()).collect();
    if let Some(hints) = hints {
        for (code, &hint) in codes.iter_mut().zip(hints) {
            if hint >= 0 {
                *code = hint;
            }
        }
    }

    let valid: Vec<usize> = (0..n_samples).filter(|&i| codes[i] >= 0).collect();
    if valid.len() < 2 {
        return Err(CoreError::InsufficientCalls {
            marker: marker.to_string(),
        });
    }

    let mut scores = Vec::with_capacity(pm_a.nrows());
    for j in 0..pm_a.nrows() {
        let mut obs: Vec<Obs> = valid
            .iter()
            .map(|&i| {
                let (contrast, _) = transform.contrast_strength(pm_a[(j, i)], pm_b[(j, i)], k);
                Obs {
                    x: contrast,
                    y: f64::from(codes[i]) / 2.0,
                    weight: 1.0,
                }
            })
            .collect();
        for (c, &anchor) in anchors.iter().enumerate() {
            obs.push(Obs {
                x: anchor,
                y: c as f64 / 2.0,
                weight: ANCHOR_WEIGHT,
            });
        }

        let (intercept, slope, aic) = logistic_dosage_fit(&obs);
        scores.push(ProbeScore {
            probe_index: j,
            intercept,
            slope,
            aic,
        });
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn anchor_means() -> [f64; 3] {
        [0.66, 0.0, -0.66]
    }

    #[test]
    fn too_few_calls_is_fatal() {
        let pm_a = arr2(&[[100.0, 200.0, 300.0]]);
        let pm_b = arr2(&[[300.0, 200.0, 100.0]]);
        let calls = [Genotype::NoCall, Genotype::AA, Genotype::NoCall];
        let err = score_probes(
            "SNP_1",
            &pm_a,
            &pm_b,
            &calls,
            None,
            Transform::CCS,
            4.0,
            anchor_means(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientCalls { .. }));
        assert!(err.to_string().contains("SNP_1"));
    }

    #[test]
    fn discriminating_probe_scores_finite_with_negative_slope() {
        // A-heavy samples called AA (code 0 -> dosage 0), B-heavy called
        // BB: dosage falls as contrast rises, so the slope is negative.
        let pm_a = arr2(&[[2000.0, 1900.0, 1800.0, 120.0, 90.0, 100.0]]);
        let pm_b = arr2(&[[100.0, 120.0, 90.0, 1900.0, 2000.0, 1850.0]]);
        let calls = [
            Genotype::AA,
            Genotype::AA,
            Genotype::AA,
            Genotype::BB,
            Genotype::BB,
            Genotype::BB,
        ];
        let scores = score_probes(
            "SNP_2",
            &pm_a,
            &pm_b,
            &calls,
            None,
            Transform::CCS,
            4.0,
            anchor_means(),
        )
        .unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0].aic.is_finite());
        assert!(scores[0].slope < 0.0);
    }

    #[test]
    fn one_row_per_probe_pair() {
        let pm_a = arr2(&[
            [2000.0, 100.0],
            [1800.0, 120.0],
            [500.0, 480.0], // uninformative pair
        ]);
        let pm_b = arr2(&[
            [110.0, 1900.0],
            [100.0, 2000.0],
            [510.0, 500.0],
        ]);
        let calls = [Genotype::AA, Genotype::BB];
        let scores = score_probes(
            "SNP_3",
            &pm_a,
            &pm_b,
            &calls,
            None,
            Transform::CCS,
            4.0,
            anchor_means(),
        )
        .unwrap();
        assert_eq!(scores.len(), 3);
        for s in &scores {
            assert!(s.aic.is_finite());
        }
        // The separating pairs should beat the uninformative one.
        assert!(scores[0].aic < scores[2].aic);
    }

    #[test]
    fn hint_override_supplies_missing_calls() {
        let pm_a = arr2(&[[2000.0, 100.0, 1900.0]]);
        let pm_b = arr2(&[[100.0, 1900.0, 120.0]]);
        let calls = [Genotype::NoCall, Genotype::NoCall, Genotype::NoCall];
        let hints = [0i8, 2, 0];
        let scores = score_probes(
            "SNP_4",
            &pm_a,
            &pm_b,
            &calls,
            Some(&hints),
            Transform::CCS,
            4.0,
            anchor_means(),
        )
        .unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0].aic.is_finite());
    }
}

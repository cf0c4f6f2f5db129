//! Three-component univariate Gaussian EM, used to call sample gender from
//! chromosome-X marker contrasts: males lose the heterozygote cluster, so a
//! low het-call rate over chrX reads as Male.

use luma_core::Gender;
use statrs::distribution::{Continuous, Normal};

/// Responsibility mass below which a component is considered dead.
const DROP_MASS: f64 = 1e-9;

/// Standardized distance beyond which a point contributes nothing to a
/// component during iteration.
const TAIL_CUT: f64 = 50.0;

/// Bounded seed for the three components, low/mid/high on the contrast
/// axis.
#[derive(Clone, Copy, Debug)]
pub struct EmSeed {
    pub mu: [f64; 3],
    pub sigma: [f64; 3],
    pub weight: [f64; 3],
    pub min_mu: [f64; 3],
    pub max_mu: [f64; 3],
    pub min_sigma: [f64; 3],
    pub max_sigma: [f64; 3],
}

impl Default for EmSeed {
    /// The gender seed: homozygote components near +/-0.66, the
    /// heterozygote pinned near zero, all sigmas bounded well away from
    /// collapse.
    fn default() -> Self {
        EmSeed {
            mu: [-0.66, 0.0, 0.66],
            sigma: [0.1, 0.1, 0.1],
            weight: [0.33, 0.34, 0.33],
            min_mu: [-2.0, -0.05, 0.25],
            max_mu: [-0.25, 0.05, 2.0],
            min_sigma: [0.02; 3],
            max_sigma: [0.3; 3],
        }
    }
}

/// Converged component parameters plus hard assignments (-1 = unassigned).
#[derive(Clone, Debug)]
pub struct EmFit {
    pub mu: [f64; 3],
    pub sigma: [f64; 3],
    pub weight: [f64; 3],
    pub assignments: Vec<i8>,
    pub iterations: usize,
}

fn density(x: f64, mu: f64, sigma: f64, weight: f64) -> f64 {
    // Sigmas are bounded away from zero; degenerate parameters (NaN data)
    // contribute nothing and the sample falls out as unassigned.
    match Normal::new(mu, sigma) {
        Ok(normal) => weight * normal.pdf(x),
        Err(_) => 0.0,
    }
}

/// Run EM to convergence or the iteration cap.
pub fn fit_three_component(
    data: &[f64],
    seed: &EmSeed,
    threshold: f64,
    max_iter: usize,
) -> EmFit {
    let n = data.len();
    let mut mu = seed.mu;
    let mut sigma = seed.sigma;
    let mut weight = seed.weight;
    let mut active = [true; 3];
    let mut resp = vec![[0.0f64; 3]; n];
    let mut iterations = 0;

    for it in 0..max_iter {
        iterations = it + 1;
        // E step: normalized responsibilities, far tails zeroed.
        let mut mass = [0.0f64; 3];
        for (i, &x) in data.iter().enumerate() {
            let mut total = 0.0;
            let mut p = [0.0f64; 3];
            for j in 0..3 {
                if active[j] {
                    let z = (x - mu[j]).abs() / sigma[j];
                    if z < TAIL_CUT {
                        p[j] = density(x, mu[j], sigma[j], weight[j]);
                    }
                    total += p[j];
                }
            }
            for j in 0..3 {
                resp[i][j] = if total > 0.0 { p[j] / total } else { 0.0 };
                mass[j] += resp[i][j];
            }
        }
        for j in 0..3 {
            if mass[j] < DROP_MASS {
                active[j] = false;
            }
        }

        // M step: bounded updates.
        let mut changed = false;
        for j in 0..3 {
            if !active[j] {
                continue;
            }
            let sum_x: f64 = data.iter().zip(&resp).map(|(&x, r)| r[j] * x).sum();
            let new_mu = (sum_x / mass[j]).clamp(seed.min_mu[j], seed.max_mu[j]);
            let sum_sq: f64 = data
                .iter()
                .zip(&resp)
                .map(|(&x, r)| r[j] * (x - new_mu) * (x - new_mu))
                .sum();
            let new_sigma = (sum_sq / mass[j])
                .sqrt()
                .clamp(seed.min_sigma[j], seed.max_sigma[j]);
            let new_weight = mass[j] / n as f64;

            if (new_mu - mu[j]).abs() > threshold
                || (new_sigma - sigma[j]).abs() > threshold
                || (new_weight - weight[j]).abs() > threshold
            {
                changed = true;
            }
            mu[j] = new_mu;
            sigma[j] = new_sigma;
            weight[j] = new_weight;
        }

        if !changed && it > 0 {
            break;
        }
    }

    // Hard assignments from the final parameters, no tail cut.
    let assignments = data
        .iter()
        .map(|&x| {
            let mut best = -1i8;
            let mut best_p = 0.0;
            for j in 0..3 {
                if !active[j] {
                    continue;
                }
                let p = density(x, mu[j], sigma[j], weight[j]);
                if p > best_p {
                    best_p = p;
                    best = j as i8;
                }
            }
            best
        })
        .collect();

    EmFit {
        mu,
        sigma,
        weight,
        assignments,
        iterations,
    }
}

/// Gender calling thresholds.
#[derive(Clone, Copy, Debug)]
pub struct GenderCaller {
    /// EM convergence threshold.
    pub em_thresh: f64,
    /// Minimum assigned fraction before any gender is called.
    pub em_cutoff: f64,
    /// Het-call rate below which a sample is called Male.
    pub gender_cutoff: f64,
    pub max_iter: usize,
}

impl Default for GenderCaller {
    fn default() -> Self {
        GenderCaller {
            em_thresh: 0.05,
            em_cutoff: 0.5,
            gender_cutoff: 0.1,
            max_iter: 100,
        }
    }
}

impl GenderCaller {
    /// Call one sample's gender from its chrX contrasts. Returns the call
    /// and the observed het-call rate (-1 when uncallable).
    pub fn call(&self, contrasts: &[f64]) -> (Gender, f64) {
        if contrasts.is_empty() {
            return (Gender::Unknown, -1.0);
        }
        let fit = fit_three_component(contrasts, &EmSeed::default(), self.em_thresh, self.max_iter);

        let n_low = fit.assignments.iter().filter(|&&c| c == 0).count();
        let n_mid = fit.assignments.iter().filter(|&&c| c == 1).count();
        let n_high = fit.assignments.iter().filter(|&&c| c == 2).count();
        let assigned = n_low + n_mid + n_high;

        if assigned > 0 && assigned as f64 / contrasts.len() as f64 > self.em_cutoff {
            let het_rate = n_mid as f64 / assigned as f64;
            if het_rate < self.gender_cutoff {
                (Gender::Male, het_rate)
            } else {
                (Gender::Female, het_rate)
            }
        } else {
            (Gender::Unknown, -1.0)
        }
    }
}

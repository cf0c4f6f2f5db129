//! Running-sum likelihoods and Bayesian blending primitives used by the
//! labeling classifier.

use crate::model::ClusterShape;

/// Guard against division by an empty cluster.
const SOFT_COUNT: f64 = 1e-4;

const TWO_PI: f64 = std::f64::consts::TAU;

/// Bayesian variance: prior variance, observed sum of squares, and the
/// penalty for the posterior mean shifting away from the prior location.
///
/// `v`/`prior_var` are the prior pseudo-observations and expected variance,
/// `sum_sq`/`sum`/`n` summarize the observations, `k` is the prior strength
/// of the mean, `post_mean` the blended mean and `prior_mean` its prior
/// location.
#[allow(clippy::too_many_arguments)]
pub fn bayes_var(
    v: f64,
    prior_var: f64,
    sum_sq: f64,
    sum: f64,
    n: f64,
    k: f64,
    post_mean: f64,
    prior_mean: f64,
) -> f64 {
    let mut out = v * prior_var;
    out += sum_sq - sum * sum / (n + SOFT_COUNT);
    out += (k / (k + n)) * n * (post_mean - prior_mean) * (post_mean - prior_mean);
    out / (v + n)
}

/// Gaussian log-likelihood of a cluster's members in running-sum form:
/// sum((x - mean)^2)/var + n*log(var), expanded over sum(x^2), sum(x), n.
pub fn gauss_loglik_sums(sum_sq: f64, mean: f64, sum: f64, n: f64, var: f64) -> f64 {
    (sum_sq - 2.0 * mean * sum + mean * mean * n) / var + n * var.ln()
}

/// Gaussian log-likelihood of a single value (up to a constant).
pub fn gauss_loglik_one(mean: f64, x: f64, var: f64) -> f64 {
    (mean - x) * (mean - x) / var + var.ln()
}

/// Inverse-gamma log-likelihood of an observed variance under the prior
/// expected variance with `v` pseudo-observations.
pub fn inverse_gamma_loglik(expected_var: f64, observed_var: f64, v: f64) -> f64 {
    expected_var / observed_var + (v + 1.0) * observed_var.ln()
}

/// Bivariate Gaussian negative log-density of a (contrast, strength) point
/// under one cluster, with optional variance inflation by the uncertainty
/// in the cluster mean (`inflate / k`).
pub fn bivariate_loglik(x: f64, y: f64, cl: &ClusterShape, inflate: f64) -> f64 {
    let up = 1.0 + inflate / cl.k;
    let dx = x - cl.m;
    let dy = y - cl.ym;

    let cs = (cl.ss * cl.yss).sqrt();
    let r = cl.xyss / cs;

    let mut z = dx * dx / (up * cl.ss) - 2.0 * r * dx * dy / (up * cs) + dy * dy / (up * cl.yss);
    z /= 2.0 * (1.0 - r * r);
    z + (TWO_PI * up * cs * (1.0 - r * r).sqrt()).ln()
}

/// Entropy-style penalty against splitting data into extra clusters: three
/// cluster weights `a`/`b`/`c` with observed memberships `oa`/`ob`/`oc`,
/// `lambda` keeps empty-cluster frequencies off zero.
pub fn mixture_penalty(a: f64, b: f64, c: f64, oa: f64, ob: f64, oc: f64, lambda: f64) -> f64 {
    let total = a + b + c + 3.0 * lambda;
    let entropy = oa * ((a + lambda) / total).ln()
        + ob * ((b + lambda) / total).ln()
        + oc * ((c + lambda) / total).ln();
    -entropy
}

/// Hardy-Weinberg departure penalty over hom counts `a`/`b` and het count
/// `c`, in chromosomes.
pub fn hardy_weinberg_penalty(a: f64, b: f64, c: f64, lambda: f64) -> f64 {
    let total = 2.0 * a + 2.0 * b + 2.0 * c + 2.0 * lambda;
    let p = (2.0 * a + c + lambda) / total;
    let q = 1.0 - p;
    let loglik = (2.0 * a + c) * p.ln() + (2.0 * b + c) * q.ln() + c * 2f64.ln();
    -loglik
}

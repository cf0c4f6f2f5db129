//! Two-dimensional cluster handling: posterior refit over (contrast,
//! strength) jointly, and calling against bivariate clusters with an
//! optional uniform "ocean" background.

use luma_core::CopyNumber;
use nalgebra::{Matrix6, Vector6};

use crate::math;
use crate::model::label::force_isotonic;
use crate::model::{ClusterShape, HardShell, MixPenalty, SnpDistribution, SnpParam};

/// Probability-weighted sums for one cluster:
/// [n, sum(z), sum(z^2), sum(w), sum(w^2), sum(z*w)].
type Six = [f64; 6];

fn weighted_sums(z: &[f64], w: &[f64], probs: &[[f64; 3]], class: usize) -> Six {
    let mut six = [0.0f64; 6];
    for (r, p) in probs.iter().enumerate() {
        let wt = p[class];
        six[0] += wt;
        six[1] += wt * z[r];
        six[2] += wt * z[r] * z[r];
        six[3] += wt * w[r];
        six[4] += wt * w[r] * w[r];
        six[5] += wt * z[r] * w[r];
    }
    six
}

/// Bayesian variance update in both axes plus the covariance, from the
/// weighted sums and the already-updated posterior means.
fn bayes_two_variance(post: &mut ClusterShape, six: &Six, prior: &ClusterShape) {
    let n = six[0];
    post.v = prior.v + n;

    let shift = (prior.k * n) / (prior.k + n);

    let mut ss = prior.v * prior.ss;
    ss += six[2] - six[1] * six[1] / (n + 1e-3);
    ss += shift * (post.m - prior.m) * (post.m - prior.m);
    post.ss = ss / post.v;

    let mut yss = prior.v * prior.yss;
    yss += six[4] - six[3] * six[3] / (n + 1e-3);
    yss += shift * (post.ym - prior.ym) * (post.ym - prior.ym);
    post.yss = yss / post.v;

    let mut xyss = prior.v * prior.xyss;
    xyss += six[5] - six[1] * six[3] / (n + 1e-3);
    xyss += shift * (post.ym - prior.ym) * (post.m - prior.m);
    post.xyss = xyss / post.v;
}

/// Shrink one cluster's variances toward the other two, keeping its
/// within-cluster correlation fixed.
fn shrink_cluster_variance(
    a: &ClusterShape,
    b: &ClusterShape,
    c: &ClusterShape,
    lambda: f64,
) -> (f64, f64, f64) {
    let main = 3.0 - 2.0 * lambda;
    let cross = lambda;
    let denom = main * a.v + cross * b.v + cross * c.v;
    let ss = (main * a.ss * a.v + cross * b.ss * b.v + cross * c.ss * c.v) / denom;
    let yss = (main * a.yss * a.v + cross * b.yss * b.v + cross * c.yss * c.v) / denom;
    let xyss = (ss * yss).sqrt() * a.xyss / (a.ss * a.yss).sqrt();
    (ss, yss, xyss)
}

/// Keep the het strength mean above the hom interpolation line. The weight
/// balances how far the het moves versus the homs.
fn force_iso_het_y(post: &mut SnpDistribution, weight: f64) {
    let dxhb = post.ab.m - post.bb.m;
    let dxah = post.aa.m - post.ab.m;
    let dxab = post.aa.m - post.bb.m;

    let ystar_ab = (dxhb * post.aa.ym + dxah * post.bb.ym) / dxab;
    if ystar_ab > post.ab.ym {
        let wh = post.ab.k * weight;
        let wa = post.aa.k;
        let wb = post.bb.k;
        let wab = wa + wb;
        let ystar = (ystar_ab * wab + post.ab.ym * wh) / (wab + wh);
        post.ab.ym = ystar;

        let delta = ystar - ystar_ab;
        let delta_b = delta / ((wb * dxhb + wa * dxah) / (wa * dxab));
        let delta_a = delta / ((wb * dxhb + wa * dxah) / (wb * dxab));
        post.bb.ym += delta_b;
        post.aa.ym += delta_a;
    }
}

/// Refit the posterior in both dimensions: a 6x6 system over the three
/// cluster means in (contrast, strength), then the bivariate variances.
pub fn labels_to_posterior(sp: &mut SnpParam, z: &[f64], w: &[f64], probs: &[[f64; 3]]) {
    let six_aa = weighted_sums(z, w, probs, 0);
    let six_ab = weighted_sums(z, w, probs, 1);
    let six_bb = weighted_sums(z, w, probs, 2);

    let prior = sp.prior;

    // Prior precision with between-cluster coupling, interleaved as
    // [aa.x, aa.y, ab.x, ab.y, bb.x, bb.y].
    let mut k = Matrix6::zeros();
    k[(0, 0)] = prior.aa.k;
    k[(1, 1)] = prior.aa.k;
    k[(2, 2)] = prior.ab.k;
    k[(3, 3)] = prior.ab.k;
    k[(4, 4)] = prior.bb.k;
    k[(5, 5)] = prior.bb.k;
    k[(0, 2)] = prior.xah;
    k[(2, 0)] = prior.xah;
    k[(2, 4)] = prior.xhb;
    k[(4, 2)] = prior.xhb;
    k[(0, 4)] = prior.xab;
    k[(4, 0)] = prior.xab;
    k[(1, 3)] = prior.yah;
    k[(3, 1)] = prior.yah;
    k[(3, 5)] = prior.yhb;
    k[(5, 3)] = prior.yhb;
    k[(1, 5)] = prior.yab;
    k[(5, 1)] = prior.yab;

    let n = Matrix6::from_diagonal(&Vector6::new(
        six_aa[0], six_aa[0], six_ab[0], six_ab[0], six_bb[0], six_bb[0],
    ));

    let mu = Vector6::new(
        prior.aa.m,
        prior.aa.ym,
        prior.ab.m,
        prior.ab.ym,
        prior.bb.m,
        prior.bb.ym,
    );
    let nv = Vector6::new(
        six_aa[1], six_aa[3], six_ab[1], six_ab[3], six_bb[1], six_bb[3],
    );

    let solved = (k + n)
        .try_inverse()
        .map(|inv| inv * (k * mu + nv))
        .unwrap_or_else(|| Vector6::repeat(f64::NAN));

    sp.posterior.aa.m = solved[0];
    sp.posterior.aa.ym = solved[1];
    sp.posterior.ab.m = solved[2];
    sp.posterior.ab.ym = solved[3];
    sp.posterior.bb.m = solved[4];
    sp.posterior.bb.ym = solved[5];

    sp.posterior.aa.k = six_aa[0] + prior.aa.k;
    sp.posterior.ab.k = six_ab[0] + prior.ab.k;
    sp.posterior.bb.k = six_bb[0] + prior.bb.k;

    if sp.hard_shell == HardShell::Isotonic {
        let (mut ma, mut mh, mut mb) =
            (sp.posterior.aa.m, sp.posterior.ab.m, sp.posterior.bb.m);
        force_isotonic(
            &mut mb,
            &mut mh,
            &mut ma,
            sp.posterior.bb.k,
            sp.posterior.ab.k,
            sp.posterior.aa.k,
            sp.shell_barrier,
        );
        sp.posterior.aa.m = ma;
        sp.posterior.ab.m = mh;
        sp.posterior.bb.m = mb;
    }

    if sp.iso_het_y > 0.0 {
        force_iso_het_y(&mut sp.posterior, sp.iso_het_y);
    }

    bayes_two_variance(&mut sp.posterior.aa, &six_aa, &prior.aa);
    bayes_two_variance(&mut sp.posterior.ab, &six_ab, &prior.ab);
    bayes_two_variance(&mut sp.posterior.bb, &six_bb, &prior.bb);

    if sp.common_variance {
        let post = sp.posterior;
        let (ss, yss, xyss) =
            shrink_cluster_variance(&post.aa, &post.ab, &post.bb, sp.lambda);
        sp.posterior.aa.ss = ss;
        sp.posterior.aa.yss = yss;
        sp.posterior.aa.xyss = xyss;
        let (ss, yss, xyss) =
            shrink_cluster_variance(&post.ab, &post.bb, &post.aa, sp.lambda);
        sp.posterior.ab.ss = ss;
        sp.posterior.ab.yss = yss;
        sp.posterior.ab.xyss = xyss;
        let (ss, yss, xyss) =
            shrink_cluster_variance(&post.bb, &post.aa, &post.ab, sp.lambda);
        sp.posterior.bb.ss = ss;
        sp.posterior.bb.yss = yss;
        sp.posterior.bb.xyss = xyss;
    }

    // Between-cluster terms pass through unchanged.
    sp.posterior.xah = prior.xah;
    sp.posterior.xhb = prior.xhb;
    sp.posterior.xab = prior.xab;
    sp.posterior.yah = prior.yah;
    sp.posterior.yhb = prior.yhb;
    sp.posterior.yab = prior.yab;
}

/// Call every point against the fitted bivariate clusters. The uniform
/// ocean density absorbs outliers; its share is the residual left after
/// the three class probabilities.
pub fn posterior_calls(sp: &SnpParam, x: &[f64], y: &[f64]) -> Vec<[f64; 3]> {
    let post = &sp.posterior;
    let allow_het = sp.copy_number != CopyNumber::Haploid;

    let (fa, fh, fb) = if sp.mix_penalty != MixPenalty::Off {
        let ltot = (post.aa.k + post.ab.k + post.bb.k).ln();
        (
            -post.aa.k.ln() + ltot,
            -post.ab.k.ln() + ltot,
            -post.bb.k.ln() + ltot,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let ta = math::bivariate_loglik(xi, yi, &post.aa, sp.inflate_pra) + fa;
            let th = math::bivariate_loglik(xi, yi, &post.ab, sp.inflate_pra) + fh;
            let tb = math::bivariate_loglik(xi, yi, &post.bb, sp.inflate_pra) + fb;
            let mut best = ta.min(tb);
            if allow_het {
                best = best.min(th);
            }
            let mut pa = (best - ta).exp();
            let mut ph = if allow_het { (best - th).exp() } else { 0.0 };
            let mut pb = (best - tb).exp();
            let ocean = sp.ocean * best.exp();
            let sm = pa + ph + pb + ocean;
            pa /= sm;
            ph /= sm;
            pb /= sm;
            [pa, ph, pb]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SnpParam;
    use approx::assert_relative_eq;

    fn uniform_probs(n_bb: usize, n_ab: usize, n_aa: usize) -> Vec<[f64; 3]> {
        let mut probs = Vec::new();
        for _ in 0..n_bb {
            probs.push([0.0, 0.0, 1.0]);
        }
        for _ in 0..n_ab {
            probs.push([0.0, 1.0, 0.0]);
        }
        for _ in 0..n_aa {
            probs.push([1.0, 0.0, 0.0]);
        }
        probs
    }

    #[test]
    fn posterior_means_move_toward_data() {
        let z = vec![-0.7, -0.65, -0.68, 0.0, 0.02, -0.01, 0.66, 0.7, 0.64];
        let w = vec![9.2; z.len()];
        let probs = uniform_probs(3, 3, 3);
        let mut sp = SnpParam::default();
        labels_to_posterior(&mut sp, &z, &w, &probs);
        assert!(sp.posterior.is_finite());
        assert!(sp.posterior.bb.m < -0.6 && sp.posterior.aa.m > 0.6);
        // Strength means pulled from the prior 9.0 toward 9.2.
        assert!(sp.posterior.ab.ym > 9.0);
        assert_relative_eq!(sp.posterior.aa.k, 3.0 + sp.prior.aa.k);
    }

    #[test]
    fn ocean_leaves_a_residual_on_outliers() {
        let mut sp = SnpParam {
            ocean: 0.5,
            ..SnpParam::default()
        };
        sp.prior_to_posterior();
        // Far off every cluster in strength.
        let probs = posterior_calls(&sp, &[0.66], &[30.0]);
        let total: f64 = probs[0].iter().sum();
        assert!(total < 0.9, "ocean should absorb mass, got {total}");
    }

    #[test]
    fn iso_het_forcing_lifts_the_het() {
        let mut post = SnpDistribution::default();
        post.aa.ym = 10.0;
        post.bb.ym = 10.0;
        post.ab.ym = 9.0; // below the hom line
        let before = post.ab.ym;
        force_iso_het_y(&mut post, 1.0);
        assert!(post.ab.ym > before);
        assert!(post.aa.ym < 10.0 && post.bb.ym < 10.0);
    }
}

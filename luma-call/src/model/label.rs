//! The labeling classifier.
//!
//! Instead of iterating an EM fit, the classifier scans every ordered
//! labeling of the contrast-sorted subset: the first `i` points BB, the
//! next `j - i` AB, the rest AA. Each labeling is scored by the Bayesian
//! blend of the prior with the implied cluster sums, plus the configured
//! penalties; scores become relative probabilities, which marginalize to
//! per-sample class probabilities and refit the posterior.

use luma_core::{CopyNumber, Genotype};
use nalgebra::{Matrix3, Vector3};

use crate::math;
use crate::model::twodim;
use crate::model::{CallMethod, ClusterDim, HardShell, MixPenalty, SnpParam};

/// Penalty per data point for labelings that a constraint forbids.
const BARRIER: f64 = 100.0;

/// Per-sample inputs for one marker x copy-number subset.
pub struct LabelRequest<'a> {
    /// Contrast values.
    pub x: &'a [f64],
    /// Strength values.
    pub y: &'a [f64],
    /// Hint codes per sample: 0/1/2, negative for none.
    pub hints: &'a [i8],
    /// Per-sample heterozygote penalty from inbreeding.
    pub inbred: &'a [f64],
}

/// Calls, confidences and (optionally) class probabilities for a subset.
#[derive(Clone, Debug)]
pub struct LabelOutcome {
    pub calls: Vec<Genotype>,
    pub confidences: Vec<f64>,
    /// Per-sample [AA, AB, BB] probabilities, when requested.
    pub probabilities: Option<Vec<[f64; 3]>>,
    /// False when the fit produced non-finite parameters; callers degrade
    /// the whole subset to no-calls.
    pub converged: bool,
}

impl LabelOutcome {
    fn no_calls(n: usize, store_probs: bool, converged: bool) -> Self {
        LabelOutcome {
            calls: vec![Genotype::NoCall; n],
            confidences: vec![0.0; n],
            probabilities: if store_probs {
                Some(vec![[0.0; 3]; n])
            } else {
                None
            },
            converged,
        }
    }
}

/// Sorted view of a subset plus its prefix sums.
struct SortedSubset {
    /// Original index of each sorted rank.
    order: Vec<usize>,
    /// Contrast, ascending.
    z: Vec<f64>,
    /// Strength, in sorted-contrast order.
    w: Vec<f64>,
    /// Prefix sums over sorted contrast: cx[i] = sum of the first i values.
    cx: Vec<f64>,
    cxx: Vec<f64>,
    /// Cumulative hint penalties against labeling a point BB / AB / AA.
    c_not_bb: Vec<f64>,
    c_not_ab: Vec<f64>,
    /// Suffix penalty against AA: r_not_aa[j] covers ranks j..n.
    r_not_aa: Vec<f64>,
}

impl SortedSubset {
    fn build(sp: &SnpParam, req: &LabelRequest) -> SortedSubset {
        let n = req.x.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| req.x[a].total_cmp(&req.x[b]));

        let z: Vec<f64> = order.iter().map(|&i| req.x[i]).collect();
        let w: Vec<f64> = order.iter().map(|&i| req.y[i]).collect();

        let mut cx = vec![0.0; n + 1];
        let mut cxx = vec![0.0; n + 1];
        let mut not_bb = vec![0.0; n];
        let mut not_ab = vec![0.0; n];
        let mut not_aa = vec![0.0; n];
        let cp = sp.contradiction_penalty;

        for (r, &idx) in order.iter().enumerate() {
            cx[r + 1] = cx[r] + z[r];
            cxx[r + 1] = cxx[r] + z[r] * z[r];

            if sp.use_hints {
                match req.hints[idx] {
                    0 => {
                        // Hinted AA: contradicted by AB always, by BB
                        // unless flips are allowed.
                        if !sp.hint_flip_ok {
                            not_bb[r] += cp;
                        }
                        not_ab[r] += cp;
                    }
                    1 => {
                        not_bb[r] += cp;
                        not_aa[r] += cp;
                    }
                    2 => {
                        not_ab[r] += cp;
                        if !sp.hint_flip_ok {
                            not_aa[r] += cp;
                        }
                    }
                    _ => {}
                }
            }
            if sp.use_inbred_penalty {
                not_ab[r] += req.inbred[idx];
            }
        }

        let mut c_not_bb = vec![0.0; n + 1];
        let mut c_not_ab = vec![0.0; n + 1];
        for r in 0..n {
            c_not_bb[r + 1] = c_not_bb[r] + not_bb[r];
            c_not_ab[r + 1] = c_not_ab[r] + not_ab[r];
        }
        let mut r_not_aa = vec![0.0; n + 1];
        for r in (0..n).rev() {
            r_not_aa[r] = r_not_aa[r + 1] + not_aa[r];
        }

        SortedSubset {
            order,
            z,
            w,
            cx,
            cxx,
            c_not_bb,
            c_not_ab,
            r_not_aa,
        }
    }

    fn len(&self) -> usize {
        self.z.len()
    }
}

/// Fixed pieces of the Bayesian mean update: prior means, prior precision
/// (with between-cluster terms), observation precision. Order [AA, AB, BB].
struct MeanSystem {
    m: Vector3<f64>,
    m_inv: Matrix3<f64>,
    s_inv: Matrix3<f64>,
}

impl MeanSystem {
    fn from_prior(sp: &SnpParam) -> MeanSystem {
        let p = &sp.prior;
        let m = Vector3::new(p.aa.m, p.ab.m, p.bb.m);

        let mut m_inv = Matrix3::zeros();
        m_inv[(0, 0)] = p.aa.k / p.aa.ss;
        m_inv[(1, 1)] = p.ab.k / p.ab.ss;
        m_inv[(2, 2)] = p.bb.k / p.bb.ss;
        m_inv[(0, 1)] = p.xah / (p.aa.ss * p.ab.ss).sqrt();
        m_inv[(1, 0)] = m_inv[(0, 1)];
        m_inv[(0, 2)] = p.xab / (p.aa.ss * p.bb.ss).sqrt();
        m_inv[(2, 0)] = m_inv[(0, 2)];
        m_inv[(1, 2)] = p.xhb / (p.ab.ss * p.bb.ss).sqrt();
        m_inv[(2, 1)] = m_inv[(1, 2)];

        let mut s_inv = Matrix3::zeros();
        s_inv[(0, 0)] = 1.0 / p.aa.ss;
        s_inv[(1, 1)] = 1.0 / p.ab.ss;
        s_inv[(2, 2)] = 1.0 / p.bb.ss;

        MeanSystem { m, m_inv, s_inv }
    }

    /// Blended cluster means for observed counts `n` and sums `sums`,
    /// order [AA, AB, BB]. Falls back to the prior means if the system is
    /// singular (flagged later by the finiteness check).
    fn solve(&self, n: &Vector3<f64>, sums: &Vector3<f64>) -> Vector3<f64> {
        let lhs = self.m_inv + self.s_inv * Matrix3::from_diagonal(n);
        let rhs = self.s_inv * sums + self.m_inv * self.m;
        match lhs.try_inverse() {
            Some(inv) => inv * rhs,
            None => Vector3::new(f64::NAN, f64::NAN, f64::NAN),
        }
    }
}

/// Force means isotonic (BB <= AB <= AA), separated by `delta`, moving
/// low-weight centers the most. Pool-adjacent-violators on the shifted
/// means, then unshift.
pub(crate) fn force_isotonic(
    mb: &mut f64,
    mh: &mut f64,
    ma: &mut f64,
    wb: f64,
    wh: f64,
    wa: f64,
    delta: f64,
) {
    let gamma = delta * (wb - wa) / (wb + wh + wa);
    *mb += delta - gamma;
    *mh -= gamma;
    *ma += -delta - gamma;

    if *mb > *mh {
        let pooled = (wb * *mb + wh * *mh) / (wb + wh);
        *mb = pooled;
        *mh = pooled;
    }
    if *mh > *ma {
        let pooled = (wh * *mh + wa * *ma) / (wh + wa);
        *mh = pooled;
        *ma = pooled;
        if *mb > *mh {
            let pooled = (wb * *mb + wh * *mh + wa * *ma) / (wb + wh + wa);
            *mb = pooled;
            *mh = pooled;
            *ma = pooled;
        }
    }

    *mb -= delta - gamma;
    *mh += gamma;
    *ma += delta + gamma;
}

/// Barrier when any pair of centers sits closer than the shell allows.
fn pair_barrier(ma: f64, mh: f64, mb: f64, shell: f64) -> f64 {
    if (mb - mh) * (mb - mh) < shell {
        return BARRIER;
    }
    if (mh - ma) * (mh - ma) < shell {
        return BARRIER;
    }
    if (mb - ma) * (mb - ma) < 6.0 * shell {
        return BARRIER;
    }
    0.0
}

/// Barrier when a homozygote center approaches the midline.
fn hom_barrier(ma: f64, mb: f64, shell: f64) -> f64 {
    let edge = shell.sqrt();
    if ma < edge {
        return BARRIER;
    }
    if mb > -edge {
        return BARRIER;
    }
    0.0
}

/// Common-variance shrinkage: each cluster's variance mixes with the other
/// two, weighted by effective observations and lambda (1 = fully common).
fn shrink_common_variance(
    va: &mut f64,
    vh: &mut f64,
    vb: &mut f64,
    na: f64,
    nh: f64,
    nb: f64,
    sp: &SnpParam,
) {
    let ta = na + sp.prior.aa.v;
    let th = nh + sp.prior.ab.v;
    let tb = nb + sp.prior.bb.v;
    let sa = *va * ta;
    let sh = *vh * th;
    let sb = *vb * tb;
    let tl = sp.lambda;
    let tlm = 3.0 - 2.0 * sp.lambda;
    *vb = (tlm * sb + tl * sa + tl * sh) / (tlm * tb + tl * ta + tl * th);
    *va = (tl * sb + tlm * sa + tl * sh) / (tl * tb + tlm * ta + tl * th);
    *vh = (tl * sb + tl * sa + tlm * sh) / (tl * tb + tl * ta + tlm * th);
}

/// Score every ordered labeling and return the per-point class
/// probabilities [AA, AB, BB], in sorted order.
fn scan_labelings(sp: &SnpParam, sub: &SortedSubset, sys: &MeanSystem) -> Vec<[f64; 3]> {
    let n = sub.len();
    let dim = n + 1;
    let ns = n as f64;
    let mut q = vec![0.0f64; dim * dim];

    // Pre-penalties that do not need the per-labeling fit.
    let log_ns = if n > 0 { ns.ln() } else { 0.0 };
    for i in 0..dim {
        for j in i..dim {
            let tin = i * dim + j;

            // Haploid subsets: any heterozygote span is forbidden.
            if sp.copy_number == CopyNumber::Haploid && j > i {
                q[tin] += ns * 1000.0;
            }
            if sp.use_hints || sp.use_inbred_penalty {
                q[tin] +=
                    sub.c_not_bb[i] + sub.r_not_aa[j] + (sub.c_not_ab[j] - sub.c_not_ab[i]);
            }

            let n_bb = i as f64;
            let n_ab = (j - i) as f64;
            let n_aa = (n - j) as f64;
            match sp.mix_penalty {
                MixPenalty::Off => {}
                MixPenalty::Observed => {
                    q[tin] += math::mixture_penalty(
                        n_aa,
                        n_bb,
                        n_ab,
                        n_aa,
                        n_bb,
                        n_ab,
                        sp.safety_frequency,
                    );
                }
                MixPenalty::WithPrior => {
                    q[tin] += math::mixture_penalty(
                        n_aa + sp.prior.aa.k,
                        n_bb + sp.prior.bb.k,
                        n_ab + sp.prior.ab.k,
                        n_aa,
                        n_bb,
                        n_ab,
                        sp.safety_frequency,
                    );
                }
                MixPenalty::HardyWeinberg => {
                    q[tin] +=
                        math::hardy_weinberg_penalty(n_aa, n_bb, n_ab, 0.5 * sp.safety_frequency);
                }
            }
            if sp.bic > 0.0 {
                // Three clusters charged for everyone, refunded once per
                // empty span (i==j: no het; i==0: no BB; j==n: no AA).
                let mut clusters = 3.0;
                if i == j {
                    clusters -= 1.0;
                }
                if i == 0 {
                    clusters -= 1.0;
                }
                if j == n {
                    clusters -= 1.0;
                }
                q[tin] += sp.bic * clusters * log_ns;
            }
        }
    }

    // The fit itself: blended means, variances and likelihood per labeling.
    for i in 0..dim {
        for j in i..dim {
            let tin = i * dim + j;

            let n_bb = i as f64;
            let sum_bb = sub.cx[i];
            let ssq_bb = sub.cxx[i];
            let n_ab = (j - i) as f64;
            let sum_ab = sub.cx[j] - sub.cx[i];
            let ssq_ab = sub.cxx[j] - sub.cxx[i];
            let n_aa = (n - j) as f64;
            let sum_aa = sub.cx[n] - sub.cx[j];
            let ssq_aa = sub.cxx[n] - sub.cxx[j];

            let counts = Vector3::new(n_aa, n_ab, n_bb);
            let sums = Vector3::new(sum_aa, sum_ab, sum_bb);
            let mu = sys.solve(&counts, &sums);
            let (mut ma, mut mh, mut mb) = (mu[0], mu[1], mu[2]);

            if sp.hard_shell == HardShell::Isotonic {
                force_isotonic(
                    &mut mb,
                    &mut mh,
                    &mut ma,
                    n_bb + sp.prior.bb.k,
                    n_ab + sp.prior.ab.k,
                    n_aa + sp.prior.aa.k,
                    sp.shell_barrier,
                );
            }

            let p = &sp.prior;
            let mut va = math::bayes_var(p.aa.v, p.aa.ss, ssq_aa, sum_aa, n_aa, p.aa.k, ma, p.aa.m);
            let mut vh = math::bayes_var(p.ab.v, p.ab.ss, ssq_ab, sum_ab, n_ab, p.ab.k, mh, p.ab.m);
            let mut vb = math::bayes_var(p.bb.v, p.bb.ss, ssq_bb, sum_bb, n_bb, p.bb.k, mb, p.bb.m);
            if sp.common_variance {
                shrink_common_variance(&mut va, &mut vh, &mut vb, n_aa, n_ab, n_bb, sp);
            }

            let mut score = 0.0;
            score += math::gauss_loglik_sums(ssq_bb, mb, sum_bb, n_bb, vb);
            score += math::gauss_loglik_sums(ssq_ab, mh, sum_ab, n_ab, vh);
            score += math::gauss_loglik_sums(ssq_aa, ma, sum_aa, n_aa, va);
            // Likelihood of the means under the prior precision.
            score += math::gauss_loglik_one(p.bb.m, mb, 1.0 / sys.m_inv[(2, 2)]);
            score += math::gauss_loglik_one(p.ab.m, mh, 1.0 / sys.m_inv[(1, 1)]);
            score += math::gauss_loglik_one(p.aa.m, ma, 1.0 / sys.m_inv[(0, 0)]);
            // Likelihood of the variances under the inverse-gamma prior.
            score += math::inverse_gamma_loglik(p.bb.ss, vb, p.bb.v);
            score += math::inverse_gamma_loglik(p.ab.ss, vh, p.ab.v);
            score += math::inverse_gamma_loglik(p.aa.ss, va, p.aa.v);
            q[tin] += score / 2.0;

            match sp.hard_shell {
                HardShell::PairBarrier => q[tin] += ns * pair_barrier(ma, mh, mb, sp.shell_barrier),
                HardShell::HomBarrier => q[tin] += ns * hom_barrier(ma, mb, sp.shell_barrier),
                _ => {}
            }

            if sp.csep_penalty > 0.0 {
                // Favor well-separated clusters, Geman-McClure thresholded
                // so the favor saturates.
                let fld_bh = (mb - mh) * (mb - mh) / (vb + vh);
                let fld_ha = (mh - ma) * (mh - ma) / (vh + va);
                let fld_ba = (mb - ma) * (mb - ma) / (vb + va);
                let fld_bh = fld_bh / (1.0 + fld_bh / sp.csep_threshold);
                let fld_ha = fld_ha / (1.0 + fld_ha / sp.csep_threshold);
                let fld_ba = fld_ba / (1.0 + fld_ba / (2.0 * sp.csep_threshold));
                q[tin] -= sp.csep_penalty
                    * (fld_bh * (n_bb + n_ab) + fld_ha * (n_ab + n_aa) + fld_ba * (n_bb + n_aa));
            }
        }
    }

    // Scores to relative probabilities: exp(best - score).
    let mut q_min = f64::INFINITY;
    for i in 0..dim {
        for j in i..dim {
            q_min = q_min.min(q[i * dim + j]);
        }
    }
    let mut total = 0.0;
    for i in 0..dim {
        for j in 0..dim {
            let tin = i * dim + j;
            if j >= i {
                q[tin] = (q_min - q[tin]).exp();
                total += q[tin];
            } else {
                q[tin] = 0.0;
            }
        }
    }

    // Marginalize labelings to per-point class probabilities. A point of
    // rank r is BB under (i, j) iff r < i, AA iff r >= j.
    let mut row = vec![0.0; dim];
    let mut col = vec![0.0; dim];
    for i in 0..dim {
        for j in i..dim {
            let v = q[i * dim + j];
            row[i] += v;
            col[j] += v;
        }
    }
    let mut row_suffix = vec![0.0; dim + 1];
    for i in (0..dim).rev() {
        row_suffix[i] = row_suffix[i + 1] + row[i];
    }
    let mut probs = vec![[0.0f64; 3]; n];
    let mut col_prefix = 0.0;
    for r in 0..n {
        col_prefix += col[r];
        let bb = row_suffix[r + 1];
        let aa = col_prefix;
        let ab = (total - bb - aa).max(0.0);
        probs[r] = [aa / total, ab / total, bb / total];
    }
    probs
}

/// Refit the posterior from probability-weighted sums (1-D closed form).
fn labels_to_posterior(sp: &mut SnpParam, sub: &SortedSubset, probs: &[[f64; 3]], sys: &MeanSystem) {
    let mut n = [0.0f64; 3];
    let mut sum = [0.0f64; 3];
    let mut ssq = [0.0f64; 3];
    for (r, p) in probs.iter().enumerate() {
        let z = sub.z[r];
        for c in 0..3 {
            n[c] += p[c];
            sum[c] += p[c] * z;
            ssq[c] += p[c] * z * z;
        }
    }

    let counts = Vector3::new(n[0], n[1], n[2]);
    let sums = Vector3::new(sum[0], sum[1], sum[2]);
    let mu = sys.solve(&counts, &sums);
    let (mut ma, mut mh, mut mb) = (mu[0], mu[1], mu[2]);

    if sp.hard_shell == HardShell::Isotonic {
        force_isotonic(
            &mut mb,
            &mut mh,
            &mut ma,
            n[2] + sp.prior.bb.k,
            n[1] + sp.prior.ab.k,
            n[0] + sp.prior.aa.k,
            sp.shell_barrier,
        );
    }

    let p = &sp.prior;
    let mut va = math::bayes_var(p.aa.v, p.aa.ss, ssq[0], sum[0], n[0], p.aa.k, ma, p.aa.m);
    let mut vh = math::bayes_var(p.ab.v, p.ab.ss, ssq[1], sum[1], n[1], p.ab.k, mh, p.ab.m);
    let mut vb = math::bayes_var(p.bb.v, p.bb.ss, ssq[2], sum[2], n[2], p.bb.k, mb, p.bb.m);
    if sp.common_variance {
        shrink_common_variance(&mut va, &mut vh, &mut vb, n[0], n[1], n[2], sp);
    }

    let prior = sp.prior;
    sp.posterior.aa = crate::model::ClusterShape::new(
        ma,
        va,
        n[0] + prior.aa.k,
        n[0] + prior.aa.v,
        prior.aa.ym,
        prior.aa.yss,
        prior.aa.xyss,
    );
    sp.posterior.ab = crate::model::ClusterShape::new(
        mh,
        vh,
        n[1] + prior.ab.k,
        n[1] + prior.ab.v,
        prior.ab.ym,
        prior.ab.yss,
        prior.ab.xyss,
    );
    sp.posterior.bb = crate::model::ClusterShape::new(
        mb,
        vb,
        n[2] + prior.bb.k,
        n[2] + prior.bb.v,
        prior.bb.ym,
        prior.bb.yss,
        prior.bb.xyss,
    );
    // Between-cluster precision terms are not updated by observations.
    sp.posterior.xah = prior.xah;
    sp.posterior.xab = prior.xab;
    sp.posterior.xhb = prior.xhb;
}

/// Pick the best of three relative probabilities.
fn best_call(p_aa: f64, p_ab: f64, p_bb: f64) -> (Genotype, f64) {
    let mut call = Genotype::BB;
    let mut best = p_bb;
    if p_ab > best {
        call = Genotype::AB;
        best = p_ab;
    }
    if p_aa > best {
        call = Genotype::AA;
        best = p_aa;
    }
    (call, 1.0 - best)
}

/// Call every point against the fitted 1-D posterior clusters.
fn posterior_calls(sp: &SnpParam, x: &[f64]) -> Vec<[f64; 3]> {
    let post = &sp.posterior;
    let allow_het = sp.copy_number != CopyNumber::Haploid;

    // Rare genotypes are less likely than common ones; weight by the
    // cluster pseudo-counts when the mixture penalty is active.
    let (fa, fh, fb) = if sp.mix_penalty != MixPenalty::Off {
        (-post.aa.k.ln(), -post.ab.k.ln(), -post.bb.k.ln())
    } else {
        (0.0, 0.0, 0.0)
    };

    x.iter()
        .map(|&xi| {
            let ta = math::gauss_loglik_one(xi, post.aa.m, post.aa.ss) / 2.0 + fa;
            let th = math::gauss_loglik_one(xi, post.ab.m, post.ab.ss) / 2.0 + fh;
            let tb = math::gauss_loglik_one(xi, post.bb.m, post.bb.ss) / 2.0 + fb;
            let mut best = ta.min(tb);
            if allow_het {
                best = best.min(th);
            }
            let mut pa = (best - ta).exp();
            let mut ph = if allow_het { (best - th).exp() } else { 0.0 };
            let mut pb = (best - tb).exp();
            let sm = pa + ph + pb;
            pa /= sm;
            ph /= sm;
            pb /= sm;
            [pa, ph, pb]
        })
        .collect()
}

/// The master routine: turn one subset's transformed data into genotypes,
/// updating `sp.posterior` along the way.
pub fn label_subset(sp: &mut SnpParam, req: &LabelRequest, store_probs: bool) -> LabelOutcome {
    let n = req.x.len();
    debug_assert!(req.y.len() == n && req.hints.len() == n && req.inbred.len() == n);

    sp.prior_to_posterior();
    sp.apply_wobble();

    if n == 0 {
        return LabelOutcome::no_calls(0, store_probs, true);
    }

    let mut label_probs: Option<(SortedSubset, Vec<[f64; 3]>)> = None;

    if sp.call_method.fits_data() {
        let sub = SortedSubset::build(sp, req);
        let sys = MeanSystem::from_prior(sp);
        let probs = scan_labelings(sp, &sub, &sys);

        match sp.cluster_dim {
            ClusterDim::One => labels_to_posterior(sp, &sub, &probs, &sys),
            ClusterDim::Two => twodim::labels_to_posterior(sp, &sub.z, &sub.w, &probs),
        }

        let finite = sp.posterior.is_finite()
            && probs
                .iter()
                .all(|p| p.iter().all(|v| v.is_finite()));
        if !finite {
            return LabelOutcome::no_calls(n, store_probs, false);
        }
        label_probs = Some((sub, probs));
    }

    // Assign: probabilities per point in original sample order.
    let point_probs: Vec<[f64; 3]> = match sp.call_method {
        CallMethod::Label => {
            let (sub, probs) = label_probs.as_ref().expect("label mode fits data");
            let mut out = vec![[0.0f64; 3]; n];
            for (r, &idx) in sub.order.iter().enumerate() {
                let mut p = probs[r];
                if sp.copy_number == CopyNumber::Haploid {
                    p[1] = 0.0;
                }
                out[idx] = p;
            }
            out
        }
        CallMethod::Posterior | CallMethod::SingleSample => match sp.cluster_dim {
            ClusterDim::One => posterior_calls(sp, req.x),
            ClusterDim::Two => twodim::posterior_calls(sp, req.x, req.y),
        },
    };

    let mut calls = Vec::with_capacity(n);
    let mut confidences = Vec::with_capacity(n);
    for p in &point_probs {
        let (mut call, mut conf) = best_call(p[0], p[1], p[2]);
        if !conf.is_finite() {
            return LabelOutcome::no_calls(n, store_probs, false);
        }
        if conf > sp.max_score {
            call = Genotype::NoCall;
            conf = 0.0;
        }
        calls.push(call);
        confidences.push(conf);
    }

    LabelOutcome {
        calls,
        confidences,
        probabilities: if store_probs {
            Some(point_probs)
        } else {
            None
        },
        converged: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use luma_core::CopyNumber;

    fn req<'a>(
        x: &'a [f64],
        y: &'a [f64],
        hints: &'a [i8],
        inbred: &'a [f64],
    ) -> LabelRequest<'a> {
        LabelRequest { x, y, hints, inbred }
    }

    fn three_cluster_data() -> (Vec<f64>, Vec<f64>) {
        let x = vec![
            -0.71, -0.68, -0.64, -0.66, -0.62, // BB
            -0.02, 0.01, 0.03, -0.04, 0.02, // AB
            0.63, 0.66, 0.69, 0.61, 0.67, // AA
        ];
        let y = vec![9.0; x.len()];
        (x, y)
    }

    #[test]
    fn clean_clusters_are_called() {
        let (x, y) = three_cluster_data();
        let hints = vec![-1i8; x.len()];
        let inbred = vec![0.0; x.len()];
        let mut sp = SnpParam::default();
        let out = label_subset(&mut sp, &req(&x, &y, &hints, &inbred), false);
        assert!(out.converged);
        for (i, call) in out.calls.iter().enumerate() {
            let expect = match i / 5 {
                0 => Genotype::BB,
                1 => Genotype::AB,
                _ => Genotype::AA,
            };
            assert_eq!(*call, expect, "sample {i}");
            assert!(out.confidences[i] >= 0.0 && out.confidences[i] <= 1.0);
        }
        // Posterior centers moved onto the data.
        assert!((sp.posterior.bb.m + 0.66).abs() < 0.05);
        assert!((sp.posterior.aa.m - 0.65).abs() < 0.05);
    }

    #[test]
    fn empty_subset_is_a_noop() {
        let mut sp = SnpParam::default();
        let out = label_subset(&mut sp, &req(&[], &[], &[], &[]), true);
        assert!(out.converged);
        assert!(out.calls.is_empty());
        assert_eq!(sp.posterior, sp.prior);
    }

    #[test]
    fn haploid_subset_never_calls_het() {
        let (x, y) = three_cluster_data();
        let hints = vec![-1i8; x.len()];
        let inbred = vec![0.0; x.len()];
        let mut sp = SnpParam {
            copy_number: CopyNumber::Haploid,
            ..SnpParam::default()
        };
        let out = label_subset(&mut sp, &req(&x, &y, &hints, &inbred), false);
        assert!(out.converged);
        for call in &out.calls {
            assert_ne!(*call, Genotype::AB);
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = three_cluster_data();
        let hints = vec![-1i8; x.len()];
        let inbred = vec![0.0; x.len()];
        let mut sp = SnpParam::default();
        let out = label_subset(&mut sp, &req(&x, &y, &hints, &inbred), true);
        let probs = out.probabilities.unwrap();
        for p in probs {
            assert_relative_eq!(p[0] + p[1] + p[2], 1.0, max_relative = 1e-9);
        }
    }

    #[test]
    fn label_mode_agrees_with_posterior_mode_on_clean_data() {
        let (x, y) = three_cluster_data();
        let hints = vec![-1i8; x.len()];
        let inbred = vec![0.0; x.len()];

        let mut posterior_sp = SnpParam::default();
        let by_posterior =
            label_subset(&mut posterior_sp, &req(&x, &y, &hints, &inbred), false);

        let mut label_sp = SnpParam {
            call_method: CallMethod::Label,
            ..SnpParam::default()
        };
        let by_label = label_subset(&mut label_sp, &req(&x, &y, &hints, &inbred), false);

        assert_eq!(by_posterior.calls, by_label.calls);
    }

    #[test]
    fn single_sample_mode_skips_the_fit() {
        let mut sp = SnpParam {
            call_method: CallMethod::SingleSample,
            ..SnpParam::default()
        };
        let x = [0.64];
        let y = [9.0];
        let out = label_subset(&mut sp, &req(&x, &y, &[-1], &[0.0]), false);
        assert_eq!(out.calls[0], Genotype::AA);
        // The posterior stays the (unwobbled) prior.
        assert_eq!(sp.posterior.aa.m, 0.66);
    }

    #[test]
    fn isotonic_forcing_preserves_order() {
        let (mut mb, mut mh, mut ma) = (0.2, 0.0, -0.2);
        force_isotonic(&mut mb, &mut mh, &mut ma, 5.0, 5.0, 5.0, 0.05);
        assert!(mb <= mh && mh <= ma);
    }

    #[test]
    fn hints_can_flip_a_borderline_point() {
        // One point between BB and AB; a BB hint with a strong penalty
        // should pull the labeling toward BB.
        let x = vec![-0.70, -0.67, -0.63, -0.33, 0.01, 0.03, 0.65, 0.68];
        let y = vec![9.0; x.len()];
        let inbred = vec![0.0; x.len()];
        let mut hints = vec![-1i8; x.len()];
        hints[3] = 2; // claim the straggler is BB

        let mut base = SnpParam::default();
        let no_hint =
            label_subset(&mut base, &req(&x, &y, &vec![-1i8; x.len()], &inbred), true);

        let mut sp = SnpParam {
            use_hints: true,
            contradiction_penalty: 40.0,
            ..SnpParam::default()
        };
        let hinted = label_subset(&mut sp, &req(&x, &y, &hints, &inbred), true);

        let p_no = no_hint.probabilities.unwrap()[3][2];
        let p_hint = hinted.probabilities.unwrap()[3][2];
        assert!(
            p_hint > p_no,
            "hint should raise BB probability ({p_hint} vs {p_no})"
        );
    }
}

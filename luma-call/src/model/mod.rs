//! Cluster model types: per-genotype cluster shapes, the three-cluster
//! distribution, and the full per-marker parameter block.

pub mod em;
pub mod label;
pub mod probe;
pub mod twodim;

use luma_core::CopyNumber;

/// Summary of a single genotype cluster.
///
/// Means and variances live in (contrast, strength) space; `k` and `v` are
/// pseudo-observation strengths for the mean and variance respectively, so
/// the whole struct doubles as a Bayesian prior and as a fitted posterior.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterShape {
    /// Contrast mean.
    pub m: f64,
    /// Contrast variance.
    pub ss: f64,
    /// Pseudo-observations behind the mean.
    pub k: f64,
    /// Pseudo-observations behind the variance.
    pub v: f64,
    /// Strength mean.
    pub ym: f64,
    /// Strength variance.
    pub yss: f64,
    /// Contrast/strength covariance.
    pub xyss: f64,
}

impl ClusterShape {
    pub fn new(m: f64, ss: f64, k: f64, v: f64, ym: f64, yss: f64, xyss: f64) -> Self {
        ClusterShape {
            m,
            ss,
            k,
            v,
            ym,
            yss,
            xyss,
        }
    }

    pub fn zeroed() -> Self {
        ClusterShape::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }

    /// Standardized contrast distance from this cluster's center.
    pub fn distance(&self, contrast: f64) -> f64 {
        ((self.m - contrast) / self.ss.sqrt()).abs()
    }

    pub fn is_finite(&self) -> bool {
        self.m.is_finite()
            && self.ss.is_finite()
            && self.k.is_finite()
            && self.v.is_finite()
            && self.ym.is_finite()
            && self.yss.is_finite()
            && self.xyss.is_finite()
    }
}

/// All three genotype clusters plus between-cluster covariance terms, in
/// pseudo-observations. The AA cluster sits on the positive contrast side,
/// BB on the negative side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnpDistribution {
    pub aa: ClusterShape,
    pub ab: ClusterShape,
    pub bb: ClusterShape,

    // Between-cluster covariances, contrast axis.
    pub xah: f64,
    pub xab: f64,
    pub xhb: f64,
    // Strength axis.
    pub yah: f64,
    pub yab: f64,
    pub yhb: f64,
    // Cross blocks; can be asymmetric because of rotation between the
    // within-cluster variances.
    pub xyah: f64,
    pub xyab: f64,
    pub xyhb: f64,
    pub yxah: f64,
    pub yxab: f64,
    pub yxhb: f64,
}

impl SnpDistribution {
    pub fn zeroed() -> Self {
        SnpDistribution {
            aa: ClusterShape::zeroed(),
            ab: ClusterShape::zeroed(),
            bb: ClusterShape::zeroed(),
            xah: 0.0,
            xab: 0.0,
            xhb: 0.0,
            yah: 0.0,
            yab: 0.0,
            yhb: 0.0,
            xyah: 0.0,
            xyab: 0.0,
            xyhb: 0.0,
            yxah: 0.0,
            yxab: 0.0,
            yxhb: 0.0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.aa.is_finite() && self.ab.is_finite() && self.bb.is_finite()
    }
}

impl Default for SnpDistribution {
    /// Generic three-cluster prior: homozygotes at +/-0.66 with strong
    /// pseudo-counts, a weak heterozygote at zero, no cross terms.
    fn default() -> Self {
        SnpDistribution {
            aa: ClusterShape::new(0.66, 0.005, 4.0, 10.0, 9.0, 0.1, 0.0),
            ab: ClusterShape::new(0.0, 0.01, 0.2, 10.0, 9.0, 0.1, 0.0),
            bb: ClusterShape::new(-0.66, 0.005, 4.0, 10.0, 9.0, 0.1, 0.0),
            xah: 0.0,
            xab: 0.0,
            xhb: 0.0,
            yah: 0.0,
            yab: 0.0,
            yhb: 0.0,
            xyah: 0.0,
            xyab: 0.0,
            xyhb: 0.0,
            yxah: 0.0,
            yxab: 0.0,
            yxhb: 0.0,
        }
    }
}

/// How final calls are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallMethod {
    /// Use the marginal labeling probabilities directly.
    Label,
    /// Fit, then call each point against the fitted posterior clusters.
    Posterior,
    /// Skip fitting entirely; call against the prior (single-sample mode).
    SingleSample,
}

impl CallMethod {
    pub fn fits_data(self) -> bool {
        self != CallMethod::SingleSample
    }
}

/// Decision-boundary constraints on cluster centers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardShell {
    Off,
    /// Homozygote centers may not approach the midline.
    HomBarrier,
    /// All pairwise centers keep a minimum squared separation.
    PairBarrier,
    /// Centers are forced isotonic, separated by the barrier.
    Isotonic,
}

/// Mixture-frequency penalty flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixPenalty {
    Off,
    /// Entropy of the observed split.
    Observed,
    /// Entropy of observed plus prior pseudo-counts.
    WithPrior,
    /// Hardy-Weinberg departure of the observed split.
    HardyWeinberg,
}

/// Cluster dimensionality: contrast only, or contrast plus strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterDim {
    One,
    Two,
}

/// Full parameter block for one marker fit: prior, working posterior, and
/// the algorithm tuning knobs. Cloned per marker x copy-number subset so
/// fits never share mutable state.
#[derive(Clone, Debug)]
pub struct SnpParam {
    pub prior: SnpDistribution,
    pub posterior: SnpDistribution,

    /// Shrink within-cluster variances toward a common value.
    pub common_variance: bool,
    /// Mixing weight for the common-variance shrinkage, 0..=1.
    pub lambda: f64,
    pub call_method: CallMethod,
    pub hard_shell: HardShell,
    /// Minimum squared separation between cluster centers.
    pub shell_barrier: f64,
    /// Copy number this parameter block is fitting.
    pub copy_number: CopyNumber,
    /// Bias labelings toward supplied hint calls.
    pub use_hints: bool,
    /// Cost of a labeling that contradicts a hint.
    pub contradiction_penalty: f64,
    /// Allow hom hints to be flipped (AA<->BB) without contradiction.
    pub hint_flip_ok: bool,
    /// Apply the per-sample inbreeding heterozygote penalty.
    pub use_inbred_penalty: bool,
    pub mix_penalty: MixPenalty,
    /// BIC penalty level, applied per effective cluster.
    pub bic: f64,
    /// Geman-McClure discounted favor for well separated clusters.
    pub csep_penalty: f64,
    pub csep_threshold: f64,
    /// Calls with confidence above this become no-calls.
    pub max_score: f64,
    /// Cap on prior pseudo-observations: at most 1/wobble.
    pub wobble: f64,
    pub cluster_dim: ClusterDim,
    /// Uniform background density competing with clusters in 2-D calls.
    pub ocean: f64,
    /// Inflate calling variance by mean uncertainty (2-D calls).
    pub inflate_pra: f64,
    /// Keep the het strength mean above the hom interpolation line; the
    /// weight balances how much the het vs the homs move.
    pub iso_het_y: f64,
    /// Keeps mixture penalties off log(0).
    pub safety_frequency: f64,
}

impl Default for SnpParam {
    fn default() -> Self {
        SnpParam {
            prior: SnpDistribution::default(),
            posterior: SnpDistribution::default(),
            common_variance: true,
            lambda: 1.0,
            call_method: CallMethod::Posterior,
            hard_shell: HardShell::PairBarrier,
            shell_barrier: 0.05,
            copy_number: CopyNumber::Diploid,
            use_hints: false,
            contradiction_penalty: 16.0,
            hint_flip_ok: false,
            use_inbred_penalty: false,
            mix_penalty: MixPenalty::Off,
            bic: 0.0,
            csep_penalty: 0.0,
            csep_threshold: 16.0,
            max_score: 0.2,
            wobble: 1e-4,
            cluster_dim: ClusterDim::One,
            ocean: 0.0,
            inflate_pra: 0.0,
            iso_het_y: 0.0,
            safety_frequency: 1.0,
        }
    }
}

impl SnpParam {
    /// Install a marker-specific prior, keeping the tuning knobs.
    pub fn set_prior(&mut self, dist: &SnpDistribution) {
        self.prior = *dist;
    }

    /// Seed the posterior from the prior (also the whole fit in
    /// single-sample mode).
    pub fn prior_to_posterior(&mut self) {
        self.posterior = self.prior;
    }

    /// Weaken the prior so an unusual cohort can shift clusters: pseudo-
    /// observations are capped at 1/wobble.
    pub fn apply_wobble(&mut self) {
        let cap = 1.0 / self.wobble;
        if self.prior.aa.k > cap {
            self.prior.aa.k = cap;
        }
        if self.prior.ab.k > cap {
            self.prior.ab.k = cap;
        }
        if self.prior.bb.k > cap {
            self.prior.bb.k = cap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prior_is_symmetric() {
        let d = SnpDistribution::default();
        assert_eq!(d.aa.m, -d.bb.m);
        assert_eq!(d.ab.m, 0.0);
        assert!(d.aa.k > d.ab.k, "hets start weaker than homs");
    }

    #[test]
    fn wobble_caps_prior_strength() {
        let mut sp = SnpParam {
            wobble: 0.01,
            ..SnpParam::default()
        };
        sp.prior.aa.k = 1e6;
        sp.apply_wobble();
        assert_eq!(sp.prior.aa.k, 100.0);
        // Weak clusters stay put.
        assert_eq!(sp.prior.ab.k, 0.2);
    }

    #[test]
    fn distance_is_standardized() {
        let cl = ClusterShape::new(-0.66, 0.08, 4.0, 10.0, 9.0, 0.1, 0.0);
        let d = cl.distance(-0.70);
        assert!((d - 0.1414).abs() < 1e-3);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use luma_call::engine::{CallEngine, PriorSource};
use luma_call::io::output::{GenderReportWriter, MarkerResultWriter, ProbeScoreWriter};
use luma_call::io::{
    read_copy_overrides, read_genders, read_hints, read_inbred_penalties, read_probe_summary,
    read_special_snps, read_summary, read_trust,
};
use luma_call::model::em::GenderCaller;
use luma_call::model::probe::score_probes;
use luma_call::model::{CallMethod, ClusterDim, HardShell, MixPenalty};
use luma_call::{PosteriorFormat, PosteriorWriter, PriorStore, SequentialPriorReader, Transform};
use luma_core::UnknownGenderPolicy;

/// luma: genotype calling for biallelic SNP arrays
#[derive(Parser)]
#[command(
    name = "luma",
    version,
    about = "luma: Bayesian genotype calling for biallelic SNP arrays"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call genotypes from an allele-summary table
    Call {
        /// Allele summary TSV (plain or .gz): probeset_id, allele, samples
        #[arg(long)]
        summary: String,

        /// Output prefix; writes <out>.calls.tsv and friends
        #[arg(long)]
        out: String,

        /// Indexed prior file (looked up by marker key)
        #[arg(long, conflicts_with = "sequential_priors")]
        priors: Option<String>,

        /// Sequential prior file (one record per marker, in order)
        #[arg(long)]
        sequential_priors: Option<String>,

        /// Write fitted posteriors to <out>.posteriors.tsv
        #[arg(long, default_value_t = false)]
        write_posteriors: bool,

        /// Posterior layout: tabular or structured
        #[arg(long, default_value = "tabular")]
        posterior_format: String,

        /// Coordinate transform: MvA, RvT, CES or CCS
        #[arg(long, default_value = "CCS")]
        transform: String,

        /// Scale parameter for the CES/CCS stretches
        #[arg(long, default_value_t = 4.0)]
        k: f64,

        /// Sample gender TSV (sample_id, gender)
        #[arg(long)]
        genders: Option<String>,

        /// Route unknown-gender samples like males (default: like females)
        #[arg(long, default_value_t = false)]
        unknown_as_male: bool,

        /// Special marker table (probeset_id, chr, copy_male, copy_female)
        #[arg(long)]
        special_snps: Option<String>,

        /// Per-sample copy-number override matrix
        #[arg(long)]
        copy_overrides: Option<String>,

        /// Trusted-probe counts (sample_id, probeset_id, trust_count);
        /// enables trust checking
        #[arg(long)]
        trust: Option<String>,

        /// Hint calls matrix (probeset_id + per-sample codes)
        #[arg(long)]
        hints: Option<String>,

        /// Penalty for contradicting a hint
        #[arg(long, default_value_t = 16.0)]
        contradiction_penalty: f64,

        /// Allow hom hints to be flipped without contradiction
        #[arg(long, default_value_t = false)]
        hint_flip_ok: bool,

        /// Per-sample inbreeding het penalties (sample_id, penalty)
        #[arg(long)]
        inbred_penalties: Option<String>,

        /// Also write per-sample class probabilities
        #[arg(long, default_value_t = false)]
        probabilities: bool,

        /// Also write standardized cluster distances
        #[arg(long, default_value_t = false)]
        distances: bool,

        /// Confidence above this becomes a no-call
        #[arg(long, default_value_t = 0.2)]
        max_score: f64,

        /// Call method: label, posterior or single
        #[arg(long, default_value = "posterior")]
        call_method: String,

        /// Cluster dimensionality: 1 (contrast) or 2 (contrast+strength)
        #[arg(long, default_value_t = 1)]
        cluster_dim: u8,

        /// Mixture penalty: off, observed, with-prior or hardy-weinberg
        #[arg(long, default_value = "off")]
        mix: String,

        /// Hard shell: off, hom, pair or isotonic
        #[arg(long, default_value = "pair")]
        hard_shell: String,

        /// Minimum squared separation between cluster centers
        #[arg(long, default_value_t = 0.05)]
        shell_barrier: f64,

        /// BIC penalty level for extra clusters
        #[arg(long, default_value_t = 0.0)]
        bic: f64,

        /// Cluster-separation penalty (0 disables)
        #[arg(long, default_value_t = 0.0)]
        csep_penalty: f64,

        /// Geman-McClure threshold for the separation penalty
        #[arg(long, default_value_t = 16.0)]
        csep_threshold: f64,

        /// Common-variance mixing weight (1 = fully common)
        #[arg(long, default_value_t = 1.0)]
        lambda: f64,

        /// Fit each cluster's variance independently
        #[arg(long, default_value_t = false)]
        no_common_variance: bool,

        /// Cap prior pseudo-observations at 1/wobble
        #[arg(long, default_value_t = 1e-4)]
        wobble: f64,

        /// Uniform background density for 2-D calling
        #[arg(long, default_value_t = 0.0)]
        ocean: f64,

        /// Print progress while running
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },

    /// Call sample genders from chromosome-X markers via EM
    Gender {
        /// Allele summary TSV restricted to (or filtered for) chrX markers
        #[arg(long)]
        summary: String,

        /// Special marker table; chrX markers (copy 1/2) are selected from
        /// it. Without it, every marker in the summary is used.
        #[arg(long)]
        special_snps: Option<String>,

        /// Output TSV (sample_id, gender, het_rate)
        #[arg(long)]
        out: String,

        /// Coordinate transform
        #[arg(long, default_value = "CCS")]
        transform: String,

        #[arg(long, default_value_t = 4.0)]
        k: f64,

        /// EM convergence threshold
        #[arg(long, default_value_t = 0.05)]
        em_thresh: f64,

        /// Minimum assigned fraction before calling a gender
        #[arg(long, default_value_t = 0.5)]
        em_cutoff: f64,

        /// Het rate below this calls Male
        #[arg(long, default_value_t = 0.1)]
        gender_cutoff: f64,
    },

    /// Score probe pairs against established calls
    SelectProbes {
        /// Probe-level summary TSV (probeset_id, probe_index, allele, samples)
        #[arg(long)]
        probes: String,

        /// Established calls matrix (probeset_id + per-sample codes)
        #[arg(long)]
        calls: String,

        /// Hint calls matrix; valid hints replace calls before scoring
        #[arg(long)]
        hints: Option<String>,

        /// Indexed prior file supplying the regression anchor means
        #[arg(long)]
        priors: Option<String>,

        /// Output TSV of per-probe coefficients and AIC
        #[arg(long)]
        out: String,

        #[arg(long, default_value = "CCS")]
        transform: String,

        #[arg(long, default_value_t = 4.0)]
        k: f64,
    },
}

fn parse_call_method(s: &str) -> Result<CallMethod> {
    match s {
        "label" => Ok(CallMethod::Label),
        "posterior" => Ok(CallMethod::Posterior),
        "single" => Ok(CallMethod::SingleSample),
        _ => bail!("invalid call method: {s}. Use 'label', 'posterior' or 'single'"),
    }
}

fn parse_mix(s: &str) -> Result<MixPenalty> {
    match s {
        "off" => Ok(MixPenalty::Off),
        "observed" => Ok(MixPenalty::Observed),
        "with-prior" => Ok(MixPenalty::WithPrior),
        "hardy-weinberg" => Ok(MixPenalty::HardyWeinberg),
        _ => bail!(
            "invalid mixture penalty: {s}. Use 'off', 'observed', 'with-prior' or 'hardy-weinberg'"
        ),
    }
}

fn parse_hard_shell(s: &str) -> Result<HardShell> {
    match s {
        "off" => Ok(HardShell::Off),
        "hom" => Ok(HardShell::HomBarrier),
        "pair" => Ok(HardShell::PairBarrier),
        "isotonic" => Ok(HardShell::Isotonic),
        _ => bail!("invalid hard shell: {s}. Use 'off', 'hom', 'pair' or 'isotonic'"),
    }
}

fn parse_cluster_dim(d: u8) -> Result<ClusterDim> {
    match d {
        1 => Ok(ClusterDim::One),
        2 => Ok(ClusterDim::Two),
        _ => bail!("invalid cluster dimensionality: {d}. Use 1 or 2"),
    }
}

fn parse_posterior_format(s: &str) -> Result<PosteriorFormat> {
    match s {
        "tabular" => Ok(PosteriorFormat::Tabular),
        "structured" => Ok(PosteriorFormat::Structured),
        _ => bail!("invalid posterior format: {s}. Use 'tabular' or 'structured'"),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_call(args: &Commands) -> Result<()> {
    let Commands::Call {
        summary,
        out,
        priors,
        sequential_priors,
        write_posteriors,
        posterior_format,
        transform,
        k,
        genders,
        unknown_as_male,
        special_snps,
        copy_overrides,
        trust,
        hints,
        contradiction_penalty,
        hint_flip_ok,
        inbred_penalties,
        probabilities,
        distances,
        max_score,
        call_method,
        cluster_dim,
        mix,
        hard_shell,
        shell_barrier,
        bic,
        csep_penalty,
        csep_threshold,
        lambda,
        no_common_variance,
        wobble,
        ocean,
        verbose,
    } = args
    else {
        unreachable!()
    };

    let data = read_summary(Path::new(summary))
        .with_context(|| format!("reading summary {summary}"))?;
    let n_samples = data.n_samples();
    eprintln!(
        "Loaded {} markers x {} samples from {}",
        data.n_markers(),
        n_samples,
        summary
    );

    let mut engine = CallEngine::new(n_samples);
    engine.transform = Transform::from_str(transform)?;
    engine.k = *k;
    engine.verbose = *verbose;
    engine.store_probabilities = *probabilities;
    engine.policy = if *unknown_as_male {
        UnknownGenderPolicy::MimicMale
    } else {
        UnknownGenderPolicy::MimicFemale
    };

    engine.params.call_method = parse_call_method(call_method)?;
    engine.params.cluster_dim = parse_cluster_dim(*cluster_dim)?;
    engine.params.mix_penalty = parse_mix(mix)?;
    engine.params.hard_shell = parse_hard_shell(hard_shell)?;
    engine.params.shell_barrier = *shell_barrier;
    engine.params.max_score = *max_score;
    engine.params.bic = *bic;
    engine.params.csep_penalty = *csep_penalty;
    engine.params.csep_threshold = *csep_threshold;
    engine.params.lambda = *lambda;
    engine.params.common_variance = !*no_common_variance;
    engine.params.wobble = *wobble;
    engine.params.ocean = *ocean;
    engine.params.contradiction_penalty = *contradiction_penalty;
    engine.params.hint_flip_ok = *hint_flip_ok;

    if let Some(path) = genders {
        engine.genders = read_genders(Path::new(path), &data.sample_ids)
            .with_context(|| format!("reading genders {path}"))?;
    }
    if let Some(path) = special_snps {
        engine.special = read_special_snps(Path::new(path))
            .with_context(|| format!("reading special markers {path}"))?;
    }
    if let Some(path) = copy_overrides {
        engine.overrides = read_copy_overrides(Path::new(path), &data.sample_ids)
            .with_context(|| format!("reading copy overrides {path}"))?;
    }
    if let Some(path) = trust {
        engine.trust =
            read_trust(Path::new(path)).with_context(|| format!("reading trust table {path}"))?;
        engine.trust_check = true;
    }
    if let Some(path) = hints {
        engine.hints = read_hints(Path::new(path), n_samples)
            .with_context(|| format!("reading hints {path}"))?;
        engine.params.use_hints = true;
    }
    if let Some(path) = inbred_penalties {
        engine.inbred = read_inbred_penalties(Path::new(path), &data.sample_ids)
            .with_context(|| format!("reading inbreeding penalties {path}"))?;
        engine.params.use_inbred_penalty = true;
    }

    let prior_source = if let Some(path) = priors {
        let store = PriorStore::from_path(Path::new(path))
            .with_context(|| format!("reading priors {path}"))?;
        eprintln!("Loaded {} prior models from {}", store.len(), path);
        PriorSource::Indexed(store)
    } else if let Some(path) = sequential_priors {
        PriorSource::Sequential(
            SequentialPriorReader::open(Path::new(path))
                .with_context(|| format!("opening sequential priors {path}"))?,
        )
    } else {
        PriorSource::Defaults
    };

    let calls_path = PathBuf::from(format!("{out}.calls.tsv"));
    let conf_path = PathBuf::from(format!("{out}.confidences.tsv"));
    let prob_path = PathBuf::from(format!("{out}.probabilities.tsv"));
    let dist_path = PathBuf::from(format!("{out}.distances.tsv"));
    let mut results = MarkerResultWriter::create(
        &calls_path,
        Some(conf_path.as_path()),
        probabilities.then_some(prob_path.as_path()),
        distances.then_some(dist_path.as_path()),
        &data.sample_ids,
    )?;

    let mut posterior_writer = if *write_posteriors {
        let path = PathBuf::from(format!("{out}.posteriors.tsv"));
        Some(PosteriorWriter::create(
            &path,
            parse_posterior_format(posterior_format)?,
            engine.params.cluster_dim,
        )?)
    } else {
        None
    };

    let stats = engine.run(&data, prior_source, &mut results, posterior_writer.as_mut())?;
    eprintln!(
        "Called {} markers: {} calls, {} no-calls",
        stats.n_markers, stats.n_calls, stats.n_no_calls
    );
    Ok(())
}

fn run_gender(
    summary: &str,
    special_snps: Option<&str>,
    out: &str,
    transform: &str,
    k: f64,
    em_thresh: f64,
    em_cutoff: f64,
    gender_cutoff: f64,
) -> Result<()> {
    let data = read_summary(Path::new(summary))
        .with_context(|| format!("reading summary {summary}"))?;
    let transform = Transform::from_str(transform)?;

    // Restrict to chrX-like markers (male copy 1, female copy 2) when a
    // special-marker table is available.
    let wanted: Option<std::collections::HashSet<String>> = match special_snps {
        Some(path) => {
            let special = read_special_snps(Path::new(path))
                .with_context(|| format!("reading special markers {path}"))?;
            Some(
                special
                    .iter()
                    .filter(|(_, s)| s.male_copy == 1 && s.female_copy == 2)
                    .map(|(id, _)| id.clone())
                    .collect(),
            )
        }
        None => None,
    };

    let n_samples = data.n_samples();
    let mut contrasts: Vec<Vec<f64>> = vec![Vec::new(); n_samples];
    let mut used = 0usize;
    for marker in &data.markers {
        if let Some(wanted) = &wanted {
            if !wanted.contains(&marker.id) {
                continue;
            }
        }
        used += 1;
        for i in 0..n_samples {
            let (x, _) = transform.contrast_strength(marker.a[i], marker.b[i], k);
            contrasts[i].push(x);
        }
    }
    if used == 0 {
        bail!("no chromosome-X markers found in {summary}");
    }
    eprintln!("Calling gender from {used} markers");

    let caller = GenderCaller {
        em_thresh,
        em_cutoff,
        gender_cutoff,
        ..GenderCaller::default()
    };
    let mut report = GenderReportWriter::create(Path::new(out))?;
    for (sample, values) in data.sample_ids.iter().zip(&contrasts) {
        let (gender, het_rate) = caller.call(values);
        report.write(sample, gender, het_rate)?;
    }
    report.flush()?;
    Ok(())
}

fn run_select_probes(
    probes: &str,
    calls: &str,
    hints: Option<&str>,
    priors: Option<&str>,
    out: &str,
    transform: &str,
    k: f64,
) -> Result<()> {
    let data = read_probe_summary(Path::new(probes))
        .with_context(|| format!("reading probe summary {probes}"))?;
    let n_samples = data.sample_ids.len();
    let transform = Transform::from_str(transform)?;

    let call_rows = read_hints(Path::new(calls), n_samples)
        .with_context(|| format!("reading calls {calls}"))?;
    let hint_rows = match hints {
        Some(path) => Some(
            read_hints(Path::new(path), n_samples)
                .with_context(|| format!("reading hints {path}"))?,
        ),
        None => None,
    };
    let store = match priors {
        Some(path) => Some(
            PriorStore::from_path(Path::new(path))
                .with_context(|| format!("reading priors {path}"))?,
        ),
        None => None,
    };

    let defaults = luma_call::SnpDistribution::default();
    let mut writer = ProbeScoreWriter::create(Path::new(out))?;
    for marker in &data.markers {
        let codes = call_rows
            .get(&marker.id)
            .with_context(|| format!("no calls for marker {}", marker.id))?;
        let genotypes: Vec<luma_core::Genotype> = codes
            .iter()
            .map(|&c| luma_core::Genotype::from_code(c))
            .collect::<Result<_, _>>()?;

        let dist = match &store {
            Some(store) => *store.lookup(&marker.id, 2)?,
            None => defaults,
        };
        let anchors = [dist.aa.m, dist.ab.m, dist.bb.m];

        let hint_row = hint_rows.as_ref().and_then(|h| h.get(&marker.id));
        let scores = score_probes(
            &marker.id,
            &marker.a,
            &marker.b,
            &genotypes,
            hint_row.map(|v| v.as_slice()),
            transform,
            k,
            anchors,
        )?;
        writer.write(&marker.id, &scores)?;
    }
    writer.flush()?;
    eprintln!("Scored probes for {} markers", data.markers.len());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        cmd @ Commands::Call { .. } => run_call(cmd),
        Commands::Gender {
            summary,
            special_snps,
            out,
            transform,
            k,
            em_thresh,
            em_cutoff,
            gender_cutoff,
        } => run_gender(
            summary,
            special_snps.as_deref(),
            out,
            transform,
            *k,
            *em_thresh,
            *em_cutoff,
            *gender_cutoff,
        ),
        Commands::SelectProbes {
            probes,
            calls,
            hints,
            priors,
            out,
            transform,
            k,
        } => run_select_probes(
            probes,
            calls,
            hints.as_deref(),
            priors.as_deref(),
            out,
            transform,
            *k,
        ),
    }
}

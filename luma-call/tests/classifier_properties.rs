//! Classifier-level contract tests against a caller-supplied prior.

use luma_call::model::label::{label_subset, LabelRequest};
use luma_call::model::{CallMethod, ClusterShape, SnpParam};
use luma_core::Genotype;

/// The documented worked example: prior AA(-0.66, 0.08) / AB(0, 0.12) /
/// BB(0.66, 0.08), sample contrast -0.70. Expect an AA call with a
/// standardized distance to AA of about 0.14.
#[test]
fn worked_example_calls_aa_at_distance_014() {
    let mut sp = SnpParam {
        call_method: CallMethod::SingleSample,
        ..SnpParam::default()
    };
    sp.prior.aa = ClusterShape::new(-0.66, 0.08, 4.0, 10.0, 9.0, 0.1, 0.0);
    sp.prior.ab = ClusterShape::new(0.0, 0.12, 0.2, 10.0, 9.0, 0.1, 0.0);
    sp.prior.bb = ClusterShape::new(0.66, 0.08, 4.0, 10.0, 9.0, 0.1, 0.0);

    let x = [-0.70];
    let y = [9.0]; // strength is irrelevant to the 1-D call
    let out = label_subset(
        &mut sp,
        &LabelRequest {
            x: &x,
            y: &y,
            hints: &[-1],
            inbred: &[0.0],
        },
        true,
    );

    assert_eq!(out.calls[0], Genotype::AA);
    assert!(out.confidences[0] < 0.2);

    let d = sp.posterior.aa.distance(-0.70);
    assert!((d - 0.14).abs() < 0.005, "distance {d}");
}

/// A point deep inside a cluster's 2-sigma ellipse is classified to that
/// cluster under the prior's own parameters, whatever the hint and
/// inbreeding knobs say, as long as contradictions cost nothing.
#[test]
fn deep_cluster_points_ignore_hint_settings() {
    let x = vec![
        -0.68, -0.66, -0.63, -0.01, 0.02, 0.0, 0.64, 0.66, 0.69,
    ];
    let y = vec![9.0; x.len()];
    let inbred_zero = vec![0.0; x.len()];
    let inbred_heavy = vec![0.5; x.len()];
    let wrong_hints: Vec<i8> = vec![2; x.len()]; // everything claimed BB
    let no_hints: Vec<i8> = vec![-1; x.len()];

    let configs: Vec<(SnpParam, &[i8], &[f64])> = vec![
        (SnpParam::default(), &no_hints, &inbred_zero),
        (
            SnpParam {
                use_hints: true,
                contradiction_penalty: 0.0,
                ..SnpParam::default()
            },
            &wrong_hints,
            &inbred_zero,
        ),
        (
            SnpParam {
                use_inbred_penalty: true,
                ..SnpParam::default()
            },
            &no_hints,
            &inbred_heavy,
        ),
    ];

    let expected = [
        Genotype::BB,
        Genotype::BB,
        Genotype::BB,
        Genotype::AB,
        Genotype::AB,
        Genotype::AB,
        Genotype::AA,
        Genotype::AA,
        Genotype::AA,
    ];

    for (mut sp, hints, inbred) in configs {
        let out = label_subset(
            &mut sp,
            &LabelRequest {
                x: &x,
                y: &y,
                hints,
                inbred,
            },
            false,
        );
        assert!(out.converged);
        assert_eq!(out.calls, expected);
    }
}

//! Integration tests for per-timestep curves and cross-run alignment

use steplog::curve::{
    cross_run_alignment, effective_loss, walltime_axis, RunSeries, TimestepProfile,
};
use steplog::series::{Series, WeightCurve};
use steplog::Error;

#[allow(clippy::cast_precision_loss)]
fn ramp_curve(n: usize) -> WeightCurve {
    let t = (0..n).map(|i| i as f64).collect();
    let weight = (0..n).map(|i| (i + 1) as f64).collect();
    WeightCurve::new(t, weight).unwrap()
}

#[test]
fn test_effective_loss_clamps_to_last_weight() {
    let curve = ramp_curve(100);
    let profile = TimestepProfile::from_pairs([(10, 2.0), (150, 1.0)]);

    let result = effective_loss(&curve, &profile).unwrap();

    assert_eq!(result.t, vec![10, 150]);
    assert!((result.weighted[0] - 22.0).abs() < 1e-12);
    // index 99 holds weight 100
    assert!((result.weighted[1] - 100.0).abs() < 1e-12);
    assert!((result.t_norm[1] - 1.0).abs() < 1e-12);
}

#[test]
fn test_effective_loss_rejects_empty_profile() {
    let profile = TimestepProfile::from_pairs(Vec::new());
    let err = effective_loss(&ramp_curve(4), &profile).unwrap_err();
    assert!(matches!(err, Error::EmptySeries(_)));
}

#[test]
fn test_cross_run_alignment_isolates_failures() {
    let runs = vec![
        RunSeries {
            name: "e5".to_string(),
            diagnostic: Series::from_pairs("curv", [(0, 1.0), (100, 2.0), (200, 3.0)]),
            milestone: Series::from_pairs("fid", [(190, 40.0), (90, 60.0)]),
        },
        RunSeries {
            name: "e6".to_string(),
            diagnostic: Series::empty("curv"),
            milestone: Series::from_pairs("fid", [(100, 50.0)]),
        },
    ];

    let outcomes = cross_run_alignment(&runs);

    assert_eq!(outcomes.len(), 2);
    let e5 = outcomes[0].result.as_ref().unwrap();
    assert_eq!(e5.steps, vec![100, 200]);
    assert_eq!(e5.diagnostic, vec![2.0, 3.0]);
    assert_eq!(e5.milestone, vec![60.0, 40.0]);
    assert_eq!(e5.milestone_steps, vec![90, 190]);

    assert_eq!(outcomes[1].name, "e6");
    assert!(!outcomes[1].is_ok());
}

#[test]
fn test_walltime_axis_scales_by_last_step() {
    let axis = walltime_axis(&[0, 500, 1000], 3600.0).unwrap();
    assert_eq!(axis, vec![0.0, 1800.0, 3600.0]);
    assert!(walltime_axis(&[0], 10.0).is_err());
}

#[test]
fn test_sampled_band_clips_to_curve() {
    let curve = ramp_curve(10);
    let t_means = Series::from_pairs("mins_snr/t_mean", [(0, 1.0), (1, 9.0)]);
    let band = curve.sampled_band(&t_means).unwrap();
    assert!((band.mean - 5.0).abs() < 1e-12);
    assert!(band.low >= 0.0);
    assert!(band.high <= 9.0);
}

use std::path::PathBuf;

use panofish_eval::{evaluate_scenario_path, load_scenario};

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

#[test]
fn checker_rig_passes_quality_gates() {
    let report =
        evaluate_scenario_path(scenario_path("checker_rig_v1.json")).expect("scenario should evaluate");

    assert!(report.passed(), "scenario gates failed: {:?}", report.failures);
    assert_eq!(report.delivered_frames, 2);
    assert!(report.ranges_ordered);
    assert!(report.min_non_black_ratio > 0.70);
    assert!(report.mean_retained_area > 0.0 && report.mean_retained_area <= 1.0);
}

#[test]
fn tightened_threshold_is_reported_as_failure() {
    let mut scenario = load_scenario(scenario_path("checker_rig_v1.json")).unwrap();
    scenario.frame_count = 1;
    scenario.window.window_size = 1;
    scenario.window.best_k = 1;
    scenario.thresholds.min_non_black_ratio = 1.0;

    let report = panofish_eval::evaluate_scenario(&scenario).unwrap();
    assert!(!report.passed());
    assert!(report.failures.iter().any(|f| f.contains("non-black ratio")));
}

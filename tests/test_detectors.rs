//! Tests of the overload detector family.

use dslab_caas::core::overload_detector::{
    overload_detector_resolver, HostSample, IqrDetector, LocalRegressionDetector, MadDetector, OverloadDetector,
    StaticThresholdDetector,
};
use dslab_caas::core::utilization::UtilizationHistory;

fn sample<'a>(host_id: u32, demand_ratio: f64, history: &'a UtilizationHistory) -> HostSample<'a> {
    HostSample {
        host_id,
        demand_ratio,
        history,
        max_migration_time: 0.,
    }
}

fn history_of(values: &[f64]) -> UtilizationHistory {
    let mut history = UtilizationHistory::new();
    for value in values {
        history.record(*value);
    }
    history
}

#[test]
fn static_threshold_is_a_strict_comparison() {
    let history = UtilizationHistory::new();
    let mut detector = StaticThresholdDetector::new(0.8);
    // 800 of 1000 mips sits exactly on the threshold and is still fine.
    assert!(!detector.is_overloaded(0., &sample(1, 800. / 1000., &history)));
    assert!(detector.is_overloaded(1., &sample(1, 801. / 1000., &history)));

    let records = detector.detection_log().records(1);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].time, 0.);
    assert_eq!(records[0].utilization, 0.8);
    assert_eq!(records[0].threshold, 0.8);
    assert_eq!(records[1].time, 1.);
}

#[test]
fn short_history_delegates_to_the_fallback() {
    // 5 nonzero samples are below the 12 required by MAD.
    let history = history_of(&[0.5, 0.6, 0.5, 0.6, 0.5]);
    for ratio in [0.5, 0.79, 0.8, 0.81, 0.95] {
        let mut mad = MadDetector::new(2.5, StaticThresholdDetector::new(0.8));
        let mut fallback = StaticThresholdDetector::new(0.8);
        assert_eq!(
            mad.is_overloaded(0., &sample(1, ratio, &history)),
            fallback.is_overloaded(0., &sample(1, ratio, &history)),
            "verdicts diverge at ratio {}",
            ratio
        );
    }
}

#[test]
fn delegated_evaluations_still_reach_the_audit_log() {
    let history = history_of(&[0.5; 5]);
    let mut mad = MadDetector::new(2.5, StaticThresholdDetector::new(0.8));
    assert!(mad.is_overloaded(0., &sample(1, 0.9, &history)));
    // The evaluation went through the fallback but is auditable on the primary.
    let records = mad.detection_log().records(1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].time, 0.);
    assert_eq!(records[0].utilization, 0.9);
    assert_eq!(records[0].threshold, 0.8);
}

#[test]
fn zero_samples_break_the_leading_run() {
    // 20 samples, but a zero 4 samples ago cuts the leading nonzero run short.
    let mut values = vec![0.5; 20];
    values[15] = 0.;
    let history = history_of(&values);
    let mut mad = MadDetector::new(1000., StaticThresholdDetector::new(0.8));
    // The huge safety factor would flag anything; the fallback does not.
    assert!(!mad.is_overloaded(0., &sample(1, 0.5, &history)));
}

#[test]
fn mad_threshold_follows_history_variability() {
    // 30 recent samples alternating 0.3 and 0.5: median 0.4, MAD 0.1.
    let mut values = Vec::new();
    for _ in 0..16 {
        values.push(0.3);
        values.push(0.5);
    }
    let history = history_of(&values);
    let mut detector = MadDetector::new(2., StaticThresholdDetector::new(0.8));
    // Threshold = 1 - 2 * 0.1 = 0.8.
    assert!(!detector.is_overloaded(0., &sample(1, 0.75, &history)));
    assert!(detector.is_overloaded(1., &sample(1, 0.85, &history)));
    let records = detector.detection_log().records(1);
    assert!((records[0].threshold - 0.8).abs() < 1e-9);
}

#[test]
fn iqr_threshold_follows_history_spread() {
    let mut values = Vec::new();
    for _ in 0..16 {
        values.push(0.3);
        values.push(0.5);
    }
    let history = history_of(&values);
    let mut detector = IqrDetector::new(1., StaticThresholdDetector::new(0.8));
    // Q1 = 0.3, Q3 = 0.5, threshold = 1 - 0.2 = 0.8.
    assert!(!detector.is_overloaded(0., &sample(1, 0.8, &history)));
    assert!(detector.is_overloaded(1., &sample(1, 0.81, &history)));
}

#[test]
fn local_regression_extrapolates_the_trend() {
    // Utilization grows by 0.06 per tick: 0.50, 0.56, .. 1.04.
    let mut history = UtilizationHistory::new();
    for i in 0..10 {
        history.record(0.5 + 0.06 * i as f64);
    }
    let mut detector = LocalRegressionDetector::new(1., 1., false, StaticThresholdDetector::new(0.8));
    // The fitted trend already reaches 1.04 at the newest sample.
    assert!(detector.is_overloaded(0., &sample(1, 0.95, &history)));

    let flat = history_of(&[0.5; 10]);
    assert!(!detector.is_overloaded(1., &sample(1, 0.5, &flat)));
}

#[test]
fn zero_migration_horizon_predicts_at_the_window_edge() {
    // Utilization grows by 0.055 per tick, ending at 0.995.
    let mut history = UtilizationHistory::new();
    for i in 0..10 {
        history.record(0.5 + 0.055 * i as f64);
    }
    let mut detector = LocalRegressionDetector::new(1., 1., false, StaticThresholdDetector::new(0.8));
    // No VM to migrate away means no extrapolation: the prediction stays at
    // the fit of the newest sample, just below full utilization.
    assert!(!detector.is_overloaded(0., &sample(1, 0.995, &history)));
    let records = detector.detection_log().records(1);
    assert!((records[0].utilization - 0.995).abs() < 1e-9);
}

#[test]
fn local_regression_horizon_grows_with_migration_time() {
    // Slower growth: 0.02 per tick ending at 0.68.
    let mut history = UtilizationHistory::new();
    for i in 0..10 {
        history.record(0.5 + 0.02 * i as f64);
    }
    let mut detector = LocalRegressionDetector::new(1., 1., false, StaticThresholdDetector::new(0.8));
    assert!(!detector.is_overloaded(0., &sample(1, 0.68, &history)));
    // A 17-tick migration horizon pushes the prediction past 1.0.
    let far = HostSample {
        host_id: 1,
        demand_ratio: 0.68,
        history: &history,
        max_migration_time: 17.,
    };
    assert!(detector.is_overloaded(1., &far));
}

#[test]
fn robust_regression_damps_a_single_outlier() {
    let mut history = UtilizationHistory::new();
    for i in 0..10 {
        let value = if i == 5 { 5. } else { 0.5 };
        history.record(value);
    }
    let mut robust = LocalRegressionDetector::new(1., 1., true, StaticThresholdDetector::new(0.8));
    assert!(!robust.is_overloaded(0., &sample(1, 0.5, &history)));
    // The logged prediction stays near the stable level.
    let records = robust.detection_log().records(1);
    assert!(records[0].utilization < 1.);
}

#[test]
fn short_history_delegates_for_local_regression_too() {
    let history = history_of(&[0.9; 5]);
    let mut detector = LocalRegressionDetector::new(1., 1., false, StaticThresholdDetector::new(0.8));
    assert!(detector.is_overloaded(0., &sample(1, 0.9, &history)));
    assert!(!detector.is_overloaded(1., &sample(1, 0.7, &history)));
}

#[test]
fn resolver_applies_configured_options() {
    let history = history_of(&[0.5; 3]);
    // Short history, so the verdict comes from the configured fallback threshold.
    let mut detector = overload_detector_resolver("Mad[safety_factor=2.5,fallback_threshold=0.7]", 1.);
    assert!(detector.is_overloaded(0., &sample(1, 0.75, &history)));
    assert!(!detector.is_overloaded(1., &sample(1, 0.65, &history)));
}

#[test]
#[should_panic(expected = "Safety factor cannot be negative")]
fn negative_safety_factor_is_fatal() {
    overload_detector_resolver("Iqr[safety_factor=-1.5]", 1.);
}

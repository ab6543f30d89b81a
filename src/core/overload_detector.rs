//! Host overload detection policies.
//!
//! All detectors share one contract: given the host's current requested-vs-total
//! compute ratio and its utilization history, answer whether the host is
//! over-utilized. Every evaluation is recorded in a per-host detection log
//! for audit.
//!
//! The statistical detectors (MAD, IQR, local regression) need a minimum amount
//! of history; until it accumulates they delegate to a configured static
//! threshold fallback, which cannot itself delegate further.

use std::collections::BTreeMap;

use crate::core::config::{parse_config_value, parse_options};
use crate::core::utilization::{UtilizationHistory, HISTORY_LENGTH};

/// Number of leading non-zero samples required by the MAD and IQR detectors.
const MIN_STABLE_SAMPLES: usize = 12;
/// Window of the local regression fit.
const REGRESSION_WINDOW: usize = 10;

/// One recorded detector evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub time: f64,
    pub utilization: f64,
    pub threshold: f64,
}

/// Per-host audit trail of detector evaluations.
#[derive(Clone, Debug, Default)]
pub struct DetectionLog {
    records: BTreeMap<u32, Vec<DetectionRecord>>,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, host_id: u32, record: DetectionRecord) {
        self.records.entry(host_id).or_default().push(record);
    }

    pub fn records(&self, host_id: u32) -> &[DetectionRecord] {
        self.records.get(&host_id).map(|r| r.as_slice()).unwrap_or(&[])
    }
}

/// Host facts passed to a detector evaluation.
pub struct HostSample<'a> {
    pub host_id: u32,
    /// Current aggregate requested-vs-total compute ratio.
    pub demand_ratio: f64,
    pub history: &'a UtilizationHistory,
    /// Longest migration transfer time among the host's VMs, used by
    /// predictive detectors to size the extrapolation horizon.
    pub max_migration_time: f64,
}

/// Decides whether a host is over-utilized.
pub trait OverloadDetector {
    fn is_overloaded(&mut self, time: f64, sample: &HostSample) -> bool;

    /// Audit trail of all evaluations performed by this detector.
    fn detection_log(&self) -> &DetectionLog;
}

/// Over-utilized iff the demand ratio strictly exceeds a fixed threshold.
pub struct StaticThresholdDetector {
    threshold: f64,
    log: DetectionLog,
}

impl StaticThresholdDetector {
    pub fn new(threshold: f64) -> Self {
        if threshold <= 0. || threshold >= 1. {
            panic!("Static overload threshold must lie in (0, 1), got {}", threshold);
        }
        Self {
            threshold,
            log: DetectionLog::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl OverloadDetector for StaticThresholdDetector {
    fn is_overloaded(&mut self, time: f64, sample: &HostSample) -> bool {
        self.log.record(
            sample.host_id,
            DetectionRecord {
                time,
                utilization: sample.demand_ratio,
                threshold: self.threshold,
            },
        );
        sample.demand_ratio > self.threshold
    }

    fn detection_log(&self) -> &DetectionLog {
        &self.log
    }
}

/// Adaptive threshold `1 - safety_factor * MAD` over the recent history.
pub struct MadDetector {
    safety_factor: f64,
    fallback: StaticThresholdDetector,
    log: DetectionLog,
}

impl MadDetector {
    pub fn new(safety_factor: f64, fallback: StaticThresholdDetector) -> Self {
        if safety_factor < 0. {
            panic!("Safety factor cannot be negative, got {}", safety_factor);
        }
        Self {
            safety_factor,
            fallback,
            log: DetectionLog::new(),
        }
    }
}

impl OverloadDetector for MadDetector {
    fn is_overloaded(&mut self, time: f64, sample: &HostSample) -> bool {
        if sample.history.leading_nonzero() < MIN_STABLE_SAMPLES {
            return delegate(&mut self.fallback, &mut self.log, time, sample);
        }
        let window = sample.history.len().min(HISTORY_LENGTH);
        let values = sample.history.recent(window);
        let threshold = 1. - self.safety_factor * median_absolute_deviation(&values);
        self.log.record(
            sample.host_id,
            DetectionRecord {
                time,
                utilization: sample.demand_ratio,
                threshold,
            },
        );
        sample.demand_ratio > threshold
    }

    fn detection_log(&self) -> &DetectionLog {
        &self.log
    }
}

/// Adaptive threshold `1 - safety_factor * IQR` over the recent history.
pub struct IqrDetector {
    safety_factor: f64,
    fallback: StaticThresholdDetector,
    log: DetectionLog,
}

impl IqrDetector {
    pub fn new(safety_factor: f64, fallback: StaticThresholdDetector) -> Self {
        if safety_factor < 0. {
            panic!("Safety factor cannot be negative, got {}", safety_factor);
        }
        Self {
            safety_factor,
            fallback,
            log: DetectionLog::new(),
        }
    }
}

impl OverloadDetector for IqrDetector {
    fn is_overloaded(&mut self, time: f64, sample: &HostSample) -> bool {
        if sample.history.leading_nonzero() < MIN_STABLE_SAMPLES {
            return delegate(&mut self.fallback, &mut self.log, time, sample);
        }
        let window = sample.history.len().min(HISTORY_LENGTH);
        let values = sample.history.recent(window);
        let threshold = 1. - self.safety_factor * inter_quartile_range(&values);
        self.log.record(
            sample.host_id,
            DetectionRecord {
                time,
                utilization: sample.demand_ratio,
                threshold,
            },
        );
        sample.demand_ratio > threshold
    }

    fn detection_log(&self) -> &DetectionLog {
        &self.log
    }
}

/// Predictive detector extrapolating a local linear utilization trend.
///
/// Fits a tricube-weighted linear model over the last [`REGRESSION_WINDOW`]
/// samples in chronological order and extrapolates it over the time needed to
/// migrate the heaviest VM away. Over-utilized iff the safety-scaled prediction
/// reaches full utilization.
pub struct LocalRegressionDetector {
    safety_factor: f64,
    scheduling_interval: f64,
    /// Refits once with bisquare residual weights to damp outliers.
    robust: bool,
    fallback: StaticThresholdDetector,
    log: DetectionLog,
}

impl LocalRegressionDetector {
    pub fn new(safety_factor: f64, scheduling_interval: f64, robust: bool, fallback: StaticThresholdDetector) -> Self {
        if safety_factor < 0. {
            panic!("Safety factor cannot be negative, got {}", safety_factor);
        }
        Self {
            safety_factor,
            scheduling_interval,
            robust,
            fallback,
            log: DetectionLog::new(),
        }
    }
}

impl OverloadDetector for LocalRegressionDetector {
    fn is_overloaded(&mut self, time: f64, sample: &HostSample) -> bool {
        if sample.history.len() < REGRESSION_WINDOW {
            return delegate(&mut self.fallback, &mut self.log, time, sample);
        }
        let mut values = sample.history.recent(REGRESSION_WINDOW);
        values.reverse();
        let weights = tricube_weights(values.len());
        let (mut intercept, mut slope) = weighted_linear_fit(&values, &weights);
        if self.robust {
            let residual_weights = bisquare_weights(&values, intercept, slope);
            let combined: Vec<f64> = weights.iter().zip(residual_weights.iter()).map(|(a, b)| a * b).collect();
            if combined.iter().any(|w| *w > 0.) {
                let refit = weighted_linear_fit(&values, &combined);
                intercept = refit.0;
                slope = refit.1;
            }
        }
        let horizon = (sample.max_migration_time / self.scheduling_interval).ceil();
        let x = (values.len() - 1) as f64 + horizon;
        let predicted = (intercept + slope * x) * self.safety_factor;
        self.log.record(
            sample.host_id,
            DetectionRecord {
                time,
                utilization: predicted,
                threshold: 1.,
            },
        );
        predicted >= 1.
    }

    fn detection_log(&self) -> &DetectionLog {
        &self.log
    }
}

/// Runs an evaluation through the fallback detector, mirroring the resulting
/// record into the delegating detector's own log so that every evaluation
/// stays auditable through the primary detector.
fn delegate(fallback: &mut StaticThresholdDetector, log: &mut DetectionLog, time: f64, sample: &HostSample) -> bool {
    let verdict = fallback.is_overloaded(time, sample);
    log.record(
        sample.host_id,
        DetectionRecord {
            time,
            utilization: sample.demand_ratio,
            threshold: fallback.threshold(),
        },
    );
    verdict
}

/// Creates the overload detector described by a config string,
/// e.g. `Mad[safety_factor=2.5,fallback_threshold=0.8]`.
pub fn overload_detector_resolver(config_str: &str, scheduling_interval: f64) -> Box<dyn OverloadDetector> {
    let (name, options_str) = parse_config_value(config_str);
    let options = options_str.map(|s| parse_options(&s)).unwrap_or_default();
    let option = |key: &str, default: f64| -> f64 {
        match options.get(key) {
            Some(value) => value
                .parse::<f64>()
                .unwrap_or_else(|_| panic!("Invalid value for option {}: {}", key, value)),
            None => default,
        }
    };
    let fallback = || StaticThresholdDetector::new(option("fallback_threshold", 0.8));
    match name.as_str() {
        "StaticThreshold" => Box::new(StaticThresholdDetector::new(option("threshold", 0.8))),
        "Mad" => Box::new(MadDetector::new(option("safety_factor", 2.5), fallback())),
        "Iqr" => Box::new(IqrDetector::new(option("safety_factor", 1.5), fallback())),
        "Lr" => Box::new(LocalRegressionDetector::new(
            option("safety_factor", 1.2),
            scheduling_interval,
            false,
            fallback(),
        )),
        "LrRobust" => Box::new(LocalRegressionDetector::new(
            option("safety_factor", 1.2),
            scheduling_interval,
            true,
            fallback(),
        )),
        _ => panic!("Can't resolve overload detector: {}", name),
    }
}

// Statistics helpers /////////////////////////////////////////////////////////

/// Percentile with linear interpolation between closest ranks.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile(&sorted, 0.5)
}

fn median_absolute_deviation(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

fn inter_quartile_range(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile(&sorted, 0.75) - percentile(&sorted, 0.25)
}

/// Tricube weights favoring the most recent samples.
fn tricube_weights(n: usize) -> Vec<f64> {
    let top = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let d = (top - i as f64) / top;
            ((1. - d.powi(3)).powi(3)).max(f64::MIN_POSITIVE)
        })
        .collect()
}

/// Weighted least squares fit of `y = intercept + slope * x` over `x = 0..n-1`.
fn weighted_linear_fit(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let mut sw = 0.;
    let mut swx = 0.;
    let mut swy = 0.;
    let mut swxx = 0.;
    let mut swxy = 0.;
    for (i, (y, w)) in values.iter().zip(weights.iter()).enumerate() {
        let x = i as f64;
        sw += w;
        swx += w * x;
        swy += w * y;
        swxx += w * x * x;
        swxy += w * x * y;
    }
    let denom = sw * swxx - swx * swx;
    if denom.abs() < 1e-12 {
        return (swy / sw, 0.);
    }
    let slope = (sw * swxy - swx * swy) / denom;
    let intercept = (swy - slope * swx) / sw;
    (intercept, slope)
}

/// Bisquare weights of fit residuals, zeroing gross outliers.
fn bisquare_weights(values: &[f64], intercept: f64, slope: f64) -> Vec<f64> {
    let residuals: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (intercept + slope * i as f64)).abs())
        .collect();
    let scale = 6. * median(&residuals);
    residuals
        .iter()
        .map(|r| {
            if scale < 1e-12 {
                return 1.;
            }
            let u = r / scale;
            if u < 1. {
                (1. - u * u).powi(2)
            } else {
                0.
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_windows() {
        assert_eq!(median(&[3., 1., 2.]), 2.);
        assert_eq!(median(&[4., 1., 2., 3.]), 2.5);
    }

    #[test]
    fn mad_of_constant_series_is_zero() {
        assert_eq!(median_absolute_deviation(&[0.5, 0.5, 0.5, 0.5]), 0.);
    }

    #[test]
    fn iqr_uses_interpolated_quartiles() {
        let values = vec![1., 2., 3., 4., 5.];
        assert_eq!(inter_quartile_range(&values), 2.);
    }

    #[test]
    fn linear_fit_recovers_exact_trend() {
        let values: Vec<f64> = (0..10).map(|i| 0.1 + 0.05 * i as f64).collect();
        let weights = tricube_weights(values.len());
        let (intercept, slope) = weighted_linear_fit(&values, &weights);
        assert!((intercept - 0.1).abs() < 1e-9);
        assert!((slope - 0.05).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "Static overload threshold")]
    fn threshold_outside_unit_interval_is_fatal() {
        StaticThresholdDetector::new(1.5);
    }

    #[test]
    #[should_panic(expected = "Can't resolve overload detector")]
    fn unknown_detector_name_is_fatal() {
        overload_detector_resolver("Quantum[qubits=3]", 1.);
    }
}

//! Common classification rule shared by all four detectors.

use hrs_core::Classification;

/// Default multiplicative threshold beyond which probe elapsed implies desync.
pub const THRESHOLD_RATIO: f64 = 3.0;
/// Floor applied to the baseline before any comparison, so a sub-100ms
/// loopback baseline can't produce a false positive by division alone.
pub const BASELINE_FLOOR_SECS: f64 = 0.1;
pub const UNCERTAIN_RATIO: f64 = 1.5;
pub const VULNERABLE_TIMEOUT_FRACTION: f64 = 0.9;

/// The baseline actually used for threshold comparisons — never the
/// raw measurement.
pub fn effective_baseline(baseline_elapsed: f64) -> f64 {
    baseline_elapsed.max(BASELINE_FLOOR_SECS)
}

/// Classification rule, identical across detectors.
pub fn classify(baseline_elapsed: f64, probe_elapsed: f64, timeout_secs: f64) -> Classification {
    let baseline = effective_baseline(baseline_elapsed);
    if probe_elapsed >= THRESHOLD_RATIO * baseline && probe_elapsed >= VULNERABLE_TIMEOUT_FRACTION * timeout_secs {
        Classification::Vulnerable
    } else if probe_elapsed >= UNCERTAIN_RATIO * baseline {
        Classification::Uncertain
    } else {
        Classification::Safe
    }
}

/// Reported ratio uses the raw baseline, not the floored one — the
/// floor only guards the classification thresholds, not the number a
/// reader sees in a `Finding`.
pub fn ratio(baseline_elapsed: f64, probe_elapsed: f64) -> f64 {
    probe_elapsed / baseline_elapsed.max(1e-9)
}

//! Area-under-curve metrics
//!
//! Trapezoidal integration over the readings inside a spike window, using the true
//! elapsed minutes between consecutive samples as the step.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::types::{minutes_between, AucMetrics, Reading, SpikeEvent};

/// Fixed baseline for `auc_70` (mg/dL)
pub const AUC_FIXED_BASELINE: f64 = 70.0;

/// Integrated exposure calculator
pub struct AucCalculator<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> AucCalculator<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Compute AUC metrics for one spike
    pub fn compute(
        &self,
        spike: &SpikeEvent,
        readings: &[Reading],
    ) -> Result<AucMetrics, AnalysisError> {
        let window = spike.window(readings);
        if window.len() < 2 {
            return Err(AnalysisError::DataError(format!(
                "spike at {} has {} reading(s) in its window, need at least 2",
                spike.start_time,
                window.len()
            )));
        }

        let max_exposure = spike.magnitude * spike.duration_minutes;
        if max_exposure <= 0.0 {
            return Err(AnalysisError::DataError(format!(
                "spike at {} has no extent (magnitude {}, duration {} min)",
                spike.start_time, spike.magnitude, spike.duration_minutes
            )));
        }

        let auc_relative = trapezoid(window, spike.start_glucose);

        Ok(AucMetrics {
            auc_0: trapezoid(window, 0.0),
            auc_70: trapezoid(window, AUC_FIXED_BASELINE),
            auc_relative,
            normalized_auc: auc_relative / max_exposure,
            recovery_time_minutes: self.recovery_time(spike, window),
        })
    }

    /// Minutes from start to the first post-peak reading back near the start level
    fn recovery_time(&self, spike: &SpikeEvent, window: &[Reading]) -> Option<f64> {
        let after_peak = window.partition_point(|r| r.timestamp <= spike.peak_time);
        window[after_peak..]
            .iter()
            .find(|r| (r.glucose - spike.start_glucose).abs() <= self.config.return_tolerance)
            .map(|r| minutes_between(spike.start_time, r.timestamp))
    }
}

/// Signed area between the curve and `baseline` (mg/dL·min)
pub fn trapezoid(readings: &[Reading], baseline: f64) -> f64 {
    readings
        .windows(2)
        .map(|pair| {
            let dt = minutes_between(pair[0].timestamp, pair[1].timestamp);
            let a = pair[0].glucose - baseline;
            let b = pair[1].glucose - baseline;
            (a + b) / 2.0 * dt
        })
        .sum()
}

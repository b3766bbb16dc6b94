//! Spike detection
//!
//! Scans an ordered reading sequence and emits non-overlapping spike events.
//!
//! The scan is an explicit state machine over an index cursor:
//!
//! ```text
//! Searching ──valley──▶ Candidate ──rise confirmed──▶ Tracking ──end found──▶ Ended
//!     ▲                     │                                                 │
//!     └──── next index ─────┘                 resume after end ◀──────────────┘
//! ```
//!
//! A valley is a reading no higher than any sample within `valley_window` on either
//! side. It becomes a spike start once a later reading within `max_duration_minutes`
//! rises by `min_spike_magnitude` or reaches `min_spike_threshold`. After the peak the
//! spike ends on the first of: return to baseline, sustained plateau, or timeout.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::stats;
use crate::types::{minutes_between, EndReason, Reading, SpikeEvent};
use log::debug;
use serde::{Deserialize, Serialize};

/// Fail unless timestamps are strictly increasing
pub fn ensure_ordered(readings: &[Reading]) -> Result<(), AnalysisError> {
    for (index, pair) in readings.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(AnalysisError::DataOrderingError {
                index: index + 1,
                previous: pair[0].timestamp,
                current: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

/// Scan position of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Searching { cursor: usize },
    Candidate { valley: usize },
    Tracking { start: usize, peak: usize },
    Ended {
        start: usize,
        peak: usize,
        end: usize,
        reason: EndReason,
    },
    Done,
}

/// Detector for glucose spike events
pub struct SpikeDetector<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> SpikeDetector<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Detect all spikes, in increasing start order
    pub fn detect(&self, readings: &[Reading]) -> Result<Vec<SpikeEvent>, AnalysisError> {
        self.config.validate()?;
        ensure_ordered(readings)?;

        let mut spikes = Vec::new();
        let mut state = ScanState::Searching { cursor: 0 };

        loop {
            state = match state {
                ScanState::Searching { cursor } => match self.next_valley(readings, cursor) {
                    Some(valley) => ScanState::Candidate { valley },
                    None => ScanState::Done,
                },
                ScanState::Candidate { valley } => {
                    if self.rise_confirmed(readings, valley) {
                        match self.find_peak(readings, valley) {
                            Some(peak) if readings[peak].glucose > readings[valley].glucose => {
                                ScanState::Tracking {
                                    start: valley,
                                    peak,
                                }
                            }
                            _ => ScanState::Searching { cursor: valley + 1 },
                        }
                    } else {
                        ScanState::Searching { cursor: valley + 1 }
                    }
                }
                ScanState::Tracking { start, peak } => {
                    let (end, reason) = self.find_end(readings, start, peak);
                    ScanState::Ended {
                        start,
                        peak,
                        end,
                        reason,
                    }
                }
                ScanState::Ended {
                    start,
                    peak,
                    end,
                    reason,
                } => {
                    let spike = build_spike(readings, start, peak, end, reason);
                    debug!(
                        "spike {} -> {} ({:+.0} mg/dL, {})",
                        spike.start_time, spike.end_time, spike.magnitude, spike.end_reason
                    );
                    spikes.push(spike);
                    ScanState::Searching { cursor: end + 1 }
                }
                ScanState::Done => break,
            };
        }

        Ok(spikes)
    }

    fn next_valley(&self, readings: &[Reading], cursor: usize) -> Option<usize> {
        (cursor..readings.len()).find(|&i| self.is_local_valley(readings, i))
    }

    fn is_local_valley(&self, readings: &[Reading], idx: usize) -> bool {
        let w = self.config.valley_window;
        if idx < w || idx + w >= readings.len() {
            return false;
        }
        let current = readings[idx].glucose;
        readings[idx - w..=idx + w]
            .iter()
            .all(|r| current <= r.glucose)
    }

    /// Readings strictly after `idx` and within the maximum duration of it
    fn look_ahead<'r>(&self, readings: &'r [Reading], idx: usize) -> impl Iterator<Item = (usize, &'r Reading)> {
        let origin = readings[idx].timestamp;
        let max_minutes = self.config.max_duration_minutes;
        readings
            .iter()
            .enumerate()
            .skip(idx + 1)
            .take_while(move |(_, r)| minutes_between(origin, r.timestamp) <= max_minutes)
    }

    fn rise_confirmed(&self, readings: &[Reading], valley: usize) -> bool {
        let base = readings[valley].glucose;
        // Reaching the threshold only counts as a rise from below it
        self.look_ahead(readings, valley).any(|(_, r)| {
            r.glucose > base
                && (r.glucose - base >= self.config.min_spike_magnitude
                    || r.glucose >= self.config.min_spike_threshold)
        })
    }

    fn find_peak(&self, readings: &[Reading], start: usize) -> Option<usize> {
        let mut peak: Option<usize> = None;
        for (i, r) in self.look_ahead(readings, start) {
            match peak {
                Some(p) if readings[p].glucose >= r.glucose => {}
                _ => peak = Some(i),
            }
        }
        peak
    }

    fn find_end(&self, readings: &[Reading], start: usize, peak: usize) -> (usize, EndReason) {
        let start_reading = &readings[start];
        let mut flat_since = None;
        let mut last = peak;

        for (j, r) in self.look_ahead(readings, start).filter(|(j, _)| *j > peak) {
            last = j;

            if (r.glucose - start_reading.glucose).abs() <= self.config.return_tolerance {
                return (j, EndReason::ReturnedToBaseline);
            }

            let prev = &readings[j - 1];
            let intervals = minutes_between(prev.timestamp, r.timestamp)
                / self.config.sampling_interval_minutes;
            let rate = (r.glucose - prev.glucose).abs() / intervals;

            if rate < self.config.flat_rate_threshold {
                let since = *flat_since.get_or_insert(prev.timestamp);
                if minutes_between(since, r.timestamp) >= self.config.flat_duration_minutes {
                    return (j, EndReason::Plateau);
                }
            } else {
                flat_since = None;
            }
        }

        (last, EndReason::MaxDuration)
    }
}

fn build_spike(
    readings: &[Reading],
    start: usize,
    peak: usize,
    end: usize,
    end_reason: EndReason,
) -> SpikeEvent {
    let s = &readings[start];
    let p = &readings[peak];
    let e = &readings[end];
    SpikeEvent {
        start_time: s.timestamp,
        start_glucose: s.glucose,
        peak_time: p.timestamp,
        peak_glucose: p.glucose,
        end_time: e.timestamp,
        end_glucose: e.glucose,
        magnitude: p.glucose - s.glucose,
        duration_minutes: minutes_between(s.timestamp, e.timestamp),
        time_to_peak_minutes: minutes_between(s.timestamp, p.timestamp),
        end_reason,
    }
}

/// How many spikes ended for each reason
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndReasonCounts {
    pub returned_to_baseline: usize,
    pub plateau: usize,
    pub max_duration: usize,
}

/// Summary statistics over detected spikes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeSummary {
    pub count: usize,
    pub avg_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
    pub avg_peak: Option<f64>,
    pub max_peak: Option<f64>,
    pub avg_duration: Option<f64>,
    pub avg_time_to_peak: Option<f64>,
    pub end_reasons: EndReasonCounts,
}

impl SpikeSummary {
    pub fn from_spikes(spikes: &[SpikeEvent]) -> Self {
        let mut end_reasons = EndReasonCounts::default();
        for spike in spikes {
            match spike.end_reason {
                EndReason::ReturnedToBaseline => end_reasons.returned_to_baseline += 1,
                EndReason::Plateau => end_reasons.plateau += 1,
                EndReason::MaxDuration => end_reasons.max_duration += 1,
            }
        }

        let magnitudes: Vec<f64> = spikes.iter().map(|s| s.magnitude).collect();
        let peaks: Vec<f64> = spikes.iter().map(|s| s.peak_glucose).collect();
        let durations: Vec<f64> = spikes.iter().map(|s| s.duration_minutes).collect();
        let times_to_peak: Vec<f64> = spikes.iter().map(|s| s.time_to_peak_minutes).collect();

        Self {
            count: spikes.len(),
            avg_magnitude: stats::mean(&magnitudes),
            max_magnitude: stats::max(&magnitudes),
            avg_peak: stats::mean(&peaks),
            max_peak: stats::max(&peaks),
            avg_duration: stats::mean(&durations),
            avg_time_to_peak: stats::mean(&times_to_peak),
            end_reasons,
        }
    }
}

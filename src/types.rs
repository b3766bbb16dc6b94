//! Core types for the Glucose Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: readings and meals in, spikes, matches, AUC metrics and shape profiles
//! out, and the per-group statistics built on top of them.

use crate::detector::SpikeSummary;
use crate::error::AnalysisError;
use crate::matcher::MatchStats;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Elapsed minutes from `from` to `to` (negative if `to` is earlier)
pub fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

/// Sensor record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    /// Automatic reading recorded by the sensor at a fixed interval
    #[default]
    Historic,
    /// Reading taken by a manual scan
    Scan,
}

impl ReadingKind {
    /// Map a LibreView record type code to a reading kind
    pub fn from_record_type(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReadingKind::Historic),
            1 => Some(ReadingKind::Scan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingKind::Historic => "historic",
            ReadingKind::Scan => "scan",
        }
    }
}

/// One glucose sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    /// Glucose level (mg/dL)
    pub glucose: f64,
    #[serde(default)]
    pub kind: ReadingKind,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, glucose: f64) -> Self {
        Self {
            timestamp,
            glucose,
            kind: ReadingKind::Historic,
        }
    }
}

/// Readings whose timestamps fall within `[from, to]`
pub fn readings_between(readings: &[Reading], from: NaiveDateTime, to: NaiveDateTime) -> &[Reading] {
    let lo = readings.partition_point(|r| r.timestamp < from);
    let hi = readings.partition_point(|r| r.timestamp <= to);
    if lo >= hi {
        &readings[lo..lo]
    } else {
        &readings[lo..hi]
    }
}

/// A logged meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub timestamp: NaiveDateTime,
    /// Glycemic load estimate (non-negative)
    pub glycemic_load: f64,
}

/// Why a spike was considered over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ReturnedToBaseline,
    Plateau,
    MaxDuration,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::ReturnedToBaseline => "returned_to_baseline",
            EndReason::Plateau => "plateau",
            EndReason::MaxDuration => "max_duration",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected glucose spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub start_time: NaiveDateTime,
    pub start_glucose: f64,
    pub peak_time: NaiveDateTime,
    pub peak_glucose: f64,
    pub end_time: NaiveDateTime,
    pub end_glucose: f64,
    /// Peak minus start glucose (mg/dL)
    pub magnitude: f64,
    pub duration_minutes: f64,
    pub time_to_peak_minutes: f64,
    pub end_reason: EndReason,
}

impl SpikeEvent {
    /// Whether `t` lies within `[start_time, end_time]`
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start_time <= t && t <= self.end_time
    }

    /// Readings inside this spike's window
    pub fn window<'a>(&self, readings: &'a [Reading]) -> &'a [Reading] {
        readings_between(readings, self.start_time, self.end_time)
    }
}

/// Another meal close to a matched meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyMeal {
    pub timestamp: NaiveDateTime,
    pub glycemic_load: f64,
    /// Absolute distance from the matched meal
    pub minutes_apart: f64,
}

/// A meal attributed to a spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub meal: Meal,
    /// Index of the spike in the detected spike sequence
    pub spike_index: usize,
    pub spike: SpikeEvent,
    /// Spike start minus meal time
    pub delay_minutes: f64,
    /// Other meals were logged close to this one
    pub is_complex: bool,
    pub nearby_meals: Vec<NearbyMeal>,
}

/// Result of matching meals to spikes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matched: Vec<Match>,
    pub unmatched_spikes: Vec<SpikeEvent>,
    pub unmatched_meals: Vec<Meal>,
}

/// Integrated exposure metrics for one spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AucMetrics {
    /// Area above 0 mg/dL (mg/dL·min)
    pub auc_0: f64,
    /// Area above 70 mg/dL (mg/dL·min)
    pub auc_70: f64,
    /// Area above the spike's start glucose (mg/dL·min)
    pub auc_relative: f64,
    /// `auc_relative / (magnitude × duration)`, in (0, 1]
    pub normalized_auc: f64,
    /// Minutes from start until glucose returned near the start level
    pub recovery_time_minutes: Option<f64>,
}

/// AUC metrics joined to their spike by index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeAuc {
    pub spike_index: usize,
    pub metrics: AucMetrics,
}

/// Magnitude- and duration-independent shape of a matched spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub spike_start_time: NaiveDateTime,
    pub meal_timestamp: NaiveDateTime,
    pub glycemic_load: f64,
    /// Minutes since spike start, one per sample
    pub timestamps_minutes: Vec<f64>,
    /// 0 at the start level, 1 at the detected peak
    pub normalized_glucose: Vec<f64>,
    pub original_baseline: f64,
    pub original_peak: f64,
    pub original_magnitude: f64,
    pub duration_minutes: f64,
}

/// A caller-defined analysis period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub start_time: NaiveDateTime,
    /// Open-ended when absent
    pub end_time: Option<NaiveDateTime>,
    pub description: String,
}

impl Group {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start_time && self.end_time.map_or(true, |end| t <= end)
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Inclusive glycemic-load band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlRange {
    pub min: f64,
    pub max: f64,
}

impl GlRange {
    pub fn new(min: f64, max: f64) -> Result<Self, AnalysisError> {
        if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
            return Err(AnalysisError::ConfigError(format!(
                "invalid glycemic load range [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, gl: f64) -> bool {
        self.min <= gl && gl <= self.max
    }
}

/// A spike the user excluded from analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bypass {
    pub timestamp: NaiveDateTime,
    pub reason: String,
}

/// Pipeline stage that reported a recoverable problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Auc,
    Normalization,
}

/// A single skipped item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWarning {
    pub stage: Stage,
    pub spike_start_time: NaiveDateTime,
    pub message: String,
}

/// Descriptive statistics for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Which direction of change counts as better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LowerIsBetter,
    Neutral,
}

/// Per-match quantity tracked by the group analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AucRelative,
    NormalizedAuc,
    RecoveryTime,
    Magnitude,
    TimeToPeak,
    Delay,
    GlycemicLoad,
    Duration,
    PeakGlucose,
}

/// Metrics compared between groups, in display order
pub const KEY_METRICS: [Metric; 6] = [
    Metric::AucRelative,
    Metric::NormalizedAuc,
    Metric::RecoveryTime,
    Metric::Magnitude,
    Metric::TimeToPeak,
    Metric::Delay,
];

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::AucRelative => "AUC-relative",
            Metric::NormalizedAuc => "Normalized AUC",
            Metric::RecoveryTime => "Recovery time",
            Metric::Magnitude => "Magnitude",
            Metric::TimeToPeak => "Time to peak",
            Metric::Delay => "Delay",
            Metric::GlycemicLoad => "Glycemic load",
            Metric::Duration => "Duration",
            Metric::PeakGlucose => "Peak glucose",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::AucRelative => "mg/dL*min",
            Metric::NormalizedAuc | Metric::GlycemicLoad => "",
            Metric::RecoveryTime | Metric::TimeToPeak | Metric::Delay | Metric::Duration => {
                "min"
            }
            Metric::Magnitude | Metric::PeakGlucose => "mg/dL",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Metric::AucRelative
            | Metric::NormalizedAuc
            | Metric::RecoveryTime
            | Metric::Magnitude => Direction::LowerIsBetter,
            _ => Direction::Neutral,
        }
    }
}

/// Statistics per metric; absent when the group has no values for it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub auc_relative: Option<MetricStats>,
    pub normalized_auc: Option<MetricStats>,
    pub recovery_time: Option<MetricStats>,
    pub magnitude: Option<MetricStats>,
    pub time_to_peak: Option<MetricStats>,
    pub delay: Option<MetricStats>,
    pub glycemic_load: Option<MetricStats>,
    pub duration: Option<MetricStats>,
    pub peak_glucose: Option<MetricStats>,
}

impl GroupMetrics {
    pub fn get(&self, metric: Metric) -> Option<&MetricStats> {
        match metric {
            Metric::AucRelative => self.auc_relative.as_ref(),
            Metric::NormalizedAuc => self.normalized_auc.as_ref(),
            Metric::RecoveryTime => self.recovery_time.as_ref(),
            Metric::Magnitude => self.magnitude.as_ref(),
            Metric::TimeToPeak => self.time_to_peak.as_ref(),
            Metric::Delay => self.delay.as_ref(),
            Metric::GlycemicLoad => self.glycemic_load.as_ref(),
            Metric::Duration => self.duration.as_ref(),
            Metric::PeakGlucose => self.peak_glucose.as_ref(),
        }
    }
}

/// Summary of one group's matched events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub group: Group,
    pub gl_range: Option<GlRange>,
    pub match_count: usize,
    pub unmatched_spike_count: usize,
    pub unmatched_meal_count: usize,
    pub complex_events: usize,
    pub metrics: GroupMetrics,
}

/// Change of one metric from group A to group B
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricChange {
    pub metric: Metric,
    pub mean_a: Option<f64>,
    pub mean_b: Option<f64>,
    pub absolute_change: Option<f64>,
    pub percent_change: Option<f64>,
    /// Unset for metrics without a preferred direction
    pub is_improvement: Option<bool>,
}

/// Paired before/after comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupComparison {
    pub group_a: GroupStats,
    pub group_b: GroupStats,
    pub changes: Vec<MetricChange>,
    /// Directional metrics that improved
    pub improvement_count: usize,
    /// Directional metrics with a value in both groups
    pub directional_count: usize,
}

impl GroupComparison {
    pub fn change(&self, metric: Metric) -> Option<&MetricChange> {
        self.changes.iter().find(|c| c.metric == metric)
    }
}

/// Everything produced by one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub spikes: Vec<SpikeEvent>,
    /// Spikes removed because the user bypassed them
    pub bypassed_spikes: Vec<SpikeEvent>,
    pub spike_auc: Vec<SpikeAuc>,
    pub matches: MatchOutcome,
    pub profiles: Vec<NormalizedProfile>,
    pub warnings: Vec<AnalysisWarning>,
    pub spike_summary: SpikeSummary,
    pub match_stats: MatchStats,
}

impl AnalysisReport {
    /// AUC metrics for the spike at `spike_index`, if they could be computed
    pub fn auc_for(&self, spike_index: usize) -> Option<&AucMetrics> {
        self.spike_auc
            .iter()
            .find(|a| a.spike_index == spike_index)
            .map(|a| &a.metrics)
    }

    /// Number of items skipped by a stage
    pub fn skipped(&self, stage: Stage) -> usize {
        self.warnings.iter().filter(|w| w.stage == stage).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_readings_between_is_inclusive() {
        let readings: Vec<Reading> = (0..6).map(|i| Reading::new(at(6, i * 5), 100.0)).collect();
        let window = readings_between(&readings, at(6, 5), at(6, 15));
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].timestamp, at(6, 5));
        assert_eq!(window[2].timestamp, at(6, 15));

        assert!(readings_between(&readings, at(7, 0), at(8, 0)).is_empty());
        assert!(readings_between(&readings, at(6, 16), at(6, 19)).is_empty());
    }

    #[test]
    fn test_group_membership_open_ended() {
        let group = Group {
            start_time: at(6, 0),
            end_time: None,
            description: "open".to_string(),
        };
        assert!(group.is_open());
        assert!(group.contains(at(6, 0)));
        assert!(group.contains(at(23, 59)));
        assert!(!group.contains(at(5, 59)));

        let closed = Group {
            end_time: Some(at(12, 0)),
            ..group
        };
        assert!(closed.contains(at(12, 0)));
        assert!(!closed.contains(at(12, 1)));
    }

    #[test]
    fn test_gl_range_validation() {
        assert!(GlRange::new(10.0, 20.0).is_ok());
        assert!(GlRange::new(20.0, 10.0).is_err());
        assert!(GlRange::new(-1.0, 10.0).is_err());

        let range = GlRange::new(10.0, 20.0).unwrap();
        assert!(range.contains(10.0));
        assert!(range.contains(20.0));
        assert!(!range.contains(20.5));
    }

    #[test]
    fn test_metric_directions() {
        let directional: Vec<Metric> = KEY_METRICS
            .iter()
            .copied()
            .filter(|m| m.direction() == Direction::LowerIsBetter)
            .collect();
        assert_eq!(
            directional,
            vec![
                Metric::AucRelative,
                Metric::NormalizedAuc,
                Metric::RecoveryTime,
                Metric::Magnitude
            ]
        );
        assert_eq!(Metric::Delay.direction(), Direction::Neutral);
    }

    #[test]
    fn test_reading_kind_codes() {
        assert_eq!(ReadingKind::from_record_type(0), Some(ReadingKind::Historic));
        assert_eq!(ReadingKind::from_record_type(1), Some(ReadingKind::Scan));
        assert_eq!(ReadingKind::from_record_type(6), None);
    }
}

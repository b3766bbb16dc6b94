//! Report rendering
//!
//! Pretty JSON for any report value, and plain-text tables for terminal output.
//! Absent values render as `N/A`; directional metrics are marked `✓` when they
//! improved and `✗` when they did not.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::groups::SUPPLEMENTARY_METRICS;
use crate::normalizer::{AverageProfile, ProfileComparison};
use crate::types::{
    AnalysisReport, Direction, GroupComparison, GroupStats, Metric, NormalizedProfile, Stage,
    KEY_METRICS,
};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

const NOT_AVAILABLE: &str = "N/A";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Encode any report value as pretty JSON
pub fn encode_to_json<T: Serialize>(value: &T) -> Result<String, AnalysisError> {
    serde_json::to_string_pretty(value).map_err(AnalysisError::JsonError)
}

/// Who produced a report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Producer {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for Producer {
    fn default() -> Self {
        Self {
            name: PRODUCER_NAME,
            version: FLUX_VERSION,
        }
    }
}

/// A full run as written to disk, with the thresholds that produced it
#[derive(Debug, Serialize)]
pub struct ReportEnvelope<'a> {
    pub producer: Producer,
    pub config: &'a AnalysisConfig,
    pub report: &'a AnalysisReport,
}

/// Encode a run together with its producer and configuration
pub fn encode_report(report: &AnalysisReport, config: &AnalysisConfig) -> Result<String, AnalysisError> {
    encode_to_json(&ReportEnvelope {
        producer: Producer::default(),
        config,
        report,
    })
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn fmt_signed(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{v:+.decimals$}"))
}

fn fmt_percent(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |p| format!("{p:+.1}%"))
}

fn fmt_time(t: NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn decimals_for(metric: Metric) -> usize {
    match metric {
        Metric::NormalizedAuc => 3,
        Metric::GlycemicLoad => 1,
        _ => 0,
    }
}

fn metric_name(metric: Metric) -> String {
    match metric.unit() {
        "" => metric.label().to_string(),
        unit => format!("{} ({unit})", metric.label()),
    }
}

/// Number of metrics that can count as an improvement
fn directional_metric_count() -> usize {
    KEY_METRICS
        .iter()
        .filter(|m| m.direction() == Direction::LowerIsBetter)
        .count()
}

/// Overview of a finished run
pub fn render_summary(report: &AnalysisReport) -> String {
    Summary(report).to_string()
}

struct Summary<'a>(&'a AnalysisReport);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let summary = &report.spike_summary;
        let stats = &report.match_stats;

        writeln!(f, "Spikes detected:     {}", summary.count)?;
        writeln!(f, "Spikes bypassed:     {}", report.bypassed_spikes.len())?;
        writeln!(
            f,
            "Average magnitude:   {} mg/dL",
            fmt_opt(summary.avg_magnitude, 1)
        )?;
        writeln!(f, "Highest peak:        {} mg/dL", fmt_opt(summary.max_peak, 0))?;
        writeln!(
            f,
            "Average duration:    {} min",
            fmt_opt(summary.avg_duration, 0)
        )?;
        writeln!(
            f,
            "End reasons:         {} returned, {} plateau, {} max duration",
            summary.end_reasons.returned_to_baseline,
            summary.end_reasons.plateau,
            summary.end_reasons.max_duration
        )?;
        writeln!(
            f,
            "Meals matched:       {}/{} ({} complex)",
            stats.matched, stats.total_meals, stats.complex_events
        )?;
        writeln!(f, "Unmatched spikes:    {}", stats.unmatched_spikes)?;
        writeln!(
            f,
            "Average delay:       {} min",
            fmt_opt(stats.delay_minutes.map(|d| d.mean), 0)
        )?;
        writeln!(
            f,
            "Skipped:             {} AUC, {} profile",
            report.skipped(Stage::Auc),
            report.skipped(Stage::Normalization)
        )
    }
}

/// One group's statistics as a table
pub fn render_group_stats(stats: &GroupStats) -> String {
    GroupTable(stats).to_string()
}

struct GroupTable<'a>(&'a GroupStats);

impl fmt::Display for GroupTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.0;
        let group = &stats.group;
        let end = group.end_time.map_or_else(|| "now".to_string(), fmt_time);

        writeln!(f, "{}", group.description)?;
        writeln!(f, "Period: {} to {end}", fmt_time(group.start_time))?;
        if let Some(range) = stats.gl_range {
            writeln!(f, "GL range: {}-{}", range.min, range.max)?;
        }
        writeln!(
            f,
            "Matched: {}  Unmatched spikes: {}  Unmatched meals: {}  Complex: {}",
            stats.match_count,
            stats.unmatched_spike_count,
            stats.unmatched_meal_count,
            stats.complex_events
        )?;
        writeln!(
            f,
            "{:<26} {:>9} {:>9} {:>9} {:>9} {:>9} {:>5}",
            "Metric", "Mean", "Median", "Std", "Min", "Max", "N"
        )?;

        for &metric in KEY_METRICS.iter().chain(SUPPLEMENTARY_METRICS.iter()) {
            let d = decimals_for(metric);
            let s = stats.metrics.get(metric);
            writeln!(
                f,
                "{:<26} {:>9} {:>9} {:>9} {:>9} {:>9} {:>5}",
                metric_name(metric),
                fmt_opt(s.map(|s| s.mean), d),
                fmt_opt(s.map(|s| s.median), d),
                fmt_opt(s.map(|s| s.std_dev), d),
                fmt_opt(s.map(|s| s.min), d),
                fmt_opt(s.map(|s| s.max), d),
                s.map_or(0, |s| s.count)
            )?;
        }
        Ok(())
    }
}

/// Side-by-side comparison of two groups
pub fn render_comparison(comparison: &GroupComparison) -> String {
    ComparisonTable(comparison).to_string()
}

struct ComparisonTable<'a>(&'a GroupComparison);

impl fmt::Display for ComparisonTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let comparison = self.0;
        let a = &comparison.group_a.group.description;
        let b = &comparison.group_b.group.description;

        writeln!(f, "{a} vs {b}")?;
        if let Some(range) = comparison.group_a.gl_range {
            writeln!(f, "GL range: {}-{}", range.min, range.max)?;
        }
        writeln!(
            f,
            "Matched: {} vs {}",
            comparison.group_a.match_count, comparison.group_b.match_count
        )?;
        writeln!(
            f,
            "{:<26} {:>10} {:>10} {:>10} {:>8}",
            "Metric", "A", "B", "Change", "%"
        )?;

        for change in &comparison.changes {
            let d = decimals_for(change.metric);
            let mark = match change.is_improvement {
                Some(true) => "✓",
                Some(false) => "✗",
                None => "",
            };
            writeln!(
                f,
                "{:<26} {:>10} {:>10} {:>10} {:>8} {mark}",
                metric_name(change.metric),
                fmt_opt(change.mean_a, d),
                fmt_opt(change.mean_b, d),
                fmt_signed(change.absolute_change, d),
                fmt_percent(change.percent_change)
            )?;
        }

        writeln!(
            f,
            "Improvement in {}/{} key metrics",
            comparison.improvement_count,
            directional_metric_count()
        )
    }
}

/// Duration, magnitude and mean curve of each group's shape profiles
pub fn render_profile_comparison(comparison: &ProfileComparison) -> String {
    ProfileTable(comparison).to_string()
}

struct ProfileTable<'a>(&'a ProfileComparison);

impl fmt::Display for ProfileTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let comparison = self.0;
        writeln!(
            f,
            "Profiles: {} vs {}",
            comparison.group_a.description, comparison.group_b.description
        )?;
        writeln!(
            f,
            "{:<16} {:>5} {:>14} {:>16} {:>12}",
            "Group", "N", "Duration (min)", "Magnitude (mg/dL)", "Peak at (min)"
        )?;
        for summary in [&comparison.group_a, &comparison.group_b] {
            let stats = summary.stats.as_ref();
            writeln!(
                f,
                "{:<16} {:>5} {:>14} {:>16} {:>12}",
                summary.description,
                stats.map_or(0, |s| s.count),
                fmt_opt(stats.map(|s| s.duration_mean), 0),
                fmt_opt(stats.map(|s| s.magnitude_mean), 1),
                fmt_opt(summary.average.as_ref().and_then(mean_curve_peak), 0)
            )?;
        }

        match &comparison.change {
            Some(change) => writeln!(
                f,
                "Duration {} min ({}), magnitude {} mg/dL ({})",
                fmt_signed(Some(change.duration_change_minutes), 0),
                fmt_percent(change.duration_percent_change),
                fmt_signed(Some(change.magnitude_change), 1),
                fmt_percent(change.magnitude_percent_change)
            ),
            None => writeln!(f, "Duration {NOT_AVAILABLE}, magnitude {NOT_AVAILABLE}"),
        }
    }
}

/// Minutes at which the mean curve is highest
fn mean_curve_peak(average: &AverageProfile) -> Option<f64> {
    average
        .mean
        .iter()
        .zip(&average.timestamps_minutes)
        .max_by(|a, b| a.0.total_cmp(b.0))
        .map(|(_, &t)| t)
}

/// Similar profiles, most similar first
pub fn render_similar(target: &NormalizedProfile, similar: &[(&NormalizedProfile, f64)]) -> String {
    SimilarList { target, similar }.to_string()
}

struct SimilarList<'a, 'p> {
    target: &'a NormalizedProfile,
    similar: &'a [(&'p NormalizedProfile, f64)],
}

impl fmt::Display for SimilarList<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.target;
        writeln!(
            f,
            "Spike at {} (meal {}, GL {:.1}, +{:.0} mg/dL, {:.0} min)",
            fmt_time(target.spike_start_time),
            fmt_time(target.meal_timestamp),
            target.glycemic_load,
            target.original_magnitude,
            target.duration_minutes
        )?;
        if self.similar.is_empty() {
            return writeln!(f, "No similar spikes");
        }
        for (profile, score) in self.similar {
            writeln!(
                f,
                "  {:.3}  {}  GL {:>5.1}  +{:>3.0} mg/dL  {:>4.0} min",
                score,
                fmt_time(profile.spike_start_time),
                profile.glycemic_load,
                profile.original_magnitude,
                profile.duration_minutes
            )?;
        }
        Ok(())
    }
}

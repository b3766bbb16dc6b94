//! Group analysis
//!
//! Summarizes the matched events of a caller-defined period and compares two
//! periods metric by metric.

use crate::types::{
    AucMetrics, Direction, GlRange, Group, GroupComparison, GroupMetrics, GroupStats, Match,
    Meal, Metric, MetricChange, MetricStats, SpikeAuc, SpikeEvent, KEY_METRICS,
};
use std::collections::HashMap;

/// Metrics reported alongside the key metrics, never counted as improvements
pub const SUPPLEMENTARY_METRICS: [Metric; 3] =
    [Metric::GlycemicLoad, Metric::Duration, Metric::PeakGlucose];

/// Per-group statistics and comparisons
pub struct GroupAnalyzer;

impl GroupAnalyzer {
    /// Statistics for one group, optionally restricted to a glycemic-load band
    pub fn analyze_group(
        group: &Group,
        matches: &[Match],
        spike_auc: &[SpikeAuc],
        unmatched_spikes: &[SpikeEvent],
        unmatched_meals: &[Meal],
        gl_range: Option<GlRange>,
    ) -> GroupStats {
        let in_band = |gl: f64| gl_range.map_or(true, |range| range.contains(gl));

        let members: Vec<&Match> = matches
            .iter()
            .filter(|m| group.contains(m.meal.timestamp) && in_band(m.meal.glycemic_load))
            .collect();

        let auc_by_spike: HashMap<usize, &AucMetrics> = spike_auc
            .iter()
            .map(|a| (a.spike_index, &a.metrics))
            .collect();
        let aucs: Vec<&AucMetrics> = members
            .iter()
            .filter_map(|m| auc_by_spike.get(&m.spike_index).copied())
            .collect();

        let metrics = GroupMetrics {
            auc_relative: MetricStats::from_values(
                &aucs.iter().map(|a| a.auc_relative).collect::<Vec<_>>(),
            ),
            normalized_auc: MetricStats::from_values(
                &aucs.iter().map(|a| a.normalized_auc).collect::<Vec<_>>(),
            ),
            recovery_time: MetricStats::from_values(
                &aucs
                    .iter()
                    .filter_map(|a| a.recovery_time_minutes)
                    .collect::<Vec<_>>(),
            ),
            magnitude: member_stats(&members, |m| m.spike.magnitude),
            time_to_peak: member_stats(&members, |m| m.spike.time_to_peak_minutes),
            delay: member_stats(&members, |m| m.delay_minutes),
            glycemic_load: member_stats(&members, |m| m.meal.glycemic_load),
            duration: member_stats(&members, |m| m.spike.duration_minutes),
            peak_glucose: member_stats(&members, |m| m.spike.peak_glucose),
        };

        GroupStats {
            group: group.clone(),
            gl_range,
            match_count: members.len(),
            unmatched_spike_count: unmatched_spikes
                .iter()
                .filter(|s| group.contains(s.start_time))
                .count(),
            unmatched_meal_count: unmatched_meals
                .iter()
                .filter(|m| group.contains(m.timestamp) && in_band(m.glycemic_load))
                .count(),
            complex_events: members.iter().filter(|m| m.is_complex).count(),
            metrics,
        }
    }

    /// Change from group A to group B for every metric
    pub fn compare_groups(a: &GroupStats, b: &GroupStats) -> GroupComparison {
        let changes: Vec<MetricChange> = KEY_METRICS
            .iter()
            .chain(SUPPLEMENTARY_METRICS.iter())
            .map(|&metric| metric_change(metric, a, b))
            .collect();

        let directional: Vec<&MetricChange> = changes
            .iter()
            .filter(|c| c.is_improvement.is_some())
            .collect();

        GroupComparison {
            group_a: a.clone(),
            group_b: b.clone(),
            improvement_count: directional
                .iter()
                .filter(|c| c.is_improvement == Some(true))
                .count(),
            directional_count: directional.len(),
            changes,
        }
    }
}

fn member_stats(members: &[&Match], value: impl Fn(&Match) -> f64) -> Option<MetricStats> {
    let values: Vec<f64> = members.iter().map(|m| value(m)).collect();
    MetricStats::from_values(&values)
}

fn metric_change(metric: Metric, a: &GroupStats, b: &GroupStats) -> MetricChange {
    let mean_a = a.metrics.get(metric).map(|s| s.mean);
    let mean_b = b.metrics.get(metric).map(|s| s.mean);

    let absolute_change = match (mean_a, mean_b) {
        (Some(x), Some(y)) => Some(y - x),
        _ => None,
    };
    let percent_change = match (absolute_change, mean_a) {
        (Some(delta), Some(base)) if base != 0.0 => Some(delta / base * 100.0),
        _ => None,
    };
    let is_improvement = match metric.direction() {
        Direction::LowerIsBetter => absolute_change.map(|delta| delta < 0.0),
        Direction::Neutral => None,
    };

    MetricChange {
        metric,
        mean_a,
        mean_b,
        absolute_change,
        percent_change,
        is_improvement,
    }
}

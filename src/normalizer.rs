//! Shape normalization
//!
//! Rescales each matched spike so that its start level maps to 0 and its detected
//! peak maps to 1, keeping true elapsed minutes on the time axis. Profiles can then
//! be compared by shape alone:
//! - Each profile is resampled at evenly spaced fractions of its own duration
//! - Distance is the mean absolute (or root mean square) difference
//! - Similarity is `1 - min(1, distance)`

use crate::config::{AnalysisConfig, ShapeMetric};
use crate::error::AnalysisError;
use crate::stats;
use crate::types::{
    minutes_between, AnalysisWarning, Group, Match, NormalizedProfile, Reading, Stage,
};
use log::warn;
use serde::{Deserialize, Serialize};

/// Profiles built from a set of matches, plus the matches that were skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileBatch {
    pub profiles: Vec<NormalizedProfile>,
    pub warnings: Vec<AnalysisWarning>,
}

/// Normalizer for matched spike windows
pub struct Normalizer;

impl Normalizer {
    /// Build a profile per match; matches without a usable window are skipped
    pub fn normalize(matches: &[Match], readings: &[Reading]) -> ProfileBatch {
        let mut batch = ProfileBatch::default();
        for m in matches {
            match Self::profile(m, readings) {
                Ok(profile) => batch.profiles.push(profile),
                Err(err) => {
                    warn!("skipping profile for spike at {}: {err}", m.spike.start_time);
                    batch.warnings.push(AnalysisWarning {
                        stage: Stage::Normalization,
                        spike_start_time: m.spike.start_time,
                        message: err.to_string(),
                    });
                }
            }
        }
        batch
    }

    /// Normalized profile for one match
    pub fn profile(m: &Match, readings: &[Reading]) -> Result<NormalizedProfile, AnalysisError> {
        let spike = &m.spike;
        let window = spike.window(readings);
        if window.len() < 2 {
            return Err(AnalysisError::DataError(format!(
                "{} reading(s) in spike window, need at least 2",
                window.len()
            )));
        }
        if spike.magnitude <= 0.0 {
            return Err(AnalysisError::DataError(format!(
                "spike magnitude is {}",
                spike.magnitude
            )));
        }

        let timestamps_minutes = window
            .iter()
            .map(|r| minutes_between(spike.start_time, r.timestamp))
            .collect();
        // Clamped below only; a later sub-peak may exceed 1
        let normalized_glucose = window
            .iter()
            .map(|r| ((r.glucose - spike.start_glucose) / spike.magnitude).max(0.0))
            .collect();

        Ok(NormalizedProfile {
            spike_start_time: spike.start_time,
            meal_timestamp: m.meal.timestamp,
            glycemic_load: m.meal.glycemic_load,
            timestamps_minutes,
            normalized_glucose,
            original_baseline: spike.start_glucose,
            original_peak: spike.peak_glucose,
            original_magnitude: spike.magnitude,
            duration_minutes: spike.duration_minutes,
        })
    }

    /// Mean curve over profiles aligned on absolute minutes since start
    ///
    /// The grid spans `[0, longest duration]`; a profile contributes 0 beyond its own end.
    pub fn average_profile(profiles: &[NormalizedProfile], points: usize) -> Option<AverageProfile> {
        if points < 2 {
            return None;
        }
        let longest = stats::max(
            &profiles
                .iter()
                .filter_map(|p| p.timestamps_minutes.last().copied())
                .collect::<Vec<_>>(),
        )?;

        let step = longest / (points - 1) as f64;
        let timestamps_minutes: Vec<f64> = (0..points).map(|i| i as f64 * step).collect();

        let mut mean = Vec::with_capacity(points);
        let mut std_dev = Vec::with_capacity(points);
        for &t in &timestamps_minutes {
            let values: Vec<f64> = profiles
                .iter()
                .filter(|p| !p.timestamps_minutes.is_empty())
                .map(|p| match p.timestamps_minutes.last() {
                    Some(&end) if t <= end => {
                        interpolate(&p.timestamps_minutes, &p.normalized_glucose, t)
                    }
                    _ => 0.0,
                })
                .collect();
            mean.push(stats::mean(&values)?);
            std_dev.push(stats::std_dev(&values)?);
        }

        Some(AverageProfile {
            timestamps_minutes,
            mean,
            std_dev,
            count: profiles.len(),
        })
    }
}

/// Pointwise mean and spread of several profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageProfile {
    pub timestamps_minutes: Vec<f64>,
    pub mean: Vec<f64>,
    pub std_dev: Vec<f64>,
    pub count: usize,
}

/// Summary of a profile set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSetStats {
    pub count: usize,
    pub duration_mean: f64,
    pub duration_std: f64,
    pub duration_min: f64,
    pub duration_max: f64,
    pub magnitude_mean: f64,
    pub magnitude_std: f64,
    pub glycemic_load_mean: f64,
    pub glycemic_load_std: f64,
}

impl ProfileSetStats {
    pub fn from_profiles(profiles: &[NormalizedProfile]) -> Option<Self> {
        let durations: Vec<f64> = profiles.iter().map(|p| p.duration_minutes).collect();
        let magnitudes: Vec<f64> = profiles.iter().map(|p| p.original_magnitude).collect();
        let loads: Vec<f64> = profiles.iter().map(|p| p.glycemic_load).collect();

        Some(Self {
            count: profiles.len(),
            duration_mean: stats::mean(&durations)?,
            duration_std: stats::std_dev(&durations)?,
            duration_min: stats::min(&durations)?,
            duration_max: stats::max(&durations)?,
            magnitude_mean: stats::mean(&magnitudes)?,
            magnitude_std: stats::std_dev(&magnitudes)?,
            glycemic_load_mean: stats::mean(&loads)?,
            glycemic_load_std: stats::std_dev(&loads)?,
        })
    }
}

/// Profiles of one group: spread of duration and magnitude, and the mean curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileGroupSummary {
    pub description: String,
    /// Absent when no profile falls in the group
    pub stats: Option<ProfileSetStats>,
    pub average: Option<AverageProfile>,
}

impl ProfileGroupSummary {
    fn from_group(group: &Group, profiles: &[NormalizedProfile], points: usize) -> Self {
        let members: Vec<NormalizedProfile> = profiles
            .iter()
            .filter(|p| group.contains(p.meal_timestamp))
            .cloned()
            .collect();
        Self {
            description: group.description.clone(),
            stats: ProfileSetStats::from_profiles(&members),
            average: Normalizer::average_profile(&members, points),
        }
    }
}

/// Change of mean duration and magnitude from group A to group B
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileChange {
    pub duration_change_minutes: f64,
    pub magnitude_change: f64,
    pub duration_percent_change: Option<f64>,
    pub magnitude_percent_change: Option<f64>,
}

/// Shape-level comparison of two groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileComparison {
    pub group_a: ProfileGroupSummary,
    pub group_b: ProfileGroupSummary,
    /// Absent unless both groups have profiles
    pub change: Option<ProfileChange>,
}

impl Normalizer {
    /// Compare the profiles of two groups, assigned by meal time
    pub fn compare_groups(
        a: &Group,
        b: &Group,
        profiles: &[NormalizedProfile],
        points: usize,
    ) -> ProfileComparison {
        let group_a = ProfileGroupSummary::from_group(a, profiles, points);
        let group_b = ProfileGroupSummary::from_group(b, profiles, points);

        let change = match (&group_a.stats, &group_b.stats) {
            (Some(sa), Some(sb)) => {
                let duration_change_minutes = sb.duration_mean - sa.duration_mean;
                let magnitude_change = sb.magnitude_mean - sa.magnitude_mean;
                Some(ProfileChange {
                    duration_change_minutes,
                    magnitude_change,
                    duration_percent_change: percent_of(duration_change_minutes, sa.duration_mean),
                    magnitude_percent_change: percent_of(magnitude_change, sa.magnitude_mean),
                })
            }
            _ => None,
        };

        ProfileComparison {
            group_a,
            group_b,
            change,
        }
    }
}

fn percent_of(delta: f64, base: f64) -> Option<f64> {
    (base > 0.0).then(|| delta / base * 100.0)
}

/// Shape similarity between normalized profiles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeComparator {
    points: usize,
    metric: ShapeMetric,
}

impl Default for ShapeComparator {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl ShapeComparator {
    pub fn new(points: usize, metric: ShapeMetric) -> Self {
        Self {
            points: points.max(2),
            metric,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.resample_points, config.shape_metric)
    }

    /// Similarity in `[0, 1]`, 1 for identical shapes
    pub fn compare(&self, a: &NormalizedProfile, b: &NormalizedProfile) -> f64 {
        let (Some(ra), Some(rb)) = (self.resample(a), self.resample(b)) else {
            return 0.0;
        };

        let n = ra.len() as f64;
        let distance = match self.metric {
            ShapeMetric::MeanAbsolute => {
                ra.iter().zip(&rb).map(|(x, y)| (x - y).abs()).sum::<f64>() / n
            }
            ShapeMetric::RootMeanSquare => {
                (ra.iter().zip(&rb).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / n).sqrt()
            }
        };

        1.0 - distance.min(1.0)
    }

    /// Profiles at least `threshold` similar to `target`, most similar first
    ///
    /// The target's own spike is never returned.
    pub fn find_similar<'p>(
        &self,
        target: &NormalizedProfile,
        profiles: &'p [NormalizedProfile],
        threshold: f64,
    ) -> Vec<(&'p NormalizedProfile, f64)> {
        let mut similar: Vec<(&NormalizedProfile, f64)> = profiles
            .iter()
            .filter(|p| p.spike_start_time != target.spike_start_time)
            .map(|p| (p, self.compare(target, p)))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        similar.sort_by(|a, b| b.1.total_cmp(&a.1));
        similar
    }

    /// Values at evenly spaced fractions of the profile's own duration
    fn resample(&self, profile: &NormalizedProfile) -> Option<Vec<f64>> {
        let ts = &profile.timestamps_minutes;
        let vs = &profile.normalized_glucose;
        if ts.is_empty() || ts.len() != vs.len() {
            return None;
        }
        let first = ts[0];
        let span = ts[ts.len() - 1] - first;
        Some(
            (0..self.points)
                .map(|i| {
                    let t = first + span * i as f64 / (self.points - 1) as f64;
                    interpolate(ts, vs, t)
                })
                .collect(),
        )
    }
}

/// Linear interpolation, holding the end values outside the sampled range
fn interpolate(ts: &[f64], vs: &[f64], t: f64) -> f64 {
    let idx = ts.partition_point(|&x| x < t);
    if idx == 0 {
        return vs[0];
    }
    if idx >= ts.len() {
        return vs[vs.len() - 1];
    }
    let (t0, t1) = (ts[idx - 1], ts[idx]);
    let (v0, v1) = (vs[idx - 1], vs[idx]);
    if t1 <= t0 {
        return v1;
    }
    v0 + (v1 - v0) * (t - t0) / (t1 - t0)
}

//! Pipeline orchestration
//!
//! Runs the full analysis over one dataset:
//! 1. SpikeDetector - Segment historic readings into spike events
//! 2. Bypass filter - Drop spikes the user excluded
//! 3. MealMatcher - Attribute meals to spikes
//! 4. AucCalculator - Exposure metrics for every kept spike
//! 5. Normalizer - Shape profiles for matched spikes
//!
//! Group statistics and comparisons are derived from the resulting report on demand.

use crate::auc::AucCalculator;
use crate::config::AnalysisConfig;
use crate::detector::{SpikeDetector, SpikeSummary};
use crate::error::AnalysisError;
use crate::groups::GroupAnalyzer;
use crate::matcher::{MatchStats, MealMatcher};
use crate::normalizer::{Normalizer, ProfileComparison, ShapeComparator};
use crate::types::{
    AnalysisReport, AnalysisWarning, Bypass, GlRange, Group, GroupComparison, GroupStats, Meal,
    NormalizedProfile, Reading, ReadingKind, SpikeAuc, SpikeEvent, Stage,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Everything one analysis run consumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub readings: Vec<Reading>,
    pub meals: Vec<Meal>,
    #[serde(default)]
    pub bypasses: Vec<Bypass>,
}

/// Run the full pipeline once.
///
/// # Example
/// ```ignore
/// let input = AnalysisInput { readings, meals, bypasses: vec![] };
/// let report = analyze(&input, &AnalysisConfig::default())?;
/// println!("{} spikes, {} matched", report.spikes.len(), report.matches.matched.len());
/// ```
pub fn analyze(
    input: &AnalysisInput,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    let matcher = MealMatcher::new(config)?;

    // Stage 1: detect on continuous readings only
    let readings: Vec<Reading> = input
        .readings
        .iter()
        .filter(|r| r.kind == ReadingKind::Historic)
        .cloned()
        .collect();
    let detected = SpikeDetector::new(config).detect(&readings)?;
    info!(
        "detected {} spikes in {} readings",
        detected.len(),
        readings.len()
    );

    // Stage 2: bypassed spikes never reach matching
    let (bypassed_spikes, spikes): (Vec<SpikeEvent>, Vec<SpikeEvent>) = detected
        .into_iter()
        .partition(|spike| is_bypassed(spike, &input.bypasses));
    if !bypassed_spikes.is_empty() {
        info!("bypassed {} spikes", bypassed_spikes.len());
    }

    // Stage 3: match meals
    let matches = matcher.match_meals(&input.meals, &spikes);
    info!(
        "matched {} meals, {} unmatched spikes, {} unmatched meals",
        matches.matched.len(),
        matches.unmatched_spikes.len(),
        matches.unmatched_meals.len()
    );

    // Stage 4: AUC for matched and unmatched spikes alike
    let (spike_auc, mut warnings) = quantify_spikes(&AucCalculator::new(config), &spikes, &readings)?;

    // Stage 5: shape profiles
    let batch = Normalizer::normalize(&matches.matched, &readings);
    warnings.extend(batch.warnings);
    info!(
        "built {} profiles, {} items skipped",
        batch.profiles.len(),
        warnings.len()
    );

    Ok(AnalysisReport {
        spike_summary: SpikeSummary::from_spikes(&spikes),
        match_stats: MatchStats::from_outcome(&matches),
        spikes,
        bypassed_spikes,
        spike_auc,
        matches,
        profiles: batch.profiles,
        warnings,
    })
}

/// AUC per spike; spikes with locally insufficient data are skipped with a warning
fn quantify_spikes(
    calculator: &AucCalculator,
    spikes: &[SpikeEvent],
    readings: &[Reading],
) -> Result<(Vec<SpikeAuc>, Vec<AnalysisWarning>), AnalysisError> {
    let mut spike_auc = Vec::with_capacity(spikes.len());
    let mut warnings = Vec::new();
    for (spike_index, spike) in spikes.iter().enumerate() {
        match calculator.compute(spike, readings) {
            Ok(metrics) => spike_auc.push(SpikeAuc {
                spike_index,
                metrics,
            }),
            Err(err) if err.is_local() => {
                warn!("skipping AUC for spike at {}: {err}", spike.start_time);
                warnings.push(AnalysisWarning {
                    stage: Stage::Auc,
                    spike_start_time: spike.start_time,
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok((spike_auc, warnings))
}

fn is_bypassed(spike: &SpikeEvent, bypasses: &[Bypass]) -> bool {
    bypasses.iter().any(|b| spike.contains(b.timestamp))
}

/// Analyzer bound to one validated configuration.
///
/// Use this when the same thresholds serve several runs and follow-up queries.
pub struct SpikeAnalyzer {
    config: AnalysisConfig,
    comparator: ShapeComparator,
}

impl Default for SpikeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpikeAnalyzer {
    /// Create an analyzer with default thresholds
    pub fn new() -> Self {
        let config = AnalysisConfig::default();
        Self {
            comparator: ShapeComparator::from_config(&config),
            config,
        }
    }

    /// Create an analyzer with custom thresholds
    pub fn with_config(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let config = config.validated()?;
        Ok(Self {
            comparator: ShapeComparator::from_config(&config),
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisReport, AnalysisError> {
        analyze(input, &self.config)
    }

    /// Statistics for one group of a finished run
    pub fn group_stats(
        &self,
        report: &AnalysisReport,
        group: &Group,
        gl_range: Option<GlRange>,
    ) -> GroupStats {
        GroupAnalyzer::analyze_group(
            group,
            &report.matches.matched,
            &report.spike_auc,
            &report.matches.unmatched_spikes,
            &report.matches.unmatched_meals,
            gl_range,
        )
    }

    /// Compare two groups looked up by description
    pub fn compare_groups(
        &self,
        report: &AnalysisReport,
        groups: &[Group],
        before: &str,
        after: &str,
        gl_range: Option<GlRange>,
    ) -> Result<GroupComparison, AnalysisError> {
        let a = find_group(groups, before)?;
        let b = find_group(groups, after)?;
        Ok(GroupAnalyzer::compare_groups(
            &self.group_stats(report, a, gl_range),
            &self.group_stats(report, b, gl_range),
        ))
    }

    /// Compare the shape profiles of two groups looked up by description
    pub fn compare_profiles(
        &self,
        report: &AnalysisReport,
        groups: &[Group],
        before: &str,
        after: &str,
    ) -> Result<ProfileComparison, AnalysisError> {
        let a = find_group(groups, before)?;
        let b = find_group(groups, after)?;
        Ok(Normalizer::compare_groups(
            a,
            b,
            &report.profiles,
            self.config.resample_points,
        ))
    }

    /// Profiles shaped like the profile at `index`, most similar first
    pub fn find_similar<'r>(
        &self,
        report: &'r AnalysisReport,
        index: usize,
        threshold: f64,
    ) -> Result<Vec<(&'r NormalizedProfile, f64)>, AnalysisError> {
        let target = report.profiles.get(index).ok_or_else(|| {
            AnalysisError::DataError(format!(
                "no profile at index {index} ({} profiles)",
                report.profiles.len()
            ))
        })?;
        Ok(self
            .comparator
            .find_similar(target, &report.profiles, threshold))
    }
}

fn find_group<'g>(groups: &'g [Group], description: &str) -> Result<&'g Group, AnalysisError> {
    groups
        .iter()
        .find(|g| g.description == description)
        .ok_or_else(|| AnalysisError::UnknownGroup(description.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_RESAMPLE_POINTS;
    use crate::fixtures::{at, breakfast_at, breakfast_readings, day, meal, series};
    use crate::types::{EndReason, Metric};
    use pretty_assertions::assert_eq;

    fn three_breakfasts() -> AnalysisInput {
        let mut readings = breakfast_readings();
        readings.extend(breakfast_at(day(2, 6, 0)));
        readings.extend(breakfast_at(day(3, 6, 0)));
        AnalysisInput {
            readings,
            meals: vec![
                meal(at(6, 0), 25.0),
                meal(day(2, 5, 50), 30.0),
                meal(day(3, 5, 45), 10.0),
            ],
            bypasses: vec![],
        }
    }

    #[test]
    fn test_breakfast_pipeline() {
        let input = AnalysisInput {
            readings: breakfast_readings(),
            meals: vec![meal(at(6, 0), 25.0)],
            bypasses: vec![],
        };

        let report = analyze(&input, &AnalysisConfig::default()).unwrap();

        assert_eq!(report.spikes.len(), 1);
        assert_eq!(report.spikes[0].end_reason, EndReason::ReturnedToBaseline);
        assert_eq!(report.matches.matched.len(), 1);
        assert_eq!(report.matches.matched[0].delay_minutes, 15.0);
        assert_eq!(report.profiles.len(), 1);
        assert!(report.warnings.is_empty());

        let auc = report.auc_for(0).unwrap();
        assert!(auc.auc_relative > 0.0);
        assert!(auc.normalized_auc > 0.0 && auc.normalized_auc <= 1.0);
        assert_eq!(auc.recovery_time_minutes, Some(105.0));

        assert_eq!(report.spike_summary.count, 1);
        assert_eq!(report.match_stats.matched, 1);
    }

    #[test]
    fn test_scan_readings_ignored() {
        let mut input = AnalysisInput {
            readings: breakfast_readings(),
            meals: vec![],
            bypasses: vec![],
        };
        // A scan duplicating a historic timestamp would otherwise break ordering
        let mut scan = Reading::new(at(6, 20), 250.0);
        scan.kind = ReadingKind::Scan;
        input.readings.insert(5, scan);

        let report = analyze(&input, &AnalysisConfig::default()).unwrap();
        assert_eq!(report.spikes[0].peak_glucose, 168.0);
        assert_eq!(report.matches.unmatched_spikes.len(), 1);
        assert!(report.auc_for(0).is_some());
    }

    #[test]
    fn test_bypassed_spike_excluded() {
        let mut input = three_breakfasts();
        input.bypasses.push(Bypass {
            timestamp: day(2, 7, 0),
            reason: "sick day".to_string(),
        });

        let report = analyze(&input, &AnalysisConfig::default()).unwrap();

        assert_eq!(report.bypassed_spikes.len(), 1);
        assert!(report.bypassed_spikes[0].contains(day(2, 7, 0)));
        assert_eq!(report.spikes.len(), 2);
        assert!(report.spikes.iter().all(|s| !s.contains(day(2, 7, 0))));
        assert_eq!(report.matches.unmatched_meals, vec![meal(day(2, 5, 50), 30.0)]);
        // AUC indices refer to the kept spikes
        assert_eq!(report.spike_auc.len(), 2);
        assert_eq!(report.spike_auc[1].spike_index, 1);
    }

    #[test]
    fn test_out_of_order_input_fails() {
        let mut input = three_breakfasts();
        input.readings.swap(0, 1);
        assert!(matches!(
            analyze(&input, &AnalysisConfig::default()),
            Err(AnalysisError::DataOrderingError { .. })
        ));
    }

    #[test]
    fn test_invalid_config_fails_before_analysis() {
        let config = AnalysisConfig {
            search_window_minutes: -5.0,
            ..Default::default()
        };
        assert!(matches!(
            analyze(&three_breakfasts(), &config),
            Err(AnalysisError::ConfigError(_))
        ));
        assert!(SpikeAnalyzer::with_config(config).is_err());
    }

    #[test]
    fn test_analyzer_group_comparison() {
        let analyzer = SpikeAnalyzer::new();
        let report = analyzer.analyze(&three_breakfasts()).unwrap();
        let groups = vec![
            Group {
                start_time: day(1, 0, 0),
                end_time: Some(day(1, 23, 59)),
                description: "Before".to_string(),
            },
            Group {
                start_time: day(2, 0, 0),
                end_time: None,
                description: "After".to_string(),
            },
        ];

        let comparison = analyzer
            .compare_groups(&report, &groups, "Before", "After", None)
            .unwrap();
        assert_eq!(comparison.group_a.match_count, 1);
        assert_eq!(comparison.group_b.match_count, 2);
        // Delays of 15 before, 10 and 15 after
        assert_eq!(
            comparison.change(Metric::Delay).unwrap().absolute_change,
            Some(-2.5)
        );

        let band = GlRange::new(20.0, 40.0).unwrap();
        let filtered = analyzer.group_stats(&report, &groups[1], Some(band));
        assert_eq!(filtered.match_count, 1);

        assert!(matches!(
            analyzer.compare_groups(&report, &groups, "Before", "Missing", None),
            Err(AnalysisError::UnknownGroup(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_sustained_high_glucose_is_not_a_spike() {
        let input = AnalysisInput {
            readings: series(at(6, 0), &[150.0; 25]),
            meals: vec![meal(at(6, 0), 25.0)],
            bypasses: vec![],
        };

        let report = analyze(&input, &AnalysisConfig::default()).unwrap();
        assert!(report.spikes.is_empty());
        assert!(report.matches.matched.is_empty());
        assert_eq!(report.matches.unmatched_meals.len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_auc_skip_is_recorded() {
        let config = AnalysisConfig::default();
        let readings = breakfast_readings();
        let detected = SpikeDetector::new(&config).detect(&readings).unwrap();
        // A spike between two samples has a single reading in its window
        let mut sparse = detected[0].clone();
        sparse.start_time = at(8, 6);
        sparse.peak_time = at(8, 8);
        sparse.end_time = at(8, 12);
        sparse.duration_minutes = 6.0;
        let spikes = vec![sparse, detected[0].clone()];

        let (spike_auc, warnings) =
            quantify_spikes(&AucCalculator::new(&config), &spikes, &readings).unwrap();

        assert_eq!(spike_auc.len(), 1);
        assert_eq!(spike_auc[0].spike_index, 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].stage, Stage::Auc);
        assert_eq!(warnings[0].spike_start_time, at(8, 6));

        let mut report = analyze(
            &AnalysisInput {
                readings,
                meals: vec![],
                bypasses: vec![],
            },
            &config,
        )
        .unwrap();
        assert_eq!(report.skipped(Stage::Auc), 0);
        report.warnings.extend(warnings);
        assert_eq!(report.skipped(Stage::Auc), 1);
        assert_eq!(report.skipped(Stage::Normalization), 0);
    }

    #[test]
    fn test_analyzer_compare_profiles() {
        let analyzer = SpikeAnalyzer::new();
        let report = analyzer.analyze(&three_breakfasts()).unwrap();
        let groups = vec![
            Group {
                start_time: day(1, 0, 0),
                end_time: Some(day(1, 23, 59)),
                description: "Before".to_string(),
            },
            Group {
                start_time: day(2, 0, 0),
                end_time: None,
                description: "After".to_string(),
            },
        ];

        let comparison = analyzer
            .compare_profiles(&report, &groups, "Before", "After")
            .unwrap();
        assert_eq!(comparison.group_a.stats.as_ref().unwrap().count, 1);
        assert_eq!(comparison.group_b.stats.as_ref().unwrap().count, 2);
        let average = comparison.group_b.average.as_ref().unwrap();
        assert_eq!(average.timestamps_minutes.len(), DEFAULT_RESAMPLE_POINTS);
        assert!(comparison.change.is_some());

        assert!(matches!(
            analyzer.compare_profiles(&report, &groups, "Missing", "After"),
            Err(AnalysisError::UnknownGroup(_))
        ));
    }

    #[test]
    fn test_analyzer_find_similar() {
        let analyzer = SpikeAnalyzer::new();
        let report = analyzer.analyze(&three_breakfasts()).unwrap();
        assert_eq!(report.profiles.len(), 3);

        // Days two and three start from the same valley and share a shape exactly
        let similar = analyzer.find_similar(&report, 1, 0.99).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.spike_start_time, day(3, 6, 0));
        assert_eq!(similar[0].1, 1.0);

        let loose = analyzer.find_similar(&report, 0, 0.0).unwrap();
        assert_eq!(loose.len(), 2);
        assert!(loose
            .iter()
            .all(|(p, _)| p.spike_start_time != report.profiles[0].spike_start_time));

        assert!(analyzer.find_similar(&report, 7, 0.9).is_err());
    }
}

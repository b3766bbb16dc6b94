//! Meal-to-spike matching
//!
//! Meals are processed chronologically. Each meal claims the nearest unclaimed spike
//! starting within `search_window_minutes` after it. Claims are tracked as a set of
//! spike indices so the spike sequence itself is never modified.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::stats;
use crate::types::{minutes_between, Match, MatchOutcome, Meal, NearbyMeal, SpikeEvent};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Greedy meal matcher
pub struct MealMatcher<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> MealMatcher<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Result<Self, AnalysisError> {
        let window = config.search_window_minutes;
        if !(window.is_finite() && window > 0.0) {
            return Err(AnalysisError::ConfigError(format!(
                "search_window_minutes must be positive, got {window}"
            )));
        }
        Ok(Self { config })
    }

    /// Match meals to spikes
    pub fn match_meals(&self, meals: &[Meal], spikes: &[SpikeEvent]) -> MatchOutcome {
        // Chronological, stable for meals logged at the same minute
        let mut order: Vec<usize> = (0..meals.len()).collect();
        order.sort_by_key(|&i| meals[i].timestamp);

        let mut claimed: HashSet<usize> = HashSet::new();
        let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
        let mut unmatched_meals = Vec::new();

        for &meal_idx in &order {
            let meal = &meals[meal_idx];
            match self.nearest_candidate(meal, spikes, &claimed) {
                Some((spike_idx, delay)) => {
                    debug!(
                        "meal {} (GL {}) -> spike {} after {delay:.0} min",
                        meal.timestamp, meal.glycemic_load, spikes[spike_idx].start_time
                    );
                    claimed.insert(spike_idx);
                    pairs.push((meal_idx, spike_idx, delay));
                }
                None => unmatched_meals.push(meal.clone()),
            }
        }

        let matched = pairs
            .into_iter()
            .map(|(meal_idx, spike_idx, delay_minutes)| {
                let nearby_meals = self.nearby_meals(meals, &order, meal_idx);
                Match {
                    meal: meals[meal_idx].clone(),
                    spike_index: spike_idx,
                    spike: spikes[spike_idx].clone(),
                    delay_minutes,
                    is_complex: !nearby_meals.is_empty(),
                    nearby_meals,
                }
            })
            .collect();

        let unmatched_spikes = spikes
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed.contains(i))
            .map(|(_, s)| s.clone())
            .collect();

        MatchOutcome {
            matched,
            unmatched_spikes,
            unmatched_meals,
        }
    }

    /// Smallest delay wins; ties go to the earliest start, then the lowest index
    fn nearest_candidate(
        &self,
        meal: &Meal,
        spikes: &[SpikeEvent],
        claimed: &HashSet<usize>,
    ) -> Option<(usize, f64)> {
        spikes
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed.contains(i))
            .filter_map(|(i, spike)| {
                let delay = minutes_between(meal.timestamp, spike.start_time);
                (0.0..=self.config.search_window_minutes)
                    .contains(&delay)
                    .then_some((i, delay, spike.start_time))
            })
            .min_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then(a.2.cmp(&b.2))
                    .then(a.0.cmp(&b.0))
            })
            .map(|(i, delay, _)| (i, delay))
    }

    /// Every other meal within the proximity threshold, chronologically
    fn nearby_meals(&self, meals: &[Meal], order: &[usize], meal_idx: usize) -> Vec<NearbyMeal> {
        let anchor = meals[meal_idx].timestamp;
        order
            .iter()
            .filter(|&&j| j != meal_idx)
            .filter_map(|&j| {
                let other = &meals[j];
                let apart = minutes_between(anchor, other.timestamp).abs();
                (apart <= self.config.proximity_threshold_minutes).then(|| NearbyMeal {
                    timestamp: other.timestamp,
                    glycemic_load: other.glycemic_load,
                    minutes_apart: apart,
                })
            })
            .collect()
    }
}

/// Min/mean/max of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl ValueRange {
    fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            min: stats::min(values)?,
            mean: stats::mean(values)?,
            max: stats::max(values)?,
        })
    }
}

/// Summary of a matching run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub total_meals: usize,
    pub total_spikes: usize,
    pub matched: usize,
    pub unmatched_spikes: usize,
    pub unmatched_meals: usize,
    pub complex_events: usize,
    /// Fraction of meals that were matched
    pub meal_match_rate: Option<f64>,
    pub delay_minutes: Option<ValueRange>,
    pub glycemic_load: Option<ValueRange>,
    pub avg_matched_magnitude: Option<f64>,
}

impl MatchStats {
    pub fn from_outcome(outcome: &MatchOutcome) -> Self {
        let matched = outcome.matched.len();
        let total_meals = matched + outcome.unmatched_meals.len();
        let delays: Vec<f64> = outcome.matched.iter().map(|m| m.delay_minutes).collect();
        let loads: Vec<f64> = outcome
            .matched
            .iter()
            .map(|m| m.meal.glycemic_load)
            .collect();
        let magnitudes: Vec<f64> = outcome.matched.iter().map(|m| m.spike.magnitude).collect();

        Self {
            total_meals,
            total_spikes: matched + outcome.unmatched_spikes.len(),
            matched,
            unmatched_spikes: outcome.unmatched_spikes.len(),
            unmatched_meals: outcome.unmatched_meals.len(),
            complex_events: outcome.matched.iter().filter(|m| m.is_complex).count(),
            meal_match_rate: (total_meals > 0).then(|| matched as f64 / total_meals as f64),
            delay_minutes: ValueRange::from_values(&delays),
            glycemic_load: ValueRange::from_values(&loads),
            avg_matched_magnitude: stats::mean(&magnitudes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::SpikeDetector;
    use crate::fixtures::{at, breakfast_readings, meal};
    use crate::types::EndReason;
    use chrono::{Duration, NaiveDateTime};
    use pretty_assertions::assert_eq;

    fn spike_at(start: NaiveDateTime) -> SpikeEvent {
        SpikeEvent {
            start_time: start,
            start_glucose: 90.0,
            peak_time: start + Duration::minutes(45),
            peak_glucose: 150.0,
            end_time: start + Duration::minutes(100),
            end_glucose: 95.0,
            magnitude: 60.0,
            duration_minutes: 100.0,
            time_to_peak_minutes: 45.0,
            end_reason: EndReason::ReturnedToBaseline,
        }
    }

    fn breakfast_spikes() -> Vec<SpikeEvent> {
        SpikeDetector::new(&AnalysisConfig::default())
            .detect(&breakfast_readings())
            .unwrap()
    }

    #[test]
    fn test_breakfast_match() {
        let config = AnalysisConfig::default();
        let spikes = breakfast_spikes();
        let meals = vec![meal(at(6, 0), 25.0)];

        let outcome = MealMatcher::new(&config).unwrap().match_meals(&meals, &spikes);

        assert_eq!(outcome.matched.len(), 1);
        let m = &outcome.matched[0];
        assert_eq!(m.delay_minutes, 15.0);
        assert!(!m.is_complex);
        assert!(m.nearby_meals.is_empty());
        assert_eq!(m.spike_index, 0);
        assert!(outcome.unmatched_spikes.is_empty());
        assert!(outcome.unmatched_meals.is_empty());
    }

    #[test]
    fn test_complex_event() {
        let config = AnalysisConfig {
            proximity_threshold_minutes: 180.0,
            ..Default::default()
        };
        let spikes = breakfast_spikes();
        let meals = vec![meal(at(6, 30), 12.0), meal(at(6, 0), 25.0)];

        let outcome = MealMatcher::new(&config).unwrap().match_meals(&meals, &spikes);

        assert_eq!(outcome.matched.len(), 1);
        let m = &outcome.matched[0];
        assert_eq!(m.meal, meal(at(6, 0), 25.0));
        assert!(m.is_complex);
        assert_eq!(
            m.nearby_meals,
            vec![NearbyMeal {
                timestamp: at(6, 30),
                glycemic_load: 12.0,
                minutes_apart: 30.0,
            }]
        );
        // The spike starts before the later meal, so that meal has no candidate
        assert_eq!(outcome.unmatched_meals, vec![meal(at(6, 30), 12.0)]);
    }

    #[test]
    fn test_nearest_spike_wins() {
        let config = AnalysisConfig::default();
        let spikes = vec![spike_at(at(7, 10)), spike_at(at(6, 20))];
        let meals = vec![meal(at(6, 0), 20.0)];

        let outcome = MealMatcher::new(&config).unwrap().match_meals(&meals, &spikes);

        assert_eq!(outcome.matched[0].spike_index, 1);
        assert_eq!(outcome.matched[0].delay_minutes, 20.0);
        assert_eq!(outcome.unmatched_spikes, vec![spike_at(at(7, 10))]);
    }

    #[test]
    fn test_exclusivity() {
        let config = AnalysisConfig::default();
        let spikes = vec![
            spike_at(at(7, 0)),
            spike_at(at(9, 0)),
            spike_at(at(12, 30)),
        ];
        let meals = vec![
            meal(at(6, 45), 10.0),
            meal(at(6, 50), 15.0),
            meal(at(8, 40), 30.0),
            meal(at(12, 0), 22.0),
            meal(at(12, 10), 8.0),
        ];

        let outcome = MealMatcher::new(&config).unwrap().match_meals(&meals, &spikes);

        let mut seen_spikes = HashSet::new();
        let mut seen_meals = HashSet::new();
        for m in &outcome.matched {
            assert!(seen_spikes.insert(m.spike_index));
            assert!(seen_meals.insert(m.meal.timestamp));
            assert!(m.delay_minutes >= 0.0 && m.delay_minutes <= config.search_window_minutes);
        }
        assert_eq!(outcome.matched.len(), 3);
        assert_eq!(outcome.unmatched_meals.len(), 2);
        assert_eq!(outcome.matched.len() + outcome.unmatched_meals.len(), meals.len());
        // Earlier meal claims first, even when a later one is closer
        assert_eq!(outcome.matched[0].meal.timestamp, at(6, 45));
        assert_eq!(outcome.matched[2].meal.timestamp, at(12, 0));
    }

    #[test]
    fn test_delay_bounds() {
        let config = AnalysisConfig::default();
        let matcher = MealMatcher::new(&config).unwrap();

        let same_minute = matcher.match_meals(&[meal(at(6, 0), 5.0)], &[spike_at(at(6, 0))]);
        assert_eq!(same_minute.matched[0].delay_minutes, 0.0);

        let edge = matcher.match_meals(&[meal(at(6, 0), 5.0)], &[spike_at(at(7, 30))]);
        assert_eq!(edge.matched[0].delay_minutes, 90.0);

        let late = matcher.match_meals(&[meal(at(6, 0), 5.0)], &[spike_at(at(7, 35))]);
        assert!(late.matched.is_empty());

        let before = matcher.match_meals(&[meal(at(6, 0), 5.0)], &[spike_at(at(5, 55))]);
        assert!(before.matched.is_empty());
        assert_eq!(before.unmatched_spikes.len(), 1);
    }

    #[test]
    fn test_empty_inputs() {
        let config = AnalysisConfig::default();
        let matcher = MealMatcher::new(&config).unwrap();

        let none = matcher.match_meals(&[], &[]);
        assert_eq!(none, MatchOutcome::default());

        let spikes_only = matcher.match_meals(&[], &[spike_at(at(6, 0))]);
        assert_eq!(spikes_only.unmatched_spikes.len(), 1);

        let meals_only = matcher.match_meals(&[meal(at(6, 0), 5.0)], &[]);
        assert_eq!(meals_only.unmatched_meals.len(), 1);
    }

    #[test]
    fn test_invalid_window() {
        let config = AnalysisConfig {
            search_window_minutes: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            MealMatcher::new(&config),
            Err(AnalysisError::ConfigError(_))
        ));
    }

    #[test]
    fn test_match_stats() {
        let config = AnalysisConfig {
            proximity_threshold_minutes: 180.0,
            ..Default::default()
        };
        let spikes = vec![spike_at(at(6, 15)), spike_at(at(13, 0))];
        let meals = vec![
            meal(at(6, 0), 20.0),
            meal(at(6, 30), 10.0),
            meal(at(12, 30), 30.0),
        ];
        let outcome = MealMatcher::new(&config).unwrap().match_meals(&meals, &spikes);
        let stats = MatchStats::from_outcome(&outcome);

        assert_eq!(stats.total_meals, 3);
        assert_eq!(stats.total_spikes, 2);
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.unmatched_meals, 1);
        assert_eq!(stats.complex_events, 1);
        assert_eq!(
            stats.delay_minutes,
            Some(ValueRange {
                min: 15.0,
                mean: 22.5,
                max: 30.0
            })
        );
        assert_eq!(stats.avg_matched_magnitude, Some(60.0));

        let empty = MatchStats::from_outcome(&MatchOutcome::default());
        assert_eq!(empty.meal_match_rate, None);
        assert_eq!(empty.delay_minutes, None);
    }
}

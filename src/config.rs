//! Analysis configuration
//!
//! Thresholds for spike detection, meal matching and shape comparison. A single
//! immutable `AnalysisConfig` is passed explicitly into every stage.
//!
//! The on-disk layout groups detection settings under `spike_detection` (with the
//! end-of-spike rules nested under `end_criteria`) and shape settings under
//! `shape_comparison`. Every key is optional and falls back to its default.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Default minimum rise above the valley (mg/dL)
pub const DEFAULT_MIN_SPIKE_MAGNITUDE: f64 = 30.0;
/// Default absolute glucose level that qualifies a rise as a spike (mg/dL)
pub const DEFAULT_MIN_SPIKE_THRESHOLD: f64 = 140.0;
/// Default resampling resolution for shape comparison
pub const DEFAULT_RESAMPLE_POINTS: usize = 21;

/// Distance metric used when comparing resampled shape profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeMetric {
    /// Mean absolute difference of resampled values
    #[default]
    MeanAbsolute,
    /// Root of the mean squared difference of resampled values
    RootMeanSquare,
}

/// Immutable thresholds for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum rise from valley to qualify as a spike (mg/dL)
    pub min_spike_magnitude: f64,
    /// Absolute glucose level that qualifies a rise regardless of magnitude (mg/dL)
    pub min_spike_threshold: f64,
    /// Distance from the start glucose that counts as a return to baseline (mg/dL)
    pub return_tolerance: f64,
    /// Maximum change per sampling interval that counts as flat (mg/dL)
    pub flat_rate_threshold: f64,
    /// How long the rate must stay flat to end a spike as a plateau
    pub flat_duration_minutes: f64,
    /// Upper bound on spike duration, also the rise/peak look-ahead
    pub max_duration_minutes: f64,
    /// How long after a meal a spike may start and still be attributed to it
    pub search_window_minutes: f64,
    /// Meals closer than this to a matched meal make the match complex
    pub proximity_threshold_minutes: f64,
    /// Samples on each side that a valley must not exceed
    pub valley_window: usize,
    /// Nominal sensor sampling interval, the unit for flat-rate checks
    pub sampling_interval_minutes: f64,
    /// Number of evenly spaced points used when comparing shapes
    pub resample_points: usize,
    /// Distance metric for shape comparison
    pub shape_metric: ShapeMetric,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_spike_magnitude: DEFAULT_MIN_SPIKE_MAGNITUDE,
            min_spike_threshold: DEFAULT_MIN_SPIKE_THRESHOLD,
            return_tolerance: 10.0,
            flat_rate_threshold: 2.0,
            flat_duration_minutes: 30.0,
            max_duration_minutes: 180.0,
            search_window_minutes: 90.0,
            proximity_threshold_minutes: 60.0,
            valley_window: 3,
            sampling_interval_minutes: 5.0,
            resample_points: DEFAULT_RESAMPLE_POINTS,
            shape_metric: ShapeMetric::MeanAbsolute,
        }
    }
}

impl AnalysisConfig {
    /// Check every threshold, failing on the first invalid one
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let positive = [
            ("min_spike_magnitude", self.min_spike_magnitude),
            ("min_spike_threshold", self.min_spike_threshold),
            ("return_tolerance", self.return_tolerance),
            ("flat_rate_threshold", self.flat_rate_threshold),
            ("flat_duration_minutes", self.flat_duration_minutes),
            ("max_duration_minutes", self.max_duration_minutes),
            ("search_window_minutes", self.search_window_minutes),
            ("proximity_threshold_minutes", self.proximity_threshold_minutes),
            ("sampling_interval_minutes", self.sampling_interval_minutes),
        ];

        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(AnalysisError::ConfigError(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        if self.valley_window == 0 {
            return Err(AnalysisError::ConfigError(
                "valley_window must be at least 1".to_string(),
            ));
        }

        if self.max_duration_minutes < self.flat_duration_minutes {
            return Err(AnalysisError::ConfigError(format!(
                "max_duration_minutes ({}) is shorter than flat_duration_minutes ({})",
                self.max_duration_minutes, self.flat_duration_minutes
            )));
        }

        if self.max_duration_minutes < self.sampling_interval_minutes {
            return Err(AnalysisError::ConfigError(format!(
                "max_duration_minutes ({}) is shorter than one sampling interval ({})",
                self.max_duration_minutes, self.sampling_interval_minutes
            )));
        }

        if self.resample_points < 2 {
            return Err(AnalysisError::ConfigError(
                "resample_points must be at least 2".to_string(),
            ));
        }

        Ok(())
    }

    /// Consume the config, returning it only if valid
    pub fn validated(self) -> Result<Self, AnalysisError> {
        self.validate()?;
        Ok(self)
    }

    /// Load a config document and validate it
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        Self::from(file).validated()
    }

    /// Serialize to the config document layout
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&ConfigFile::from(self))
    }
}

/// Config document as stored on disk
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    spike_detection: SpikeDetectionSection,
    #[serde(default)]
    shape_comparison: ShapeSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct SpikeDetectionSection {
    min_spike_magnitude: f64,
    min_spike_threshold: f64,
    end_criteria: EndCriteriaSection,
    search_window_minutes: f64,
    proximity_threshold_minutes: f64,
    valley_window: usize,
    sampling_interval_minutes: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct EndCriteriaSection {
    return_tolerance: f64,
    flat_rate_threshold: f64,
    flat_duration_minutes: f64,
    max_duration_minutes: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ShapeSection {
    resample_points: usize,
    metric: ShapeMetric,
}

impl Default for SpikeDetectionSection {
    fn default() -> Self {
        let config = AnalysisConfig::default();
        Self {
            min_spike_magnitude: config.min_spike_magnitude,
            min_spike_threshold: config.min_spike_threshold,
            end_criteria: EndCriteriaSection::default(),
            search_window_minutes: config.search_window_minutes,
            proximity_threshold_minutes: config.proximity_threshold_minutes,
            valley_window: config.valley_window,
            sampling_interval_minutes: config.sampling_interval_minutes,
        }
    }
}

impl Default for EndCriteriaSection {
    fn default() -> Self {
        let config = AnalysisConfig::default();
        Self {
            return_tolerance: config.return_tolerance,
            flat_rate_threshold: config.flat_rate_threshold,
            flat_duration_minutes: config.flat_duration_minutes,
            max_duration_minutes: config.max_duration_minutes,
        }
    }
}

impl Default for ShapeSection {
    fn default() -> Self {
        Self {
            resample_points: DEFAULT_RESAMPLE_POINTS,
            metric: ShapeMetric::default(),
        }
    }
}

impl From<ConfigFile> for AnalysisConfig {
    fn from(file: ConfigFile) -> Self {
        let detection = file.spike_detection;
        let end = detection.end_criteria;
        Self {
            min_spike_magnitude: detection.min_spike_magnitude,
            min_spike_threshold: detection.min_spike_threshold,
            return_tolerance: end.return_tolerance,
            flat_rate_threshold: end.flat_rate_threshold,
            flat_duration_minutes: end.flat_duration_minutes,
            max_duration_minutes: end.max_duration_minutes,
            search_window_minutes: detection.search_window_minutes,
            proximity_threshold_minutes: detection.proximity_threshold_minutes,
            valley_window: detection.valley_window,
            sampling_interval_minutes: detection.sampling_interval_minutes,
            resample_points: file.shape_comparison.resample_points,
            shape_metric: file.shape_comparison.metric,
        }
    }
}

impl From<&AnalysisConfig> for ConfigFile {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            spike_detection: SpikeDetectionSection {
                min_spike_magnitude: config.min_spike_magnitude,
                min_spike_threshold: config.min_spike_threshold,
                end_criteria: EndCriteriaSection {
                    return_tolerance: config.return_tolerance,
                    flat_rate_threshold: config.flat_rate_threshold,
                    flat_duration_minutes: config.flat_duration_minutes,
                    max_duration_minutes: config.max_duration_minutes,
                },
                search_window_minutes: config.search_window_minutes,
                proximity_threshold_minutes: config.proximity_threshold_minutes,
                valley_window: config.valley_window,
                sampling_interval_minutes: config.sampling_interval_minutes,
            },
            shape_comparison: ShapeSection {
                resample_points: config.resample_points,
                metric: config.shape_metric,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let config = AnalysisConfig {
            search_window_minutes: 0.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigError(_)));
        assert!(err.to_string().contains("search_window_minutes"));

        let config = AnalysisConfig {
            return_tolerance: -5.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_duration_shorter_than_flat_window_rejected() {
        let config = AnalysisConfig {
            max_duration_minutes: 20.0,
            flat_duration_minutes: 30.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_json_nested_layout() {
        let json = r#"{
            "spike_detection": {
                "min_spike_magnitude": 25,
                "min_spike_threshold": 150,
                "end_criteria": {
                    "return_tolerance": 8,
                    "max_duration_minutes": 240
                },
                "search_window_minutes": 120
            },
            "shape_comparison": { "metric": "root_mean_square" }
        }"#;

        let config = AnalysisConfig::from_json(json).unwrap();
        assert_eq!(config.min_spike_magnitude, 25.0);
        assert_eq!(config.min_spike_threshold, 150.0);
        assert_eq!(config.return_tolerance, 8.0);
        assert_eq!(config.max_duration_minutes, 240.0);
        assert_eq!(config.search_window_minutes, 120.0);
        // Unspecified keys keep their defaults
        assert_eq!(config.flat_duration_minutes, 30.0);
        assert_eq!(config.proximity_threshold_minutes, 60.0);
        assert_eq!(config.shape_metric, ShapeMetric::RootMeanSquare);
        assert_eq!(config.resample_points, DEFAULT_RESAMPLE_POINTS);
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        let json = r#"{ "spike_detection": { "search_window_minutes": -1 } }"#;
        assert!(matches!(
            AnalysisConfig::from_json(json),
            Err(AnalysisError::ConfigError(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AnalysisConfig {
            proximity_threshold_minutes: 180.0,
            resample_points: 41,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert!(json.contains("end_criteria"));
        let loaded = AnalysisConfig::from_json(&json).unwrap();
        assert_eq!(loaded, config);
    }
}

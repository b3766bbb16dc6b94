//! Meal log document
//!
//! The user-maintained log of meals, analysis groups, and bypassed spikes:
//!
//! ```json
//! {
//!   "meals": [{"timestamp": "2024-03-01:06:00", "gl": 25}],
//!   "groups": [{"start": "2024-03-01:00:00", "end": null, "description": "Baseline"}],
//!   "bypassed_spikes": [{"timestamp": "2024-03-02:07:00", "reason": "sick day"}]
//! }
//! ```

use crate::error::AnalysisError;
use crate::pipeline::AnalysisInput;
use crate::schema::timestamp;
use crate::types::{Bypass, Group, Meal, Reading};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealEntry {
    #[serde(with = "timestamp::meal_log")]
    pub timestamp: NaiveDateTime,
    /// Glycemic load
    pub gl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    #[serde(with = "timestamp::meal_log")]
    pub start: NaiveDateTime,
    #[serde(default, with = "timestamp::meal_log_opt")]
    pub end: Option<NaiveDateTime>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassEntry {
    #[serde(with = "timestamp::meal_log")]
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub reason: String,
}

/// Meals, groups and bypasses as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MealLog {
    #[serde(default)]
    pub meals: Vec<MealEntry>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    #[serde(default)]
    pub bypassed_spikes: Vec<BypassEntry>,
}

impl MealLog {
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check glycemic loads and group bounds
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for entry in &self.meals {
            if !entry.gl.is_finite() || entry.gl < 0.0 {
                return Err(AnalysisError::ParseError(format!(
                    "meal at {} has invalid glycemic load {}",
                    timestamp::format_meal_timestamp(entry.timestamp),
                    entry.gl
                )));
            }
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.description.trim().is_empty() {
                return Err(AnalysisError::ParseError(
                    "group description must not be empty".to_string(),
                ));
            }
            if !seen.insert(group.description.as_str()) {
                return Err(AnalysisError::ParseError(format!(
                    "duplicate group '{}'",
                    group.description
                )));
            }
            if let Some(end) = group.end {
                if end < group.start {
                    return Err(AnalysisError::ParseError(format!(
                        "group '{}' ends before it starts",
                        group.description
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn meals(&self) -> Vec<Meal> {
        self.meals
            .iter()
            .map(|m| Meal {
                timestamp: m.timestamp,
                glycemic_load: m.gl,
            })
            .collect()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.groups
            .iter()
            .map(|g| Group {
                start_time: g.start,
                end_time: g.end,
                description: g.description.clone(),
            })
            .collect()
    }

    pub fn bypasses(&self) -> Vec<Bypass> {
        self.bypassed_spikes
            .iter()
            .map(|b| Bypass {
                timestamp: b.timestamp,
                reason: b.reason.clone(),
            })
            .collect()
    }

    /// Pipeline input from this log and a reading sequence
    pub fn to_input(&self, readings: Vec<Reading>) -> AnalysisInput {
        AnalysisInput {
            readings,
            meals: self.meals(),
            bypasses: self.bypasses(),
        }
    }
}

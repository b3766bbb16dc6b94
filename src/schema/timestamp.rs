//! Timestamp formats accepted on input

use crate::error::AnalysisError;
use chrono::NaiveDateTime;

/// Format used by the meal log, e.g. `2024-03-01:06:00`
pub const MEAL_LOG_FORMAT: &str = "%Y-%m-%d:%H:%M";

const ACCEPTED_FORMATS: [&str; 6] = [
    MEAL_LOG_FORMAT,
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    // LibreView export
    "%d-%m-%Y %H:%M",
];

/// Parse a timestamp in any accepted format
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime, AnalysisError> {
    let trimmed = input.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            AnalysisError::DateParseError(format!(
                "'{input}' (expected YYYY-MM-DD:HH:MM or YYYY-MM-DD HH:MM)"
            ))
        })
}

pub fn format_meal_timestamp(t: NaiveDateTime) -> String {
    t.format(MEAL_LOG_FORMAT).to_string()
}

/// Serde adapter: any accepted format in, ISO 8601 out
pub mod iso {
    use super::parse_timestamp;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: any accepted format in, meal-log format out
pub mod meal_log {
    use super::{format_meal_timestamp, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_meal_timestamp(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional meal-log timestamps; `null` means open-ended
pub mod meal_log_opt {
    use super::{format_meal_timestamp, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&format_meal_timestamp(*t)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

//! Glucose reading records
//!
//! One JSON object per sensor sample. `record_type` follows the LibreView export:
//! 0 for historic (continuous) readings, 1 for manual scans.

use crate::error::AnalysisError;
use crate::schema::timestamp;
use crate::types::{Reading, ReadingKind};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Lowest and highest values a sensor reports (mg/dL)
pub const SENSOR_RANGE: (f64, f64) = (20.0, 600.0);

/// A reading as it appears on input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    #[serde(with = "timestamp::iso")]
    pub timestamp: NaiveDateTime,
    pub glucose: f64,
    #[serde(default)]
    pub record_type: u8,
}

impl ReadingRecord {
    pub fn validate(&self) -> Result<(), RecordError> {
        if !self.glucose.is_finite() {
            return Err(RecordError::NonFiniteGlucose);
        }
        let (low, high) = SENSOR_RANGE;
        if self.glucose < low || self.glucose > high {
            return Err(RecordError::GlucoseOutOfRange(self.glucose));
        }
        if ReadingKind::from_record_type(self.record_type).is_none() {
            return Err(RecordError::UnknownRecordType(self.record_type));
        }
        Ok(())
    }
}

impl From<&Reading> for ReadingRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            glucose: reading.glucose,
            record_type: match reading.kind {
                ReadingKind::Historic => 0,
                ReadingKind::Scan => 1,
            },
        }
    }
}

/// Problems with a single reading record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("glucose is not a finite number")]
    NonFiniteGlucose,

    #[error("glucose {0} mg/dL outside sensor range")]
    GlucoseOutOfRange(f64),

    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
}

/// Result of record validation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValidation {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub error: RecordError,
}

/// Adapter from reading records to domain readings
pub struct ReadingsAdapter;

impl ReadingsAdapter {
    /// Parse a JSON array of records
    pub fn parse_array(json: &str) -> Result<Vec<ReadingRecord>, AnalysisError> {
        let records: Vec<ReadingRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON, one record per line
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<ReadingRecord>, AnalysisError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ReadingRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(AnalysisError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(records)
    }

    /// Convert records to readings sorted by time.
    ///
    /// Fails on the first invalid record, or when two historic readings share a
    /// timestamp.
    pub fn to_readings(records: &[ReadingRecord]) -> Result<Vec<Reading>, AnalysisError> {
        let mut readings = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            record.validate().map_err(|e| {
                AnalysisError::ParseError(format!("Invalid record {idx}: {e}"))
            })?;
            readings.push(Reading {
                timestamp: record.timestamp,
                glucose: record.glucose,
                kind: ReadingKind::from_record_type(record.record_type).unwrap_or_default(),
            });
        }

        readings.sort_by_key(|r| r.timestamp);

        let historic: Vec<Reading> = readings
            .iter()
            .filter(|r| r.kind == ReadingKind::Historic)
            .cloned()
            .collect();
        crate::detector::ensure_ordered(&historic)?;

        Ok(readings)
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_records(records: &[ReadingRecord]) -> Vec<RecordValidation> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.validate().err().map(|error| RecordValidation {
                    index,
                    timestamp: record.timestamp,
                    error,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::at;

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"
{"timestamp": "2024-03-01 06:00", "glucose": 82, "record_type": 0}

{"timestamp": "2024-03-01T06:05:00", "glucose": 90}
{"timestamp": "2024-03-01:06:07", "glucose": 95, "record_type": 1}
"#;
        let records = ReadingsAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].record_type, 0);

        let readings = ReadingsAdapter::to_readings(&records).unwrap();
        assert_eq!(readings[0], Reading::new(at(6, 0), 82.0));
        assert_eq!(readings[2].kind, ReadingKind::Scan);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"timestamp\": \"2024-03-01 06:00\", \"glucose\": 82}\nnot json\n";
        let err = ReadingsAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let bad_time = "{\"timestamp\": \"06:00\", \"glucose\": 82}";
        assert!(ReadingsAdapter::parse_ndjson(bad_time).is_err());
    }

    #[test]
    fn test_parse_array_sorts() {
        let json = r#"[
            {"timestamp": "2024-03-01 06:10", "glucose": 99},
            {"timestamp": "2024-03-01 06:00", "glucose": 82},
            {"timestamp": "2024-03-01 06:05", "glucose": 90}
        ]"#;
        let records = ReadingsAdapter::parse_array(json).unwrap();
        let readings = ReadingsAdapter::to_readings(&records).unwrap();
        let times: Vec<_> = readings.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(6, 0), at(6, 5), at(6, 10)]);
    }

    #[test]
    fn test_duplicate_historic_rejected() {
        let records = vec![
            ReadingRecord {
                timestamp: at(6, 0),
                glucose: 82.0,
                record_type: 0,
            },
            ReadingRecord {
                timestamp: at(6, 0),
                glucose: 84.0,
                record_type: 0,
            },
        ];
        assert!(matches!(
            ReadingsAdapter::to_readings(&records),
            Err(AnalysisError::DataOrderingError { .. })
        ));

        // A scan at the same minute is fine
        let mut with_scan = records.clone();
        with_scan[1].record_type = 1;
        assert_eq!(ReadingsAdapter::to_readings(&with_scan).unwrap().len(), 2);
    }

    #[test]
    fn test_validate_records() {
        let records = vec![
            ReadingRecord {
                timestamp: at(6, 0),
                glucose: 82.0,
                record_type: 0,
            },
            ReadingRecord {
                timestamp: at(6, 5),
                glucose: 900.0,
                record_type: 0,
            },
            ReadingRecord {
                timestamp: at(6, 10),
                glucose: 90.0,
                record_type: 6,
            },
        ];

        let failures = ReadingsAdapter::validate_records(&records);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].error, RecordError::GlucoseOutOfRange(900.0));
        assert_eq!(failures[1].error, RecordError::UnknownRecordType(6));
        assert!(ReadingsAdapter::to_readings(&records).is_err());
    }

    #[test]
    fn test_record_round_trip() {
        let mut reading = Reading::new(at(6, 0), 82.0);
        reading.kind = ReadingKind::Scan;
        let json = serde_json::to_string(&ReadingRecord::from(&reading)).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2024-03-01T06:00:00","glucose":82.0,"record_type":1}"#
        );
    }
}

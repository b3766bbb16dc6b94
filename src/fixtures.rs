//! Shared test data

use crate::types::{Meal, Reading};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// 2024-03-01 at `h:m`
pub fn at(h: u32, m: u32) -> NaiveDateTime {
    day(1, h, m)
}

/// 2024-03-`d` at `h:m`
pub fn day(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Readings spaced five minutes apart starting at `start`
pub fn series(start: NaiveDateTime, values: &[f64]) -> Vec<Reading> {
    values
        .iter()
        .enumerate()
        .map(|(i, &g)| Reading::new(start + Duration::minutes(5 * i as i64), g))
        .collect()
}

/// Flat at 82 from 06:00, rises to 168 at 07:05, back to 88 at 08:00
pub const BREAKFAST_VALUES: [f64; 31] = [
    82.0, 82.0, 82.0, 82.0, // 06:00 - 06:15
    90.0, 99.0, 108.0, 117.0, 126.0, 135.0, 144.0, 153.0, 161.0, 168.0, // 06:20 - 07:05
    160.0, 152.0, 144.0, 136.0, 128.0, 120.0, 112.0, 104.0, 98.0, 93.0, 88.0, // 07:10 - 08:00
    87.0, 86.0, 86.0, 87.0, 86.0, 86.0, // 08:05 - 08:30
];

pub fn breakfast_readings() -> Vec<Reading> {
    series(at(6, 0), &BREAKFAST_VALUES)
}

/// The breakfast curve repeated at `start`
pub fn breakfast_at(start: NaiveDateTime) -> Vec<Reading> {
    series(start, &BREAKFAST_VALUES)
}

pub fn meal(timestamp: NaiveDateTime, glycemic_load: f64) -> Meal {
    Meal {
        timestamp,
        glycemic_load,
    }
}

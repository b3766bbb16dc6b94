//! Input schema
//!
//! JSON layouts for glucose readings and the meal log, with adapters into the
//! domain types consumed by the pipeline.

mod meal_log;
mod readings;
pub mod timestamp;

pub use meal_log::*;
pub use readings::*;
pub use timestamp::{format_meal_timestamp, parse_timestamp};

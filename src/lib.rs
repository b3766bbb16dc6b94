//! Glucose Flux - Post-meal glucose response analysis
//!
//! Flux turns a continuous glucose monitor trace and a meal log into comparable
//! descriptions of post-meal responses through a deterministic pipeline:
//! spike detection → meal matching → AUC quantification → shape normalization.
//! Group statistics compare responses across caller-defined periods.
//!
//! ## Modules
//!
//! - **Analysis**: `detector`, `matcher`, `auc`, `normalizer`, `groups`, orchestrated by `pipeline`
//! - **Input**: `schema` parses reading records and the meal log
//! - **Output**: `report` renders JSON and plain-text tables

pub mod auc;
pub mod config;
pub mod detector;
pub mod error;
pub mod groups;
pub mod matcher;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod stats;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use config::{AnalysisConfig, ShapeMetric};
pub use error::AnalysisError;
pub use pipeline::{analyze, AnalysisInput, SpikeAnalyzer};

// Schema exports
pub use schema::{MealLog, ReadingRecord, ReadingsAdapter};

/// Crate version
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in JSON reports
pub const PRODUCER_NAME: &str = "glucose-flux";

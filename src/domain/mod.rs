//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - dataset selection enums (`DatasetType`, `DatasetSelection`, `SourceCategory`)
//! - normalized measurements (`FieldSample`) and their fields (`FieldName`)
//! - the dataset description aggregate and the submission tally (`RunResult`)

pub mod types;

pub use types::*;

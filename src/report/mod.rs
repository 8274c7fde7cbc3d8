//! Reporting utilities: formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the pipeline and API clients stay free of presentation concerns
//! - output changes are localized

pub mod format;

pub use format::*;
